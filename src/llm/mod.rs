pub mod client;
pub mod prompts;
pub mod types;
pub mod utils;

pub use client::*;
pub use types::*;
