use crate::schema::ProductType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComparatorError {
    #[error("Alias '{alias}' is claimed by both '{first}' and '{second}' for product type {product_type}")]
    AliasCollision {
        product_type: ProductType,
        alias: String,
        first: String,
        second: String,
    },

    #[error("Product type {product_type} requires field '{field}' which has no canonical definition for it")]
    MissingFieldDefinition {
        product_type: ProductType,
        field: String,
    },

    #[error("No product definition found for {0}")]
    MissingProductDefinition(ProductType),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid value for '{parameter}': {details}")]
    InvalidInput { parameter: String, details: String },

    #[error("Unknown product type '{0}': expected one of credit_card, debit_card, deposit, consumer_loan")]
    UnknownProductType(String),

    #[error("Field '{field}' is not defined for product type {product_type}")]
    UnknownField {
        product_type: ProductType,
        field: String,
    },

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Extraction response violates the output contract: {0}")]
    ContractViolation(String),

    #[error("Acquisition stage {stage} failed: {details}")]
    AcquisitionFailed { stage: String, details: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[cfg(feature = "gemini")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl ComparatorError {
    pub(crate) fn invalid_input(parameter: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidInput {
            parameter: parameter.into(),
            details: details.into(),
        }
    }

    /// Errors raised while loading the static tables. The process must not start on these.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::AliasCollision { .. }
                | Self::MissingFieldDefinition { .. }
                | Self::MissingProductDefinition(_)
                | Self::InvalidConfig(_)
        )
    }

    /// Errors caused by caller-supplied parameters, rejected before any work starts.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::UnknownProductType(_) | Self::UnknownField { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ComparatorError>;
