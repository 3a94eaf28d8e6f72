//! Boundaries to the network collaborators: direct listing fetchers and search providers.
//!
//! Neither side retries; retry policy belongs to the implementation behind the trait.

use crate::error::Result;
use crate::schema::{ProductType, RawRecord, TrendWindow};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Fetches an entity's own structured listing for a product type.
#[async_trait]
pub trait DirectFetcher: Send + Sync {
    async fn fetch(&self, entity: &str, product_type: ProductType) -> Result<RawRecord>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub terms: String,
    #[serde(default)]
    pub window: Option<TrendWindow>,
}

impl SearchQuery {
    /// Query for the current terms of an entity's product.
    pub fn current_terms(entity: &str, product_type: ProductType) -> Self {
        Self {
            terms: format!(
                "{} {} условия ставка тарифы",
                entity,
                product_type.display_name()
            ),
            window: None,
        }
    }

    /// Query for past changes of one field within `window`.
    pub fn history(entity: &str, product_type: ProductType, label: &str, window: TrendWindow) -> Self {
        Self {
            terms: format!(
                "{} {} {} изменение история {}",
                entity,
                product_type.display_name(),
                label.to_lowercase(),
                window.label()
            ),
            window: Some(window),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub snippet_text: String,
    pub source_url: String,
    #[serde(default)]
    pub published_date: Option<NaiveDate>,
}

/// Search engine boundary. An empty result is a valid answer meaning "nothing found".
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}

/// Snippets long enough to be worth extracting from, capped at `limit`.
pub fn usable_snippets(hits: &[SearchHit], min_chars: usize, limit: usize) -> Vec<&SearchHit> {
    hits.iter()
        .filter(|hit| hit.snippet_text.trim().chars().count() >= min_chars)
        .take(limit)
        .collect()
}
