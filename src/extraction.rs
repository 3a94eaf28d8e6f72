use crate::error::{ComparatorError, Result};
use crate::field_mapping::ProductSchema;
use crate::schema::ProductType;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// What the extraction service is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTask {
    /// One product record keyed by canonical field names, from free text.
    ProductRecord,
    /// A full side-by-side comparison straight from raw records.
    Comparison,
    /// Dated value changes of one field, from search snippets.
    TrendPoints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub task: ExtractionTask,
    pub product_type: ProductType,
    pub target_entities: Vec<String>,
    /// Raw records or snippet texts, passed through untouched.
    pub raw_payloads: Vec<Value>,
    /// Task-specific instructions in the language of the data.
    pub instructions: String,
    /// JSON Schema the response must satisfy.
    pub output_contract: Value,
}

/// The natural-language extraction boundary. Implementations return structured JSON or fail;
/// a response that does not satisfy the contract is treated exactly like a failure.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContractParameter {
    #[schemars(description = "Parameter name as shown to the user, e.g. 'Процентная ставка'")]
    pub name: String,
    #[schemars(description = "Value per entity, keyed by the exact entity name")]
    pub values: BTreeMap<String, String>,
    #[schemars(description = "Entity with the best value, or null when there is no clear winner")]
    pub best_entity: Option<String>,
}

/// Output contract of the assisted comparison.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComparisonContract {
    #[schemars(description = "Compared parameters, most important first")]
    pub parameters: Vec<ContractParameter>,
    #[schemars(description = "4-6 short findings naming both entities and the concrete values")]
    #[serde(default)]
    pub insights: Vec<String>,
    #[schemars(description = "Parameters where the first (reference) entity is best")]
    pub reference_advantages: Vec<String>,
    #[schemars(description = "Per competitor: parameters where that competitor is best")]
    pub competitor_highlights: BTreeMap<String, Vec<String>>,
    #[schemars(description = "One-sentence recommendation for the reference entity")]
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrendPointCandidate {
    #[schemars(description = "Date of the change: YYYY-MM-DD, DD.MM.YYYY or YYYY-MM")]
    pub date: String,
    #[schemars(description = "Value of the field from this date on, e.g. '18.5%'")]
    pub value: String,
    #[schemars(description = "Why the value changed, e.g. a key rate decision")]
    #[serde(default)]
    pub reason: String,
    #[schemars(description = "Certainty in [0, 1] that the point is accurate")]
    #[serde(default)]
    pub confidence: Option<f64>,
    #[schemars(description = "URL of the snippet the point was taken from")]
    #[serde(default)]
    pub source: Option<String>,
}

/// Output contract of trend reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrendPointsContract {
    #[schemars(description = "Value changes in chronological order")]
    pub points: Vec<TrendPointCandidate>,
}

/// JSON Schema of a contract type, ready to send as `output_contract`.
pub fn contract_schema<T: JsonSchema>() -> Result<Value> {
    let root = schemars::schema_for!(T);
    Ok(serde_json::to_value(root)?)
}

/// Contract for a single product record: every required canonical field as an optional string.
pub fn record_contract(schema: &ProductSchema) -> Value {
    let properties: serde_json::Map<String, Value> = schema
        .fields()
        .iter()
        .map(|spec| {
            (
                spec.name.clone(),
                json!({ "type": ["string", "null"], "description": spec.label }),
            )
        })
        .collect();
    json!({
        "type": "object",
        "properties": properties,
    })
}

/// Runs `future` with a deadline; running out of time is a `Timeout` error.
pub async fn with_deadline<T, F>(operation: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(ComparatorError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}
