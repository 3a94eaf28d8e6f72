use crate::comparator::{check_entities, DeterministicComparator};
use crate::config::ComparisonConfig;
use crate::error::{ComparatorError, Result};
use crate::extraction::{
    contract_schema, with_deadline, ComparisonContract, ExtractionRequest, ExtractionService,
    ExtractionTask,
};
use crate::field_mapping::FieldMappingTable;
use crate::normalizer::Normalizer;
use crate::schema::{ComparisonMethod, ComparisonResult, ComparisonRow, ProductType, RawRecord};
use crate::utils::format_number;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const REQUIRED_KEYS: &[&str] = &[
    "parameters",
    "reference_advantages",
    "competitor_highlights",
    "recommendation",
];

fn violation(details: impl Into<String>) -> ComparatorError {
    ComparatorError::ContractViolation(details.into())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => n.as_f64().map(format_number),
        Value::Bool(b) => Some(if *b { "Да" } else { "Нет" }.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value, key: &str) -> Result<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| violation(format!("'{}' must be an array", key)))?
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| violation(format!("'{}' must contain only strings", key)))
        })
        .collect()
}

fn parse_row(index: usize, parameter: &Value, entities: &[String]) -> Result<ComparisonRow> {
    let object = parameter
        .as_object()
        .ok_or_else(|| violation(format!("parameter #{} is not an object", index)))?;
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| violation(format!("parameter #{} has no name", index)))?;
    let values_map = object
        .get("values")
        .and_then(Value::as_object)
        .ok_or_else(|| violation(format!("parameter '{}' has no values", name)))?;

    let values = entities
        .iter()
        .map(|entity| {
            values_map
                .get(entity)
                .and_then(scalar_text)
                .ok_or_else(|| {
                    violation(format!("parameter '{}' has no value for '{}'", name, entity))
                })
        })
        .collect::<Result<Vec<String>>>()?;

    let best_entity_index = match object.get("best_entity") {
        None | Some(Value::Null) => None,
        Some(Value::String(best)) => {
            let index = entities.iter().position(|e| e == best).ok_or_else(|| {
                violation(format!("best entity '{}' is not being compared", best))
            })?;
            Some(index)
        }
        Some(_) => {
            return Err(violation(format!(
                "best_entity of '{}' is not a string",
                name
            )))
        }
    };

    Ok(ComparisonRow {
        parameter: name.to_string(),
        label: name.to_string(),
        values,
        best_entity_index,
    })
}

/// Checks a response against the comparison contract and converts it.
///
/// Anything short of the full contract is an error: required keys, a non-empty parameter
/// list, and a value for every entity in every parameter.
pub fn parse_contract(
    response: &Value,
    entities: &[String],
    product_type: ProductType,
) -> Result<ComparisonResult> {
    let object = response
        .as_object()
        .ok_or_else(|| violation("response is not a JSON object"))?;
    if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
        return Err(violation(format!("missing required key '{}'", missing)));
    }

    let parameters = object["parameters"]
        .as_array()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| violation("'parameters' must be a non-empty array"))?;
    let rows = parameters
        .iter()
        .enumerate()
        .map(|(i, p)| parse_row(i, p, entities))
        .collect::<Result<Vec<_>>>()?;

    let insights = match object.get("insights") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => string_list(value, "insights")?,
    };
    let reference_advantages =
        string_list(&object["reference_advantages"], "reference_advantages")?;

    let highlights = object["competitor_highlights"]
        .as_object()
        .ok_or_else(|| violation("'competitor_highlights' must be an object"))?;
    let mut competitor_highlights = BTreeMap::new();
    for competitor in &entities[1..] {
        let list = match highlights.get(competitor) {
            Some(value) => string_list(value, "competitor_highlights")?,
            None => Vec::new(),
        };
        competitor_highlights.insert(competitor.clone(), list);
    }
    let unknown = highlights
        .keys()
        .filter(|k| !competitor_highlights.contains_key(*k))
        .count();
    if unknown > 0 {
        debug!("Ignoring {} highlight groups for unknown entities", unknown);
    }

    let recommendation = object["recommendation"]
        .as_str()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| violation("'recommendation' must be a non-empty string"))?
        .to_string();

    Ok(ComparisonResult {
        product_type,
        entities: entities.to_vec(),
        rows,
        insights,
        reference_advantages,
        competitor_highlights,
        recommendation,
        method: ComparisonMethod::Assisted,
    })
}

/// Model-backed comparison over raw records, with the deterministic path as a silent fallback.
pub struct AssistedExtractor<'a> {
    table: &'a FieldMappingTable,
    config: &'a ComparisonConfig,
    extractor: Option<&'a dyn ExtractionService>,
}

impl<'a> AssistedExtractor<'a> {
    pub fn new(table: &'a FieldMappingTable, config: &'a ComparisonConfig) -> Self {
        Self {
            table,
            config,
            extractor: None,
        }
    }

    pub fn with_extractor(mut self, extractor: &'a dyn ExtractionService) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Returns `method = assisted` when the service delivers a valid contract and the
    /// deterministic comparison otherwise. Only input errors are returned.
    pub async fn compare_assisted(
        &self,
        raw_entities: &[(String, RawRecord)],
        product_type: ProductType,
    ) -> Result<ComparisonResult> {
        check_entities(raw_entities.iter().map(|(name, _)| name.as_str()))?;

        match self.try_assisted(raw_entities, product_type).await {
            Ok(result) => {
                info!(
                    "Assisted comparison of {} {} offers: {} parameters",
                    raw_entities.len(),
                    product_type,
                    result.rows.len()
                );
                Ok(result)
            }
            Err(e) => {
                warn!(
                    "Assisted comparison unavailable ({}), falling back to deterministic",
                    e
                );
                self.fallback(raw_entities, product_type)
            }
        }
    }

    fn fallback(
        &self,
        raw_entities: &[(String, RawRecord)],
        product_type: ProductType,
    ) -> Result<ComparisonResult> {
        let normalized = Normalizer::new(self.table).normalize_all(raw_entities, product_type);
        DeterministicComparator::new(self.table, self.config).compare(&normalized, product_type)
    }

    async fn try_assisted(
        &self,
        raw_entities: &[(String, RawRecord)],
        product_type: ProductType,
    ) -> Result<ComparisonResult> {
        let extractor = self.extractor.ok_or_else(|| {
            ComparatorError::ExtractionFailed("no extraction service configured".to_string())
        })?;
        let entities: Vec<String> = raw_entities.iter().map(|(name, _)| name.clone()).collect();

        let request = ExtractionRequest {
            task: ExtractionTask::Comparison,
            product_type,
            target_entities: entities.clone(),
            raw_payloads: raw_entities
                .iter()
                .map(|(name, record)| json!({ "entity": name, "record": record }))
                .collect(),
            instructions: format!(
                "Сравни продукты «{}» банков: {}. Первый банк ({}) основной, остальные конкуренты. \
                 Для каждого параметра укажи значение у каждого банка точно по его имени и банк \
                 с лучшим значением. Дай {} ключевых вывода, преимущества основного банка, сильные \
                 стороны каждого конкурента и одну рекомендацию.",
                product_type.display_name(),
                entities.join(", "),
                entities[0],
                self.config.insight_count()
            ),
            output_contract: contract_schema::<ComparisonContract>()?,
        };

        let response = with_deadline(
            "assisted comparison",
            self.config.assisted_timeout(),
            extractor.extract(&request),
        )
        .await?;
        parse_contract(&response, &entities, product_type)
    }
}
