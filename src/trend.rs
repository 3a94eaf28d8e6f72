use crate::config::TrendConfig;
use crate::error::{ComparatorError, Result};
use crate::extraction::{
    contract_schema, with_deadline, ExtractionRequest, ExtractionService, ExtractionTask,
    TrendPointsContract,
};
use crate::field_mapping::{FieldMappingTable, FieldSpec};
use crate::normalizer::format_value;
use crate::schema::{
    FieldFormat, ProductType, TrendOrigin, TrendPeriod, TrendPoint, TrendSeries, TrendWindow,
};
use crate::sources::{SearchHit, SearchProvider, SearchQuery};
use crate::synthetic::synthetic_series;
use crate::utils::{parse_magnitude, parse_point_date};
use chrono::NaiveDate;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Keys under which a response object may carry its point list.
const POINT_LIST_KEYS: &[&str] = &["points", "timeline", "changes"];

/// Relative change, in percent, beyond which a series counts as moving.
const DIRECTION_THRESHOLD_PERCENT: f64 = 2.0;

/// Smallest step between consecutive values that counts as a change point.
const CHANGE_POINT_THRESHOLD: f64 = 0.1;

const SNIPPET_REASON: &str = "Извлечено из новости";

fn snippet_rate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+[.,]\d+)%").expect("static regex"))
}

/// A point proposed by the extraction service, before date parsing and scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCandidate {
    pub date: String,
    pub value: Value,
    pub reason: String,
    pub confidence: Option<f64>,
    pub source: Option<String>,
}

impl PointCandidate {
    fn from_value(item: &Value) -> Option<Self> {
        let object = item.as_object()?;
        let date = object.get("date")?.as_str()?.to_string();
        let value = object.get("value").filter(|v| !v.is_null())?.clone();
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Some(Self {
            date,
            value,
            reason: text("reason").unwrap_or_default(),
            confidence: object.get("confidence").and_then(Value::as_f64),
            source: text("source"),
        })
    }
}

/// Reads point candidates from a bare array or from an object holding one under a known key.
pub fn parse_candidates(response: &Value) -> Result<Vec<PointCandidate>> {
    let items = match response {
        Value::Array(items) => items,
        Value::Object(object) => POINT_LIST_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_array))
            .ok_or_else(|| {
                ComparatorError::ContractViolation(format!(
                    "expected one of {} to hold the points",
                    POINT_LIST_KEYS.join(", ")
                ))
            })?,
        _ => {
            return Err(ComparatorError::ContractViolation(
                "expected an array of points".to_string(),
            ))
        }
    };

    let candidates: Vec<PointCandidate> = items
        .iter()
        .filter_map(PointCandidate::from_value)
        .collect();
    if candidates.len() < items.len() {
        debug!(
            "Dropped {} malformed point candidates",
            items.len() - candidates.len()
        );
    }
    Ok(candidates)
}

/// Sorts points ascending; a later point at an already seen timestamp replaces the earlier one.
pub fn deduplicate(points: impl IntoIterator<Item = TrendPoint>) -> Vec<TrendPoint> {
    let mut by_date: BTreeMap<NaiveDate, TrendPoint> = BTreeMap::new();
    for point in points {
        by_date.insert(point.timestamp, point);
    }
    by_date.into_values().collect()
}

fn mean_confidence(points: &[TrendPoint]) -> f64 {
    if points.is_empty() {
        0.0
    } else {
        points.iter().map(|p| p.confidence).sum::<f64>() / points.len() as f64
    }
}

/// Overall movement between the first and last numeric value of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    /// More than 2% up or down is movement; anything else, or no base to compare to, is stable.
    pub fn from_change_percent(change_percent: Option<f64>) -> Self {
        match change_percent {
            Some(p) if p > DIRECTION_THRESHOLD_PERCENT => TrendDirection::Increasing,
            Some(p) if p < -DIRECTION_THRESHOLD_PERCENT => TrendDirection::Decreasing,
            _ => TrendDirection::Stable,
        }
    }
}

/// Statistics over the numeric values of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub numeric_points: usize,
    pub start_value: Option<f64>,
    pub end_value: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub average: Option<f64>,
    /// `end_value - start_value`.
    pub total_change: Option<f64>,
    /// `total_change` relative to `start_value`, in percent. `None` when the start is zero.
    pub change_percent: Option<f64>,
    pub direction: TrendDirection,
    /// Consecutive numeric points whose values differ by at least 0.1.
    pub change_points: usize,
}

impl TrendSeries {
    pub fn summary(&self) -> TrendSummary {
        let values: Vec<f64> = self
            .points
            .iter()
            .filter_map(|p| parse_magnitude(&p.value))
            .collect();

        let start_value = values.first().copied();
        let end_value = values.last().copied();
        let min_value = values.iter().copied().reduce(f64::min);
        let max_value = values.iter().copied().reduce(f64::max);
        let average =
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
        let change_points = values
            .windows(2)
            .filter(|w| (w[1] - w[0]).abs() >= CHANGE_POINT_THRESHOLD)
            .count();
        let total_change = start_value.zip(end_value).map(|(s, e)| e - s);
        let change_percent = start_value
            .zip(total_change)
            .filter(|(s, _)| *s != 0.0)
            .map(|(s, change)| change / s.abs() * 100.0);

        TrendSummary {
            numeric_points: values.len(),
            start_value,
            end_value,
            min_value,
            max_value,
            average,
            total_change,
            change_percent,
            direction: TrendDirection::from_change_percent(change_percent),
            change_points,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin == TrendOrigin::Synthetic
    }
}

/// Rebuilds the history of one field from search snippets.
///
/// The series is never empty: any failure after input validation produces a synthetic series.
pub struct TrendReconstructor<'a> {
    table: &'a FieldMappingTable,
    config: &'a TrendConfig,
    search: Option<&'a dyn SearchProvider>,
    extractor: Option<&'a dyn ExtractionService>,
}

impl<'a> TrendReconstructor<'a> {
    pub fn new(table: &'a FieldMappingTable, config: &'a TrendConfig) -> Self {
        Self {
            table,
            config,
            search: None,
            extractor: None,
        }
    }

    pub fn with_search(mut self, search: &'a dyn SearchProvider) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_extractor(mut self, extractor: &'a dyn ExtractionService) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Only input errors are returned: blank entity, unknown field, or a window that is too
    /// short or inverted.
    pub async fn reconstruct(
        &self,
        entity: &str,
        product_type: ProductType,
        field: &str,
        window: TrendWindow,
    ) -> Result<TrendSeries> {
        if entity.trim().is_empty() {
            return Err(ComparatorError::invalid_input(
                "entity",
                "entity name must not be blank",
            ));
        }
        let spec = self.table.field(product_type, field)?;
        let window = TrendWindow::new(window.start, window.end)?;

        let attempt = self
            .reconstructed_points(entity, product_type, spec, window)
            .await;
        let (points, origin) = match attempt {
            Ok(points) if !points.is_empty() => (points, TrendOrigin::Reconstructed),
            Ok(_) => {
                warn!(
                    "{} {} {}: no points in {}, using synthetic series",
                    entity,
                    product_type,
                    field,
                    window.label()
                );
                (
                    self.synthetic(entity, product_type, spec, window),
                    TrendOrigin::Synthetic,
                )
            }
            Err(e) => {
                warn!(
                    "{} {} {}: reconstruction failed ({}), using synthetic series",
                    entity, product_type, field, e
                );
                (
                    self.synthetic(entity, product_type, spec, window),
                    TrendOrigin::Synthetic,
                )
            }
        };

        let confidence = mean_confidence(&points);
        info!(
            "{} {} {}: {} points over {}, {:?}, confidence {:.2}",
            entity,
            product_type,
            field,
            points.len(),
            window.label(),
            origin,
            confidence
        );

        Ok(TrendSeries {
            entity: entity.to_string(),
            product_type,
            field: field.to_string(),
            window,
            points,
            origin,
            confidence,
        })
    }

    /// Window preset relative to `today`.
    pub async fn reconstruct_period(
        &self,
        entity: &str,
        product_type: ProductType,
        field: &str,
        period: TrendPeriod,
        today: NaiveDate,
    ) -> Result<TrendSeries> {
        let window = period.window(today)?;
        self.reconstruct(entity, product_type, field, window).await
    }

    fn synthetic(
        &self,
        entity: &str,
        product_type: ProductType,
        spec: &FieldSpec,
        window: TrendWindow,
    ) -> Vec<TrendPoint> {
        synthetic_series(self.table.schema(product_type), spec, entity, window, self.config)
    }

    async fn reconstructed_points(
        &self,
        entity: &str,
        product_type: ProductType,
        spec: &FieldSpec,
        window: TrendWindow,
    ) -> Result<Vec<TrendPoint>> {
        let search = self.search.ok_or_else(|| ComparatorError::AcquisitionFailed {
            stage: "trend_search".to_string(),
            details: "no search provider configured".to_string(),
        })?;

        let query = SearchQuery::history(entity, product_type, &spec.label, window);
        let hits = with_deadline(
            "trend search",
            self.config.search_timeout(),
            search.search(&query),
        )
        .await?;
        debug!("{} {}: {} history hits", entity, spec.name, hits.len());
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let Some(extractor) = self.extractor else {
            debug!(
                "{} {}: no extraction service, reading rates from snippets",
                entity, spec.name
            );
            return Ok(self.snippet_points(spec, window, &hits));
        };

        let request = ExtractionRequest {
            task: ExtractionTask::TrendPoints,
            product_type,
            target_entities: vec![entity.to_string()],
            raw_payloads: hits
                .iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<Vec<Value>>>()?,
            instructions: format!(
                "Найди во фрагментах все изменения параметра «{}» продукта «{}» банка {} \
                 за период {}. Для каждого изменения укажи дату, новое значение, причину, \
                 уверенность от 0 до 1 и адрес источника.",
                spec.label,
                product_type.display_name(),
                entity,
                window.label()
            ),
            output_contract: contract_schema::<TrendPointsContract>()?,
        };
        let response = with_deadline(
            "trend extraction",
            self.config.extraction_timeout(),
            extractor.extract(&request),
        )
        .await?;

        let candidates = parse_candidates(&response)?;
        let points = candidates
            .into_iter()
            .filter_map(|candidate| self.score(candidate, spec, window, &hits));
        Ok(deduplicate(points))
    }

    /// Reads the first `12,5%`-style rate of each dated snippet inside the window.
    ///
    /// Only percentage fields can be read this way; other fields yield no points.
    fn snippet_points(
        &self,
        spec: &FieldSpec,
        window: TrendWindow,
        hits: &[SearchHit],
    ) -> Vec<TrendPoint> {
        if !matches!(spec.format, FieldFormat::Percent | FieldFormat::SharePercent) {
            return Vec::new();
        }
        let points = hits.iter().filter_map(|hit| {
            let timestamp = hit.published_date.filter(|date| window.contains(*date))?;
            let captures = snippet_rate_re().captures(&hit.snippet_text)?;
            let rate = format!("{}%", captures[1].replace(',', "."));
            let value = format_value(spec.format, &Value::String(rate))?;
            Some(TrendPoint {
                timestamp,
                value,
                reason: SNIPPET_REASON.to_string(),
                confidence: self.config.default_point_confidence,
                source: Some(hit.source_url.clone()),
            })
        });
        deduplicate(points)
    }

    fn score(
        &self,
        candidate: PointCandidate,
        spec: &FieldSpec,
        window: TrendWindow,
        hits: &[SearchHit],
    ) -> Option<TrendPoint> {
        let Some(timestamp) = parse_point_date(&candidate.date) else {
            debug!("Dropping point with unreadable date '{}'", candidate.date);
            return None;
        };
        if !window.contains(timestamp) {
            debug!("Dropping point at {} outside {}", timestamp, window.label());
            return None;
        }
        let value = format_value(spec.format, &candidate.value)?;

        let corroborated = hits.iter().any(|hit| {
            let near = hit.published_date.is_some_and(|published| {
                (published - timestamp).num_days().abs() <= self.config.corroboration_days
            });
            let cited = candidate.source.as_deref() == Some(hit.source_url.as_str());
            near || cited
        });
        let base = candidate
            .confidence
            .unwrap_or(self.config.default_point_confidence)
            .clamp(0.0, 1.0);
        let confidence = if corroborated {
            (base + self.config.corroboration_bonus).min(1.0)
        } else {
            base
        };

        Some(TrendPoint {
            timestamp,
            value,
            reason: candidate.reason,
            confidence,
            source: candidate.source,
        })
    }
}
