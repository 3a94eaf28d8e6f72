use crate::error::{ComparatorError, Result};
use crate::schema::{DataOrigin, FieldFormat, FieldPolarity, ProductType, MIN_WINDOW_DAYS};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BUILTIN_FIELD_MAPPINGS: &str = include_str!("../config/field_mappings.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Canonical name, e.g. `interest_rate`
    pub name: String,
    /// Display label shown next to values
    pub label: String,
    pub format: FieldFormat,
    /// Source spellings in resolution order. `a.b` reaches one level into a nested object.
    #[serde(default)]
    pub aliases: Vec<String>,
    pub product_types: Vec<ProductType>,
    /// Inclusive `[min, max]` for numeric values; anything outside is a format violation.
    #[serde(default)]
    pub plausible_range: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductField {
    pub field: String,
    pub polarity: FieldPolarity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub product_type: ProductType,
    /// Required fields in display order. This is also the comparison row order.
    pub required_fields: Vec<ProductField>,
    /// Values used for placeholder records, keyed by canonical field.
    #[serde(default)]
    pub synthetic_defaults: serde_json::Map<String, serde_json::Value>,
}

/// Static field/alias/product tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub fields: Vec<FieldDefinition>,
    pub products: Vec<ProductDefinition>,
}

impl MappingConfig {
    /// The table shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_FIELD_MAPPINGS)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MappingConfig = serde_json::from_str(json).map_err(|e| {
            ComparatorError::InvalidConfig(format!("field mapping table: {}", e))
        })?;
        debug!(
            "Parsed mapping config with {} fields and {} products",
            config.fields.len(),
            config.products.len()
        );
        Ok(config)
    }
}

/// Inclusive confidence band for one data origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRange {
    pub min: f64,
    pub max: f64,
}

impl ConfidenceRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub const fn fixed(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    /// Point inside the band; `fraction` is clamped to [0, 1].
    pub fn at(&self, fraction: f64) -> f64 {
        self.min + (self.max - self.min) * fraction.clamp(0.0, 1.0)
    }

    fn check(&self, name: &str) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.min) || !in_unit(self.max) || self.min > self.max {
            return Err(ComparatorError::InvalidConfig(format!(
                "confidence range '{}' [{}, {}] must satisfy 0 <= min <= max <= 1",
                name, self.min, self.max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Records below this completeness are reported invalid.
    pub min_completeness: f64,
    /// Year a record's date field must mention to count as fresh. `None` skips the check.
    pub reference_year: Option<i32>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_completeness: 0.6,
            reference_year: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    pub max_insights: usize,
    pub assisted_timeout_secs: u64,
}

impl ComparisonConfig {
    pub fn insight_count(&self) -> usize {
        self.max_insights.clamp(4, 6)
    }

    pub fn assisted_timeout(&self) -> Duration {
        Duration::from_secs(self.assisted_timeout_secs)
    }
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            max_insights: 5,
            assisted_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub direct_fetch_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub extraction_timeout_secs: u64,
    pub direct_site_confidence: ConfidenceRange,
    pub search_derived_confidence: ConfidenceRange,
    pub model_derived_confidence: ConfidenceRange,
    pub synthetic_confidence: f64,
    /// Source text shorter than this makes a model-derived record "thin".
    pub thin_text_chars: usize,
    /// Snippets shorter than this are not usable.
    pub min_snippet_chars: usize,
    pub max_snippets: usize,
}

impl AcquisitionConfig {
    pub fn direct_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_fetch_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn confidence_range(&self, origin: DataOrigin) -> ConfidenceRange {
        match origin {
            DataOrigin::DirectSite => self.direct_site_confidence,
            DataOrigin::SearchDerived => self.search_derived_confidence,
            DataOrigin::ModelDerived => self.model_derived_confidence,
            DataOrigin::Synthetic => ConfidenceRange::fixed(self.synthetic_confidence),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            direct_fetch_timeout_secs: 15,
            search_timeout_secs: 20,
            extraction_timeout_secs: 30,
            direct_site_confidence: ConfidenceRange::new(0.9, 0.95),
            search_derived_confidence: ConfidenceRange::new(0.6, 0.75),
            model_derived_confidence: ConfidenceRange::new(0.5, 0.7),
            synthetic_confidence: 0.3,
            thin_text_chars: 200,
            min_snippet_chars: 20,
            max_snippets: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub search_timeout_secs: u64,
    pub extraction_timeout_secs: u64,
    /// Points in a synthetic fallback series.
    pub synthetic_points: usize,
    pub synthetic_confidence: f64,
    /// Relative standard deviation of the jitter applied to synthetic values.
    pub synthetic_noise: f64,
    /// Confidence of an extracted point when the model supplies none.
    pub default_point_confidence: f64,
    /// Added when a search hit corroborates the point.
    pub corroboration_bonus: f64,
    pub corroboration_days: i64,
}

impl TrendConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            search_timeout_secs: 30,
            extraction_timeout_secs: 30,
            synthetic_points: 5,
            synthetic_confidence: 0.3,
            synthetic_noise: 0.02,
            default_point_confidence: 0.6,
            corroboration_bonus: 0.1,
            corroboration_days: 7,
        }
    }
}

/// Tunables for one process. Every field has a default, so partial JSON is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub validation: ValidationConfig,
    pub comparison: ComparisonConfig,
    pub acquisition: AcquisitionConfig,
    pub trend: TrendConfig,
    /// Try the assisted comparison first when an extraction service is available.
    pub prefer_assisted: bool,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| ComparatorError::InvalidConfig(format!("pipeline config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.validation.min_completeness) {
            return Err(ComparatorError::InvalidConfig(format!(
                "min_completeness {} must be within [0, 1]",
                self.validation.min_completeness
            )));
        }

        let acquisition = &self.acquisition;
        let ranges = [
            ("direct_site", acquisition.direct_site_confidence),
            ("search_derived", acquisition.search_derived_confidence),
            ("model_derived", acquisition.model_derived_confidence),
            (
                "synthetic",
                ConfidenceRange::fixed(acquisition.synthetic_confidence),
            ),
        ];
        for (name, range) in &ranges {
            range.check(name)?;
        }
        // Trust must not increase further down the chain.
        for pair in ranges.windows(2) {
            let (upper_name, upper) = pair[0];
            let (lower_name, lower) = pair[1];
            if lower.min > upper.min || lower.max > upper.max {
                return Err(ComparatorError::InvalidConfig(format!(
                    "confidence for '{}' must not exceed '{}'",
                    lower_name, upper_name
                )));
            }
        }

        let trend = &self.trend;
        if trend.synthetic_points < 2 {
            return Err(ComparatorError::InvalidConfig(
                "trend.synthetic_points must be at least 2 to cover a window".to_string(),
            ));
        }
        let max_points = MIN_WINDOW_DAYS as usize + 1;
        if trend.synthetic_points > max_points {
            return Err(ComparatorError::InvalidConfig(format!(
                "trend.synthetic_points {} exceeds {}, the days in the shortest window",
                trend.synthetic_points, max_points
            )));
        }
        ConfidenceRange::fixed(trend.synthetic_confidence).check("trend.synthetic")?;
        ConfidenceRange::fixed(trend.default_point_confidence).check("trend.default_point")?;
        if trend.synthetic_noise < 0.0 || trend.synthetic_noise > 1.0 {
            return Err(ComparatorError::InvalidConfig(format!(
                "trend.synthetic_noise {} must be between 0.0 and 1.0",
                trend.synthetic_noise
            )));
        }

        Ok(())
    }
}
