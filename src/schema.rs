use crate::error::{ComparatorError, Result};
use chrono::{Datelike, Duration, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Display marker for a canonical field with no data behind it.
pub const NO_DATA: &str = "Н/Д";

/// Shortest trend window accepted from callers, in days.
pub const MIN_WINDOW_DAYS: i64 = 30;

/// A record exactly as a source produced it. Any shape, any spelling.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    #[schemars(description = "Credit card with a revolving limit and usually a grace period")]
    CreditCard,
    #[schemars(description = "Debit card tied to a current account")]
    DebitCard,
    #[schemars(description = "Term or savings deposit")]
    Deposit,
    #[schemars(description = "Unsecured consumer loan")]
    ConsumerLoan,
}

impl ProductType {
    pub const ALL: [ProductType; 4] = [
        ProductType::CreditCard,
        ProductType::DebitCard,
        ProductType::Deposit,
        ProductType::ConsumerLoan,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ProductType::CreditCard => "credit_card",
            ProductType::DebitCard => "debit_card",
            ProductType::Deposit => "deposit",
            ProductType::ConsumerLoan => "consumer_loan",
        }
    }

    /// Human-readable name in the language of the source data.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProductType::CreditCard => "кредитная карта",
            ProductType::DebitCard => "дебетовая карта",
            ProductType::Deposit => "вклад",
            ProductType::ConsumerLoan => "потребительский кредит",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProductType {
    type Err = ComparatorError;

    fn from_str(s: &str) -> Result<Self> {
        let key = crate::utils::key_form(s);
        ProductType::ALL
            .into_iter()
            .find(|p| p.id() == key)
            .ok_or_else(|| ComparatorError::UnknownProductType(s.to_string()))
    }
}

/// How a canonical field's value is rendered for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    /// Percentage with a trailing `%` (`9.9%`, `9.8-49.8%`, `до 10%`)
    Percent,
    /// Like `Percent`, but bare JSON numbers in (0, 1) are shares (`0.03` is `3%`)
    SharePercent,
    /// Money amount, spaces between thousands and a trailing `₽`
    Currency,
    /// Number of days (`120 дней`)
    Days,
    /// Number of months (`12 мес.`)
    Months,
    /// Yes/no flag (`Да` / `Нет`)
    Flag,
    /// Free text, trimmed
    Text,
}

impl FieldFormat {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, FieldFormat::Flag | FieldFormat::Text)
    }

    pub fn is_rate(&self) -> bool {
        matches!(self, FieldFormat::Percent | FieldFormat::SharePercent)
    }
}

/// Which direction of a parsed magnitude wins a comparison row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolarity {
    LowerIsBetter,
    HigherIsBetter,
    NotComparable,
}

/// A canonical field's value after normalization: a display string or the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum FieldValue {
    Value(String),
    NoData,
}

impl FieldValue {
    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Value(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Value(v) => Some(v),
            FieldValue::NoData => None,
        }
    }

    pub fn display(&self) -> &str {
        self.as_str().unwrap_or(NO_DATA)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::Value).unwrap_or(FieldValue::NoData)
    }
}

impl From<FieldValue> for Option<String> {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Value(v) => Some(v),
            FieldValue::NoData => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

/// One entity's product resolved onto the canonical schema of its product type.
///
/// Holds exactly one entry per required field; fields nobody reported are `NoData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub owner_name: String,
    pub product_type: ProductType,
    pub values: BTreeMap<String, FieldValue>,
}

impl NormalizedRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Display string for a field, the sentinel when missing or unknown.
    pub fn display(&self, field: &str) -> &str {
        self.values.get(field).map(FieldValue::display).unwrap_or(NO_DATA)
    }

    pub fn present_count(&self) -> usize {
        self.values.values().filter(|v| v.is_present()).count()
    }

    /// Re-emits the populated fields keyed by canonical name, so the record can be fed
    /// back through the normalizer.
    pub fn to_raw(&self) -> RawRecord {
        self.values
            .iter()
            .filter_map(|(field, value)| {
                value
                    .as_str()
                    .map(|v| (field.clone(), serde_json::Value::String(v.to_string())))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Advisory messages, one per problem, naming the field and the entity.
    pub issues: Vec<String>,
    /// Share of required fields carrying real data, in [0, 1].
    pub completeness: f64,
    /// Canonical names of required fields without data.
    pub missing_fields: Vec<String>,
    pub format_violations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMethod {
    Deterministic,
    Assisted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    /// Canonical field name (deterministic) or the parameter name the model chose (assisted).
    pub parameter: String,
    pub label: String,
    /// Display values, indexed like `ComparisonResult::entities`.
    pub values: Vec<String>,
    pub best_entity_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub product_type: ProductType,
    /// Entity names; the first one is the reference.
    pub entities: Vec<String>,
    pub rows: Vec<ComparisonRow>,
    pub insights: Vec<String>,
    pub reference_advantages: Vec<String>,
    pub competitor_highlights: BTreeMap<String, Vec<String>>,
    pub recommendation: String,
    pub method: ComparisonMethod,
}

impl ComparisonResult {
    pub fn reference(&self) -> Option<&str> {
        self.entities.first().map(String::as_str)
    }

    pub fn row(&self, parameter: &str) -> Option<&ComparisonRow> {
        self.rows.iter().find(|r| r.parameter == parameter)
    }

    /// Number of rows won by the entity at `index`.
    pub fn wins_for(&self, index: usize) -> usize {
        self.rows
            .iter()
            .filter(|r| r.best_entity_index == Some(index))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    /// Structured listing fetched from the entity's own site
    DirectSite,
    /// Extracted from search snippets about the entity's current terms
    SearchDerived,
    /// Produced by the extraction service from whatever text was available
    ModelDerived,
    /// Placeholder generated from static configuration
    Synthetic,
}

/// Stages of the acquisition chain, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionStage {
    DirectFetch,
    SearchDerived,
    ModelDerived,
    Synthetic,
}

impl AcquisitionStage {
    pub const ORDER: [AcquisitionStage; 4] = [
        AcquisitionStage::DirectFetch,
        AcquisitionStage::SearchDerived,
        AcquisitionStage::ModelDerived,
        AcquisitionStage::Synthetic,
    ];

    pub fn origin(&self) -> DataOrigin {
        match self {
            AcquisitionStage::DirectFetch => DataOrigin::DirectSite,
            AcquisitionStage::SearchDerived => DataOrigin::SearchDerived,
            AcquisitionStage::ModelDerived => DataOrigin::ModelDerived,
            AcquisitionStage::Synthetic => DataOrigin::Synthetic,
        }
    }
}

impl fmt::Display for AcquisitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionStage::DirectFetch => "direct_fetch",
            AcquisitionStage::SearchDerived => "search_derived",
            AcquisitionStage::ModelDerived => "model_derived",
            AcquisitionStage::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: AcquisitionStage,
    pub reason: String,
}

/// A raw record together with where it came from and how far it can be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedRecord {
    pub entity: String,
    pub product_type: ProductType,
    pub record: RawRecord,
    pub origin: DataOrigin,
    pub confidence: f64,
    /// Stages tried before the one that produced `record`, with their failure reasons.
    pub failed_stages: Vec<StageFailure>,
}

/// Closed date interval a trend is reconstructed over.
///
/// Deserialization goes through [`TrendWindow::new`], so a parsed window obeys the same rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct TrendWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Deserialize)]
struct RawWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawWindow> for TrendWindow {
    type Error = ComparatorError;

    fn try_from(raw: RawWindow) -> Result<Self> {
        TrendWindow::new(raw.start, raw.end)
    }
}

impl TrendWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            return Err(ComparatorError::invalid_input(
                "window",
                format!("end {} must be after start {}", end, start),
            ));
        }
        let days = (end - start).num_days();
        if days < MIN_WINDOW_DAYS {
            return Err(ComparatorError::invalid_input(
                "window",
                format!(
                    "{} days is below the minimum granularity of {} days",
                    days, MIN_WINDOW_DAYS
                ),
            ));
        }
        Ok(Self { start, end })
    }

    /// Window ending at `end` and reaching `months` calendar months back.
    pub fn last_months(months: u32, end: NaiveDate) -> Result<Self> {
        let start = crate::utils::months_before(end, months);
        Self::new(start, end)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Up to `count` distinct dates spread evenly from `start` to `end`, both ends included.
    ///
    /// A window has one date per day, so asking for more dates than days yields every day once.
    pub fn evenly_spaced(&self, count: usize) -> Vec<NaiveDate> {
        match count {
            0 => Vec::new(),
            1 => vec![self.end],
            _ => {
                let step = self.days() as f64 / (count - 1) as f64;
                let mut dates: Vec<NaiveDate> = (0..count)
                    .map(|i| {
                        if i == count - 1 {
                            self.end
                        } else {
                            self.start + Duration::days((step * i as f64).round() as i64)
                        }
                    })
                    .collect();
                dates.dedup();
                dates
            }
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{:02}.{} - {:02}.{}",
            self.start.month(),
            self.start.year(),
            self.end.month(),
            self.end.year()
        )
    }
}

/// Named windows offered to users, relative to a reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendPeriod {
    Last3Months,
    Last6Months,
    LastYear,
}

impl TrendPeriod {
    pub fn months(&self) -> u32 {
        match self {
            TrendPeriod::Last3Months => 3,
            TrendPeriod::Last6Months => 6,
            TrendPeriod::LastYear => 12,
        }
    }

    pub fn window(&self, today: NaiveDate) -> Result<TrendWindow> {
        TrendWindow::last_months(self.months(), today)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: NaiveDate,
    pub value: String,
    pub reason: String,
    pub confidence: f64,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendOrigin {
    Reconstructed,
    Synthetic,
}

/// Time series of one field, ascending by timestamp with unique timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub entity: String,
    pub product_type: ProductType,
    pub field: String,
    pub window: TrendWindow,
    pub points: Vec<TrendPoint>,
    pub origin: TrendOrigin,
    /// Mean of the point confidences, 0 for an empty series.
    pub confidence: f64,
}
