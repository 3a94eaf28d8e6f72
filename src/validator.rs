use crate::config::ValidationConfig;
use crate::field_mapping::{FieldMappingTable, FieldSpec};
use crate::normalizer::{format_value, lookup_field, Lookup};
use crate::schema::{FieldValue, NormalizedRecord, ProductType, RawRecord, ValidationResult};
use crate::utils::{format_number, parse_numeric};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys a source uses to date its listing.
const DATE_KEYS: &[&str] = &["дата", "дата_обновления", "date", "as_of", "updated_at"];

/// How many expected spellings a missing-field issue lists.
const EXPECTED_SPELLINGS: usize = 3;

const COMMON_ISSUES: usize = 5;

/// State of one canonical field in a record under validation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldState {
    Missing,
    Blank,
    Present(String),
}

/// Anything the validator can inspect: raw source records or normalized ones.
pub trait ValidationInput {
    fn field_state(&self, spec: &FieldSpec) -> FieldState;

    /// The date the source attached to the record, if any.
    fn as_of(&self) -> Option<String> {
        None
    }
}

impl ValidationInput for RawRecord {
    fn field_state(&self, spec: &FieldSpec) -> FieldState {
        match lookup_field(self, spec) {
            Lookup::Value(value) => format_value(spec.format, value)
                .map(FieldState::Present)
                .unwrap_or(FieldState::Missing),
            Lookup::Blank => FieldState::Blank,
            Lookup::Absent => FieldState::Missing,
        }
    }

    fn as_of(&self) -> Option<String> {
        DATE_KEYS.iter().find_map(|key| match self.get(*key) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }
}

impl ValidationInput for NormalizedRecord {
    fn field_state(&self, spec: &FieldSpec) -> FieldState {
        match self.get(&spec.name) {
            Some(FieldValue::Value(v)) if v.trim().is_empty() => FieldState::Blank,
            Some(FieldValue::Value(v)) => FieldState::Present(v.clone()),
            Some(FieldValue::NoData) | None => FieldState::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityValidation {
    pub entity: String,
    pub result: ValidationResult,
}

/// Cross-entity view over one product type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub product_type: ProductType,
    /// Per-entity results in input order.
    pub entities: Vec<EntityValidation>,
    pub valid_count: usize,
    pub average_completeness: f64,
    /// Fields present for some entities and absent for others.
    pub consistency_warnings: Vec<String>,
    /// Most frequently missing canonical fields with the number of entities lacking them.
    pub common_missing_fields: Vec<(String, usize)>,
}

impl BatchReport {
    pub fn result_for(&self, entity: &str) -> Option<&ValidationResult> {
        self.entities
            .iter()
            .find(|e| e.entity == entity)
            .map(|e| &e.result)
    }

    pub fn all_valid(&self) -> bool {
        self.valid_count == self.entities.len()
    }
}

/// Advisory quality gate. Never blocks comparison and never returns an error.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    table: &'a FieldMappingTable,
    config: &'a ValidationConfig,
}

impl<'a> Validator<'a> {
    pub fn new(table: &'a FieldMappingTable, config: &'a ValidationConfig) -> Self {
        Self { table, config }
    }

    pub fn completeness_score<R>(&self, record: &R, product_type: ProductType) -> f64
    where
        R: ValidationInput + ?Sized,
    {
        let fields = self.table.schema(product_type).fields();
        let present = fields
            .iter()
            .filter(|spec| matches!(record.field_state(spec), FieldState::Present(_)))
            .count();
        present as f64 / fields.len() as f64
    }

    pub fn validate<R>(&self, record: &R, product_type: ProductType, entity: &str) -> ValidationResult
    where
        R: ValidationInput + ?Sized,
    {
        let fields = self.table.schema(product_type).fields();
        let mut issues = Vec::new();
        let mut missing_fields = Vec::new();
        let mut format_violations = 0;
        let mut present = 0;

        for spec in fields {
            match record.field_state(spec) {
                FieldState::Missing => {
                    missing_fields.push(spec.name.clone());
                    issues.push(format!(
                        "{}: отсутствует поле «{}» ({}), ожидалось одно из: {}",
                        entity,
                        spec.label,
                        spec.name,
                        spec.expected_spellings(EXPECTED_SPELLINGS).join(", ")
                    ));
                }
                FieldState::Blank => {
                    missing_fields.push(spec.name.clone());
                    format_violations += 1;
                    issues.push(format!("{}: поле «{}» пустое", entity, spec.label));
                }
                FieldState::Present(value) => {
                    present += 1;
                    if let Some(issue) = check_format(spec, &value, entity) {
                        format_violations += 1;
                        issues.push(issue);
                    }
                }
            }
        }

        if let (Some(year), Some(as_of)) = (self.config.reference_year, record.as_of()) {
            if !as_of.contains(&year.to_string()) {
                issues.push(format!(
                    "{}: данные могут быть устаревшими (дата: {}, ожидался {} год)",
                    entity, as_of, year
                ));
            }
        }

        let completeness = present as f64 / fields.len() as f64;
        let is_valid = completeness >= self.config.min_completeness && format_violations == 0;

        if is_valid {
            debug!(
                "{} {} record valid, completeness {:.2}",
                entity, product_type, completeness
            );
        } else {
            warn!(
                "{} {} record failed validation: completeness {:.2}, {} format violations",
                entity, product_type, completeness, format_violations
            );
        }

        ValidationResult {
            is_valid,
            issues,
            completeness,
            missing_fields,
            format_violations,
        }
    }

    pub fn validate_batch<R>(
        &self,
        records: &[(String, R)],
        product_type: ProductType,
    ) -> BatchReport
    where
        R: ValidationInput,
    {
        let entities: Vec<EntityValidation> = records
            .iter()
            .map(|(entity, record)| EntityValidation {
                entity: entity.clone(),
                result: self.validate(record, product_type, entity),
            })
            .collect();

        let mut consistency_warnings = Vec::new();
        for spec in self.table.schema(product_type).fields() {
            let (with, without): (Vec<&str>, Vec<&str>) = {
                let mut with = Vec::new();
                let mut without = Vec::new();
                for (entity, record) in records {
                    match record.field_state(spec) {
                        FieldState::Present(_) => with.push(entity.as_str()),
                        FieldState::Missing | FieldState::Blank => without.push(entity.as_str()),
                    }
                }
                (with, without)
            };
            if !with.is_empty() && !without.is_empty() {
                let warning = format!(
                    "Поле «{}» ({}) есть у {}, но отсутствует у {}",
                    spec.label,
                    spec.name,
                    with.join(", "),
                    without.join(", ")
                );
                warn!("Consistency warning for {}: {}", product_type, warning);
                consistency_warnings.push(warning);
            }
        }

        let mut missing_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entity in &entities {
            for field in &entity.result.missing_fields {
                *missing_counts.entry(field.as_str()).or_default() += 1;
            }
        }
        let mut common_missing_fields: Vec<(String, usize)> = missing_counts
            .into_iter()
            .map(|(field, count)| (field.to_string(), count))
            .collect();
        // Stable sort keeps alphabetical order among equal counts.
        common_missing_fields.sort_by(|a, b| b.1.cmp(&a.1));
        common_missing_fields.truncate(COMMON_ISSUES);

        let valid_count = entities.iter().filter(|e| e.result.is_valid).count();
        let average_completeness = if entities.is_empty() {
            0.0
        } else {
            entities.iter().map(|e| e.result.completeness).sum::<f64>() / entities.len() as f64
        };

        debug!(
            "Validated {} {} records: {} valid, average completeness {:.2}",
            entities.len(),
            product_type,
            valid_count,
            average_completeness
        );

        BatchReport {
            product_type,
            entities,
            valid_count,
            average_completeness,
            consistency_warnings,
            common_missing_fields,
        }
    }
}

fn check_format(spec: &FieldSpec, value: &str, entity: &str) -> Option<String> {
    let parsed = parse_numeric(value);

    if spec.format.is_rate() && parsed.is_none() {
        return Some(format!(
            "{}: поле «{}» содержит «{}», ожидалось числовое значение в процентах",
            entity, spec.label, value
        ));
    }

    let (min, max) = spec.plausible_range?;
    let outside = parsed?
        .values()
        .into_iter()
        .any(|v| !spec.is_plausible(v));
    outside.then(|| {
        format!(
            "{}: значение «{}» поля «{}» вне допустимого диапазона от {} до {}",
            entity,
            value,
            spec.label,
            format_number(min),
            format_number(max)
        )
    })
}
