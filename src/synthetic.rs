use crate::config::TrendConfig;
use crate::field_mapping::{FieldSpec, ProductSchema};
use crate::normalizer::format_value;
use crate::schema::{RawRecord, TrendPoint, TrendWindow, NO_DATA};
use crate::utils::stable_seed;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde_json::Value;

const SYNTHETIC_REASON: &str = "Синтетическая точка: сведения об изменениях не найдены";

/// Placeholder record built from the product's static defaults. Always succeeds.
pub fn synthetic_record(schema: &ProductSchema, entity: &str) -> RawRecord {
    let mut record = schema.synthetic_defaults().clone();
    if schema.field("product_name").is_some() {
        record.insert(
            "product_name".to_string(),
            Value::String(format!(
                "{} ({})",
                schema.product_type.display_name(),
                entity
            )),
        );
    }
    record
}

/// Evenly spaced placeholder points across `window`, jittered around the configured default.
///
/// The jitter is seeded from the entity, product and field, so the same request always yields
/// the same series. Fields without a numeric default get the sentinel as their value.
pub fn synthetic_series(
    schema: &ProductSchema,
    spec: &FieldSpec,
    entity: &str,
    window: TrendWindow,
    config: &TrendConfig,
) -> Vec<TrendPoint> {
    let base = schema
        .synthetic_defaults()
        .get(&spec.name)
        .and_then(Value::as_f64);

    let mut rng = StdRng::seed_from_u64(stable_seed(&[
        entity,
        schema.product_type.id(),
        &spec.name,
    ]));
    let noise = config.synthetic_noise;

    let points: Vec<TrendPoint> = window
        .evenly_spaced(config.synthetic_points)
        .into_iter()
        .map(|timestamp| {
            let value = match base {
                Some(base) => {
                    let mut val = base;
                    if noise > 0.0 {
                        if let Ok(normal) = Normal::new(0.0, noise) {
                            val *= 1.0 + normal.sample(&mut rng);
                        }
                    }
                    let rounded = (val * 10_000.0).round() / 10_000.0;
                    serde_json::Number::from_f64(rounded)
                        .and_then(|n| format_value(spec.format, &Value::Number(n)))
                        .unwrap_or_else(|| NO_DATA.to_string())
                }
                None => NO_DATA.to_string(),
            };
            TrendPoint {
                timestamp,
                value,
                reason: SYNTHETIC_REASON.to_string(),
                confidence: config.synthetic_confidence,
                source: None,
            }
        })
        .collect();

    debug!(
        "Generated {} synthetic {} points for {} over {}",
        points.len(),
        spec.name,
        entity,
        window.label()
    );

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_mapping::FieldMappingTable;
    use crate::schema::ProductType;
    use chrono::NaiveDate;

    fn window() -> TrendWindow {
        TrendWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_synthetic_record_uses_defaults() {
        let table = FieldMappingTable::builtin().unwrap();
        let record = synthetic_record(table.schema(ProductType::CreditCard), "BankX");
        assert_eq!(record["interest_rate"], serde_json::json!(25.0));
        assert_eq!(record["grace_period"], serde_json::json!(120));
        assert!(record["product_name"].as_str().unwrap().contains("BankX"));
    }

    #[test]
    fn test_synthetic_series_is_deterministic() {
        let table = FieldMappingTable::builtin().unwrap();
        let schema = table.schema(ProductType::Deposit);
        let spec = schema.field("interest_rate").unwrap();
        let config = TrendConfig::default();

        let first = synthetic_series(schema, spec, "Sber", window(), &config);
        let second = synthetic_series(schema, spec, "Sber", window(), &config);
        assert_eq!(first, second);
        assert_eq!(first.len(), config.synthetic_points);
        assert_eq!(first[0].timestamp, window().start);
        assert_eq!(first.last().unwrap().timestamp, window().end);
        assert!(first.iter().all(|p| p.confidence == 0.3 && p.value.ends_with('%')));
    }

    #[test]
    fn test_field_without_default_gets_sentinel() {
        let table = FieldMappingTable::builtin().unwrap();
        let schema = table.schema(ProductType::ConsumerLoan);
        let spec = schema.field("approval_time").unwrap();
        let points = synthetic_series(schema, spec, "VTB", window(), &TrendConfig::default());
        assert_eq!(points.len(), 5);
        assert!(points.iter().all(|p| p.value == NO_DATA));
    }
}
