use crate::config::ComparisonConfig;
use crate::error::{ComparatorError, Result};
use crate::field_mapping::{FieldMappingTable, FieldSpec};
use crate::schema::{
    ComparisonMethod, ComparisonResult, ComparisonRow, FieldPolarity, NormalizedRecord,
    ProductType,
};
use crate::utils::parse_magnitude;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

const POSITIVE: &str = "✓";
const WARNING: &str = "⚠️";

/// Two magnitudes closer than this are a tie.
const TIE_EPSILON: f64 = 1e-9;

/// Index of the single best value, `None` for ties, fewer than two numbers, or fields that
/// do not rank.
pub fn pick_winner(polarity: FieldPolarity, values: &[String]) -> Option<usize> {
    let better = |a: f64, b: f64| match polarity {
        FieldPolarity::LowerIsBetter => a < b,
        FieldPolarity::HigherIsBetter => a > b,
        FieldPolarity::NotComparable => false,
    };
    if polarity == FieldPolarity::NotComparable {
        return None;
    }

    let parsed: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| parse_magnitude(v).map(|m| (i, m)))
        .collect();
    if parsed.len() < 2 {
        return None;
    }

    let mut best = parsed[0];
    for &candidate in &parsed[1..] {
        if better(candidate.1, best.1) {
            best = candidate;
        }
    }
    let tied = parsed
        .iter()
        .filter(|(_, m)| (m - best.1).abs() < TIE_EPSILON)
        .count();
    (tied == 1).then_some(best.0)
}

/// Insight candidate: a decided row where the reference and at least one competitor parse.
struct Gap<'r> {
    row: &'r ComparisonRow,
    relative: f64,
    competitor: usize,
}

/// Rule-based comparison of normalized records. Always available, never consults a model.
#[derive(Debug, Clone, Copy)]
pub struct DeterministicComparator<'a> {
    table: &'a FieldMappingTable,
    config: &'a ComparisonConfig,
}

impl<'a> DeterministicComparator<'a> {
    pub fn new(table: &'a FieldMappingTable, config: &'a ComparisonConfig) -> Self {
        Self { table, config }
    }

    /// Compares 2..N records; the first one is the reference.
    pub fn compare(
        &self,
        entities: &[(String, NormalizedRecord)],
        product_type: ProductType,
    ) -> Result<ComparisonResult> {
        check_entities(entities.iter().map(|(name, _)| name.as_str()))?;
        if let Some((name, record)) = entities
            .iter()
            .find(|(_, record)| record.product_type != product_type)
        {
            return Err(ComparatorError::invalid_input(
                "entities",
                format!(
                    "record for '{}' is a {}, expected {}",
                    name, record.product_type, product_type
                ),
            ));
        }

        let schema = self.table.schema(product_type);
        let names: Vec<String> = entities.iter().map(|(name, _)| name.clone()).collect();

        let rows: Vec<ComparisonRow> = schema
            .fields()
            .iter()
            .map(|spec| build_row(spec, entities))
            .collect();

        let insights = self.insights(schema.fields(), &rows, &names);

        let mut reference_advantages = Vec::new();
        let mut competitor_highlights: BTreeMap<String, Vec<String>> = names[1..]
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        for row in &rows {
            match row.best_entity_index {
                Some(0) => reference_advantages.push(bullet(row, 0)),
                Some(index) => {
                    if let Some(list) = competitor_highlights.get_mut(&names[index]) {
                        list.push(bullet(row, index));
                    }
                }
                None => {}
            }
        }

        let reference_wins = rows.iter().filter(|r| r.best_entity_index == Some(0)).count();
        let decided = rows.iter().filter(|r| r.best_entity_index.is_some()).count();
        let recommendation = recommendation(&names[0], reference_wins, decided - reference_wins);

        info!(
            "Deterministic comparison of {} {} offers: {} rows, {} decided, reference wins {}",
            names.len(),
            product_type,
            rows.len(),
            decided,
            reference_wins
        );

        Ok(ComparisonResult {
            product_type,
            entities: names,
            rows,
            insights,
            reference_advantages,
            competitor_highlights,
            recommendation,
            method: ComparisonMethod::Deterministic,
        })
    }

    fn insights(&self, fields: &[FieldSpec], rows: &[ComparisonRow], names: &[String]) -> Vec<String> {
        let mut gaps: Vec<Gap> = rows
            .iter()
            .zip(fields)
            .filter_map(|(row, spec)| reference_gap(row, spec.polarity))
            .collect();
        // Stable sort: equal gaps keep row order.
        gaps.sort_by(|a, b| b.relative.total_cmp(&a.relative));
        gaps.truncate(self.config.insight_count());

        debug!("Selected {} insight rows", gaps.len());

        gaps.iter()
            .map(|gap| {
                let row = gap.row;
                let reference = &names[0];
                if row.best_entity_index == Some(0) {
                    format!(
                        "{} {}: у {} лучше ({} против {} у {})",
                        POSITIVE,
                        row.label,
                        reference,
                        row.values[0],
                        row.values[gap.competitor],
                        names[gap.competitor]
                    )
                } else {
                    format!(
                        "{} {}: у {} лучше ({} против {} у {})",
                        WARNING,
                        row.label,
                        names[gap.competitor],
                        row.values[gap.competitor],
                        row.values[0],
                        reference
                    )
                }
            })
            .collect()
    }
}

/// Rejects entity lists a comparison cannot be built from.
pub(crate) fn check_entities<'n>(names: impl Iterator<Item = &'n str>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ComparatorError::invalid_input(
                "entities",
                "entity names must not be blank",
            ));
        }
        if !seen.insert(name) {
            return Err(ComparatorError::invalid_input(
                "entities",
                format!("'{}' is listed more than once", name),
            ));
        }
    }
    if seen.len() < 2 {
        return Err(ComparatorError::invalid_input(
            "entities",
            format!(
                "a comparison needs a reference and at least one competitor, got {}",
                seen.len()
            ),
        ));
    }
    Ok(())
}

fn build_row(spec: &FieldSpec, entities: &[(String, NormalizedRecord)]) -> ComparisonRow {
    let values: Vec<String> = entities
        .iter()
        .map(|(_, record)| record.display(&spec.name).to_string())
        .collect();
    let best_entity_index = pick_winner(spec.polarity, &values);
    ComparisonRow {
        parameter: spec.name.clone(),
        label: spec.label.clone(),
        values,
        best_entity_index,
    }
}

fn reference_gap(row: &ComparisonRow, polarity: FieldPolarity) -> Option<Gap<'_>> {
    row.best_entity_index?;
    let reference = parse_magnitude(row.values.first()?)?;

    let mut best: Option<(usize, f64)> = None;
    for (index, value) in row.values.iter().enumerate().skip(1) {
        let Some(magnitude) = parse_magnitude(value) else {
            continue;
        };
        let improves = match (best, polarity) {
            (None, _) => true,
            (Some((_, current)), FieldPolarity::LowerIsBetter) => magnitude < current,
            (Some((_, current)), _) => magnitude > current,
        };
        if improves {
            best = Some((index, magnitude));
        }
    }
    let (competitor, magnitude) = best?;

    let scale = reference.abs().max(magnitude.abs());
    let relative = if scale == 0.0 {
        0.0
    } else {
        (reference - magnitude).abs() / scale
    };

    Some(Gap {
        row,
        relative,
        competitor,
    })
}

fn bullet(row: &ComparisonRow, index: usize) -> String {
    format!("• {}: {}", row.label, row.values[index])
}

fn recommendation(reference: &str, reference_wins: usize, competitor_wins: usize) -> String {
    let decided = reference_wins + competitor_wins;
    if decided == 0 {
        return format!(
            "Недостаточно сопоставимых данных, чтобы сравнить предложение {} с конкурентами.",
            reference
        );
    }
    let verdict = if reference_wins > competitor_wins {
        "предложение выглядит сильнее конкурентов"
    } else if reference_wins < competitor_wins {
        "стоит пересмотреть условия по параметрам, где лидируют конкуренты"
    } else {
        "предложения сопоставимы"
    };
    format!(
        "{} лидирует по {} из {} сравнимых параметров, конкуренты по {}: {}.",
        reference, reference_wins, decided, competitor_wins, verdict
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Normalizer;
    use crate::schema::RawRecord;
    use serde_json::json;

    fn normalized(
        table: &FieldMappingTable,
        product_type: ProductType,
        entity: &str,
        raw: serde_json::Value,
    ) -> (String, NormalizedRecord) {
        let raw: RawRecord = raw.as_object().cloned().unwrap();
        (
            entity.to_string(),
            Normalizer::new(table).normalize(&raw, product_type, entity),
        )
    }

    #[test]
    fn test_pick_winner_rules() {
        let values = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            pick_winner(FieldPolarity::LowerIsBetter, &values(&["9.9%", "17.9%"])),
            Some(0)
        );
        assert_eq!(
            pick_winner(FieldPolarity::HigherIsBetter, &values(&["9.9%", "17.9%", "Н/Д"])),
            Some(1)
        );
        assert_eq!(
            pick_winner(FieldPolarity::LowerIsBetter, &values(&["0₽", "0₽", "990₽"])),
            None
        );
        assert_eq!(
            pick_winner(FieldPolarity::HigherIsBetter, &values(&["100 дней", "Н/Д"])),
            None
        );
        assert_eq!(
            pick_winner(FieldPolarity::NotComparable, &values(&["12 мес.", "24 мес."])),
            None
        );
    }

    #[test]
    fn test_reference_wins_lower_rate() {
        let table = FieldMappingTable::builtin().unwrap();
        let config = ComparisonConfig::default();
        let comparator = DeterministicComparator::new(&table, &config);
        let entities = vec![
            normalized(&table, ProductType::CreditCard, "Sber", json!({ "ставка": "9.9%" })),
            normalized(&table, ProductType::CreditCard, "BankX", json!({ "ставка": "17.9%" })),
        ];

        let result = comparator.compare(&entities, ProductType::CreditCard).unwrap();
        let row = result.row("interest_rate").unwrap();
        assert_eq!(row.best_entity_index, Some(0));

        let insight = result
            .insights
            .iter()
            .find(|i| i.contains("17.9%"))
            .unwrap();
        assert!(insight.starts_with(POSITIVE));
        assert!(insight.contains("Sber") && insight.contains("BankX"));
        assert!(insight.contains("9.9%"));
        assert_eq!(result.reference_advantages.len(), 1);
        assert!(result.competitor_highlights["BankX"].is_empty());
        assert_eq!(result.method, ComparisonMethod::Deterministic);
    }

    #[test]
    fn test_all_missing_field_is_undecided() {
        let table = FieldMappingTable::builtin().unwrap();
        let config = ComparisonConfig::default();
        let comparator = DeterministicComparator::new(&table, &config);
        let entities = vec![
            normalized(&table, ProductType::CreditCard, "Sber", json!({ "ставка": 9.9 })),
            normalized(&table, ProductType::CreditCard, "BankX", json!({ "ставка": 17.9 })),
        ];

        let result = comparator.compare(&entities, ProductType::CreditCard).unwrap();
        let row = result.row("cashback").unwrap();
        assert_eq!(row.best_entity_index, None);
        assert!(row.values.iter().all(|v| v == crate::schema::NO_DATA));
        assert!(result.insights.iter().all(|i| !i.contains(&row.label)));
    }

    #[test]
    fn test_competitor_order_does_not_change_winners() {
        let table = FieldMappingTable::builtin().unwrap();
        let config = ComparisonConfig::default();
        let comparator = DeterministicComparator::new(&table, &config);
        let sber = normalized(
            &table,
            ProductType::Deposit,
            "Sber",
            json!({ "ставка": "16%", "мин_сумма": 1000, "максимальная_сумма": "10 млн" }),
        );
        let vtb = normalized(
            &table,
            ProductType::Deposit,
            "VTB",
            json!({ "ставка": "18%", "мин_сумма": 50000 }),
        );
        let alfa = normalized(
            &table,
            ProductType::Deposit,
            "Alfa",
            json!({ "ставка": "17%", "мин_сумма": 10000, "максимальная_сумма": 30000000 }),
        );

        let forward = comparator
            .compare(&[sber.clone(), vtb.clone(), alfa.clone()], ProductType::Deposit)
            .unwrap();
        let reversed = comparator
            .compare(&[sber, alfa, vtb], ProductType::Deposit)
            .unwrap();

        let params = |r: &ComparisonResult| r.rows.iter().map(|r| r.parameter.clone()).collect::<Vec<_>>();
        assert_eq!(params(&forward), params(&reversed));
        for (a, b) in forward.rows.iter().zip(&reversed.rows) {
            let name = |r: &ComparisonRow, res: &ComparisonResult| {
                r.best_entity_index.map(|i| res.entities[i].clone())
            };
            assert_eq!(name(a, &forward), name(b, &reversed), "{}", a.parameter);
        }
        assert_eq!(
            forward.row("interest_rate").unwrap().best_entity_index,
            Some(1)
        );
        assert_eq!(forward.row("min_amount").unwrap().best_entity_index, Some(0));
        assert_eq!(forward.competitor_highlights.len(), 2);
    }

    #[test]
    fn test_insight_count_is_capped() {
        let table = FieldMappingTable::builtin().unwrap();
        let config = ComparisonConfig {
            max_insights: 4,
            ..Default::default()
        };
        let comparator = DeterministicComparator::new(&table, &config);
        let entities = vec![
            normalized(
                &table,
                ProductType::CreditCard,
                "Sber",
                json!({ "ставка": 9.9, "грейс_период": 120, "кешбек": 0.01, "стоимость": 0,
                        "мин_зарплата": 20000, "лимит": 1000000 }),
            ),
            normalized(
                &table,
                ProductType::CreditCard,
                "BankX",
                json!({ "ставка": 17.9, "грейс_период": 100, "кешбек": 0.03, "стоимость": 990,
                        "мин_зарплата": 15000, "лимит": 700000 }),
            ),
        ];

        let result = comparator.compare(&entities, ProductType::CreditCard).unwrap();
        assert_eq!(result.insights.len(), 4);
        assert_eq!(result.wins_for(0), 4);
        assert_eq!(result.wins_for(1), 2);
        assert!(result.recommendation.contains("Sber"));
        assert!(result.recommendation.contains("4 из 6"));
    }

    #[test]
    fn test_rejects_bad_entity_lists() {
        let table = FieldMappingTable::builtin().unwrap();
        let config = ComparisonConfig::default();
        let comparator = DeterministicComparator::new(&table, &config);
        let one = vec![normalized(&table, ProductType::Deposit, "Sber", json!({}))];
        assert!(comparator
            .compare(&one, ProductType::Deposit)
            .unwrap_err()
            .is_input_error());

        let duplicated = vec![one[0].clone(), one[0].clone()];
        assert!(comparator.compare(&duplicated, ProductType::Deposit).is_err());

        let mismatched = vec![
            one[0].clone(),
            normalized(&table, ProductType::ConsumerLoan, "VTB", json!({})),
        ];
        assert!(comparator.compare(&mismatched, ProductType::Deposit).is_err());
    }
}
