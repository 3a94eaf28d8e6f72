use async_trait::async_trait;
use bank_product_comparator::assisted::AssistedExtractor;
use bank_product_comparator::validator::Validator;
use bank_product_comparator::*;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

fn raw(value: Value) -> RawRecord {
    value.as_object().cloned().unwrap()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|name| name.to_string()).collect()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct ListingFetcher {
    listings: BTreeMap<String, Value>,
}

#[async_trait]
impl DirectFetcher for ListingFetcher {
    async fn fetch(&self, entity: &str, _product_type: ProductType) -> Result<RawRecord> {
        match self.listings.get(entity) {
            Some(listing) => Ok(raw(listing.clone())),
            None => Err(ComparatorError::AcquisitionFailed {
                stage: "direct_fetch".to_string(),
                details: format!("site of {} is unreachable", entity),
            }),
        }
    }
}

struct FixedSearch {
    hits: Vec<SearchHit>,
}

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchHit>> {
        Ok(self.hits.clone())
    }
}

/// Answers each task with a canned response and remembers what it was asked.
#[derive(Default)]
struct ScriptedExtractor {
    record: Option<Value>,
    comparison: Option<Value>,
    trend: Option<Value>,
    tasks: Mutex<Vec<ExtractionTask>>,
}

#[async_trait]
impl ExtractionService for ScriptedExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Value> {
        self.tasks.lock().unwrap().push(request.task);
        let response = match request.task {
            ExtractionTask::ProductRecord => &self.record,
            ExtractionTask::Comparison => &self.comparison,
            ExtractionTask::TrendPoints => &self.trend,
        };
        response
            .clone()
            .ok_or_else(|| ComparatorError::ExtractionFailed("no scripted response".to_string()))
    }
}

fn sber_and_bankx() -> Vec<(String, RawRecord)> {
    vec![
        (
            "Sber".to_string(),
            raw(json!({"название": "СберКарта", "ставка": "9.9%", "кешбек": "Н/Д"})),
        ),
        (
            "BankX".to_string(),
            raw(json!({"name": "X-Card", "процентная_ставка": "17.9%", "кэшбэк": "Н/Д"})),
        ),
    ]
}

#[test]
fn test_reference_with_lower_rate_wins() {
    let table = FieldMappingTable::builtin().unwrap();
    let config = PipelineConfig::default();
    let normalized =
        Normalizer::new(&table).normalize_all(&sber_and_bankx(), ProductType::CreditCard);
    let result = DeterministicComparator::new(&table, &config.comparison)
        .compare(&normalized, ProductType::CreditCard)
        .unwrap();

    assert_eq!(result.row("interest_rate").unwrap().best_entity_index, Some(0));
    assert!(result.insights.iter().any(|insight| {
        insight.contains("Sber")
            && insight.contains("BankX")
            && insight.contains("9.9%")
            && insight.contains("17.9%")
    }));
}

#[test]
fn test_field_missing_everywhere_has_no_winner() {
    let table = FieldMappingTable::builtin().unwrap();
    let config = PipelineConfig::default();
    let normalized =
        Normalizer::new(&table).normalize_all(&sber_and_bankx(), ProductType::CreditCard);
    let result = DeterministicComparator::new(&table, &config.comparison)
        .compare(&normalized, ProductType::CreditCard)
        .unwrap();

    let cashback = result.row("cashback").unwrap();
    assert_eq!(cashback.best_entity_index, None);
    assert!(cashback.values.iter().all(|value| value == NO_DATA));
    assert!(!result
        .insights
        .iter()
        .any(|insight| insight.contains(&cashback.label)));
}

#[test]
fn test_rows_follow_declared_order_for_any_competitor_order() {
    let table = FieldMappingTable::builtin().unwrap();
    let config = PipelineConfig::default();
    let normalizer = Normalizer::new(&table);
    let comparator = DeterministicComparator::new(&table, &config.comparison);
    let records = vec![
        ("Альфа".to_string(), raw(json!({"ставка": "16%", "мин_сумма": 50000}))),
        ("Бета".to_string(), raw(json!({"ставка": "18%", "мин_сумма": 1000}))),
        ("Гамма".to_string(), raw(json!({"ставка": "17%", "мин_сумма": 10000}))),
    ];
    let swapped = vec![records[0].clone(), records[2].clone(), records[1].clone()];

    let first = comparator
        .compare(&normalizer.normalize_all(&records, ProductType::Deposit), ProductType::Deposit)
        .unwrap();
    let second = comparator
        .compare(&normalizer.normalize_all(&swapped, ProductType::Deposit), ProductType::Deposit)
        .unwrap();

    let declared: Vec<&str> = table.schema(ProductType::Deposit).field_names().collect();
    let first_rows: Vec<&str> = first.rows.iter().map(|row| row.parameter.as_str()).collect();
    let second_rows: Vec<&str> = second.rows.iter().map(|row| row.parameter.as_str()).collect();
    assert_eq!(first_rows, declared);
    assert_eq!(second_rows, declared);

    for (a, b) in first.rows.iter().zip(&second.rows) {
        let winner_a = a.best_entity_index.map(|i| first.entities[i].clone());
        let winner_b = b.best_entity_index.map(|i| second.entities[i].clone());
        assert_eq!(winner_a, winner_b, "{}", a.parameter);
    }
    assert_eq!(
        first.row("interest_rate").unwrap().best_entity_index,
        Some(1)
    );
}

#[test]
fn test_alias_spellings_normalize_identically() {
    let table = FieldMappingTable::builtin().unwrap();
    let normalizer = Normalizer::new(&table);
    let aliases = table
        .resolve(ProductType::CreditCard, "grace_period")
        .unwrap()
        .to_vec();
    assert!(aliases.len() > 2);

    for alias in aliases {
        let record = match alias.split_once('.') {
            Some((parent, child)) => raw(json!({ parent: { child: "120 дней" } })),
            None => raw(json!({ alias.as_str(): "120 дней" })),
        };
        let normalized = normalizer.normalize(&record, ProductType::CreditCard, "Sber");
        assert_eq!(normalized.display("grace_period"), "120 дней", "alias {}", alias);
    }
}

#[test]
fn test_completeness_bounds() {
    let table = FieldMappingTable::builtin().unwrap();
    let config = PipelineConfig::default();
    let validator = Validator::new(&table, &config.validation);
    let normalizer = Normalizer::new(&table);

    let full = normalizer.normalize(
        &raw(json!({
            "название": "Вклад Лучший",
            "ставка": "18%",
            "срок": 12,
            "минимальная_сумма": 50000,
            "максимальная_сумма": "50 млн",
            "пополнение": true,
            "досрочное_снятие": false,
            "страхование": "Да"
        })),
        ProductType::Deposit,
        "ВТБ",
    );
    let empty = normalizer.normalize(&RawRecord::new(), ProductType::Deposit, "ВТБ");

    assert_eq!(validator.completeness_score(&full, ProductType::Deposit), 1.0);
    assert_eq!(validator.completeness_score(&empty, ProductType::Deposit), 0.0);
}

#[test]
fn test_batch_flags_entity_missing_a_field_others_have() {
    let table = FieldMappingTable::builtin().unwrap();
    let config = PipelineConfig::default();
    let validator = Validator::new(&table, &config.validation);
    let records = vec![
        (
            "Alpha".to_string(),
            raw(json!({"ставка": "20%", "грейс_период": 120, "кешбек": 0.05})),
        ),
        (
            "Beta".to_string(),
            raw(json!({"ставка": "25%", "льготный_период": "55 дней", "кешбек": "1%"})),
        ),
        ("Gamma".to_string(), raw(json!({"ставка": "30%", "кешбек": "2%"}))),
    ];

    let report = validator.validate_batch(&records, ProductType::CreditCard);

    assert!(report.consistency_warnings.iter().any(|warning| {
        warning.contains("grace_period") && warning.contains("Gamma")
    }));
    for (entity, record) in &records[..2] {
        let alone = validator.validate(record, ProductType::CreditCard, entity);
        assert_eq!(report.result_for(entity).unwrap().is_valid, alone.is_valid);
    }
    assert!(report
        .result_for("Gamma")
        .unwrap()
        .missing_fields
        .contains(&"grace_period".to_string()));
}

#[tokio::test]
async fn test_assisted_without_recommendation_matches_deterministic() {
    let table = FieldMappingTable::builtin().unwrap();
    let config = PipelineConfig::default();
    let records = sber_and_bankx();
    let extractor = ScriptedExtractor {
        comparison: Some(json!({
            "parameters": [{
                "name": "Процентная ставка",
                "values": {"Sber": "9.9%", "BankX": "17.9%"},
                "best_entity": "Sber"
            }],
            "insights": ["✓ Ставка ниже у Sber"],
            "reference_advantages": ["Процентная ставка"],
            "competitor_highlights": {"BankX": []}
        })),
        ..Default::default()
    };

    let assisted = AssistedExtractor::new(&table, &config.comparison)
        .with_extractor(&extractor)
        .compare_assisted(&records, ProductType::CreditCard)
        .await
        .unwrap();
    let direct = DeterministicComparator::new(&table, &config.comparison)
        .compare(
            &Normalizer::new(&table).normalize_all(&records, ProductType::CreditCard),
            ProductType::CreditCard,
        )
        .unwrap();

    assert_eq!(assisted.method, ComparisonMethod::Deterministic);
    assert_eq!(assisted, direct);
    assert_eq!(*extractor.tasks.lock().unwrap(), vec![ExtractionTask::Comparison]);
}

#[tokio::test]
async fn test_workflow_prefers_assisted_comparison() {
    let extractor = ScriptedExtractor {
        comparison: Some(json!({
            "parameters": [
                {"name": "Процентная ставка", "values": {"Sber": "9.9%", "BankX": 17.9}, "best_entity": "Sber"},
                {"name": "Кешбэк", "values": {"Sber": "Н/Д", "BankX": "Н/Д"}, "best_entity": null}
            ],
            "insights": ["✓ Процентная ставка: у Sber лучше (9.9% против 17.9% у BankX)"],
            "reference_advantages": ["Процентная ставка"],
            "competitor_highlights": {"BankX": []},
            "recommendation": "Sber стоит подчеркнуть низкую ставку."
        })),
        ..Default::default()
    };
    let config = PipelineConfig {
        prefer_assisted: true,
        ..Default::default()
    };
    let workflow = ComparisonWorkflow::builtin(config)
        .unwrap()
        .with_extractor(&extractor);

    let result = workflow
        .compare_records(&sber_and_bankx(), ProductType::CreditCard)
        .await
        .unwrap();

    assert_eq!(result.method, ComparisonMethod::Assisted);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].values, vec!["9.9%", "17.9"]);
    assert_eq!(result.rows[0].best_entity_index, Some(0));
    assert_eq!(result.competitor_highlights["BankX"], Vec::<String>::new());
}

#[tokio::test]
async fn test_thin_model_answer_gets_lowest_model_confidence() {
    let fetcher = ListingFetcher {
        listings: BTreeMap::new(),
    };
    let search = FixedSearch {
        hits: vec![SearchHit {
            snippet_text: "ВТБ".to_string(),
            source_url: "https://news.example/vtb".to_string(),
            published_date: None,
        }],
    };
    let extractor = ScriptedExtractor {
        record: Some(json!({"interest_rate": "21%", "term_months": 24})),
        ..Default::default()
    };
    let config = PipelineConfig::default();
    let lower = config.acquisition.model_derived_confidence.min;
    let workflow = ComparisonWorkflow::builtin(config)
        .unwrap()
        .with_fetcher(&fetcher)
        .with_search(&search)
        .with_extractor(&extractor);

    let report = workflow
        .compare(&names(&["ВТБ", "Альфа-Банк"]), ProductType::ConsumerLoan)
        .await
        .unwrap();

    for source in &report.sources {
        assert_eq!(source.origin, DataOrigin::ModelDerived);
        assert_eq!(source.confidence, lower);
        let failed: Vec<AcquisitionStage> =
            source.failed_stages.iter().map(|f| f.stage).collect();
        assert_eq!(
            failed,
            vec![AcquisitionStage::DirectFetch, AcquisitionStage::SearchDerived]
        );
    }
    assert!(report.synthetic_entities().is_empty());
    assert_eq!(report.result.method, ComparisonMethod::Deterministic);
}

#[tokio::test]
async fn test_workflow_uses_direct_listings_and_reports_progress() {
    let fetcher = ListingFetcher {
        listings: BTreeMap::from([
            (
                "Сбербанк".to_string(),
                json!({"название": "СберКарта", "стоимость": "бесплатно", "кешбек": "до 10%"}),
            ),
            (
                "Т-Банк".to_string(),
                json!({"name": "Black", "стоимость_обслуживания": 99, "кэшбэк": 0.01}),
            ),
        ]),
    };
    let (tx, mut rx) = mpsc::channel(64);
    let config = PipelineConfig::default();
    let direct = config.acquisition.direct_site_confidence;
    let workflow = ComparisonWorkflow::builtin(config)
        .unwrap()
        .with_fetcher(&fetcher)
        .with_progress(tx);

    let report = workflow
        .compare(&names(&["Сбербанк", "Т-Банк", "Газпромбанк"]), ProductType::DebitCard)
        .await
        .unwrap();

    assert_eq!(report.sources[0].origin, DataOrigin::DirectSite);
    assert_eq!(report.sources[1].origin, DataOrigin::DirectSite);
    assert!(report.sources[..2]
        .iter()
        .all(|source| (direct.min..=direct.max).contains(&source.confidence)));
    assert_eq!(report.synthetic_entities(), vec!["Газпромбанк"]);

    let fee = report.result.row("annual_fee").unwrap();
    assert_eq!(fee.values[0], "0₽");
    assert_eq!(fee.values[1], "99₽");
    // The synthetic record also carries a free plan, so nobody wins outright.
    assert_eq!(fee.best_entity_index, None);
    let cashback = report.result.row("cashback").unwrap();
    assert_eq!(cashback.values[1], "1%");
    assert_eq!(cashback.best_entity_index, Some(0));
    assert_eq!(report.validation.entities.len(), 3);

    drop(workflow);
    let mut resolved = Vec::new();
    while let Some(event) = rx.recv().await {
        if let PipelineEvent::Resolved { entity, origin, .. } = event {
            resolved.push((entity, origin));
        }
    }
    assert_eq!(resolved.len(), 3);
    assert!(resolved.contains(&("Газпромбанк".to_string(), DataOrigin::Synthetic)));
}

#[tokio::test]
async fn test_trend_reconstruction_scores_and_deduplicates() -> anyhow::Result<()> {
    let search = FixedSearch {
        hits: vec![SearchHit {
            snippet_text: "С 1 марта 2024 года ставка по вкладу повышена до 18% годовых".to_string(),
            source_url: "https://bank.example/news/1".to_string(),
            published_date: Some(date(2024, 3, 1)),
        }],
    };
    let extractor = ScriptedExtractor {
        trend: Some(json!({
            "points": [
                {"date": "2024-03-01", "value": "17%", "confidence": 0.7, "source": "https://bank.example/news/1"},
                {"date": "15.01.2024", "value": "16%", "reason": "решение ЦБ"},
                {"date": "2024-03-01", "value": "18%", "confidence": 0.7},
                {"date": "2023-01-01", "value": "10%"},
                {"date": "когда-то", "value": "12%"}
            ]
        })),
        ..Default::default()
    };
    let workflow = ComparisonWorkflow::builtin(PipelineConfig::default())?
        .with_search(&search)
        .with_extractor(&extractor);
    let window = TrendWindow::new(date(2024, 1, 1), date(2024, 6, 30))?;

    let series = workflow
        .trend("Сбербанк", ProductType::Deposit, "interest_rate", window)
        .await?;

    assert_eq!(series.origin, TrendOrigin::Reconstructed);
    assert_eq!(series.points.len(), 2);
    assert_eq!(series.points[0].timestamp, date(2024, 1, 15));
    assert_eq!(series.points[0].value, "16%");
    assert!((series.points[0].confidence - 0.6).abs() < 1e-9);
    assert_eq!(series.points[1].timestamp, date(2024, 3, 1));
    assert_eq!(series.points[1].value, "18%");
    assert!((series.points[1].confidence - 0.8).abs() < 1e-9);

    let summary = series.summary();
    assert_eq!(summary.numeric_points, 2);
    assert_eq!(summary.start_value, Some(16.0));
    assert_eq!(summary.end_value, Some(18.0));
    Ok(())
}

#[tokio::test]
async fn test_trend_without_history_is_synthetic_and_covers_window() {
    let search = FixedSearch { hits: Vec::new() };
    let extractor = ScriptedExtractor::default();
    let workflow = ComparisonWorkflow::builtin(PipelineConfig::default())
        .unwrap()
        .with_search(&search)
        .with_extractor(&extractor);

    let series = workflow
        .trend_for_period(
            "ВТБ",
            ProductType::CreditCard,
            "interest_rate",
            TrendPeriod::Last6Months,
            date(2024, 6, 30),
        )
        .await
        .unwrap();

    assert!(series.is_synthetic());
    assert_eq!(series.points.len(), workflow.config().trend.synthetic_points);
    assert_eq!(series.points[0].timestamp, series.window.start);
    assert_eq!(series.points.last().unwrap().timestamp, series.window.end);
    assert!(extractor.tasks.lock().unwrap().is_empty());
}

#[test]
fn test_custom_mapping_with_colliding_alias_is_fatal() {
    let mut config = MappingConfig::builtin().unwrap();
    let grace = config
        .fields
        .iter_mut()
        .find(|field| field.name == "grace_period")
        .unwrap();
    grace.aliases.push("ставка".to_string());

    let err = FieldMappingTable::from_config(&config).unwrap_err();
    assert!(err.is_configuration_error());
}
