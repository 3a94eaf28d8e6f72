use crate::error::{ComparatorError, Result};
use crate::schema::{ProductType, TrendPeriod};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const TREND_KEYWORDS: &[&str] = &[
    "динамик",
    "истори",
    "тренд",
    "изменени",
    "как менял",
    "за период",
    "за последн",
];

const COMPARISON_KEYWORDS: &[&str] = &[
    "сравн",
    "конкурент",
    "отчет",
    "отчёт",
    "новый",
    "лучше",
    "выгодн",
];

/// Checked in order, so the more specific card keywords win over the bare "кредит".
const PRODUCT_KEYWORDS: &[(ProductType, &[&str])] = &[
    (ProductType::DebitCard, &["дебетов", "debit"]),
    (
        ProductType::CreditCard,
        &["кредитная карта", "кредитной карт", "кредитк", "карт", "card"],
    ),
    (ProductType::Deposit, &["вклад", "депозит", "deposit"]),
    (
        ProductType::ConsumerLoan,
        &["потребительск", "кредит", "заем", "займ", "loan"],
    ),
];

const DEFAULT_ENTITIES: &[(&str, &[&str])] = &[
    ("Сбербанк", &["сбер", "sber"]),
    ("ВТБ", &["втб", "vtb"]),
    ("Альфа-Банк", &["альф", "alfa"]),
    ("Т-Банк", &["т-банк", "тинькофф", "tinkoff"]),
    ("Газпромбанк", &["газпром"]),
    ("Райффайзенбанк", &["райффайзен", "raiffeisen"]),
];

fn three_months_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(3|три)\s+месяц|квартал").expect("static regex"))
}

fn six_months_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(6|шесть)\s+месяц|полгода|полугод").expect("static regex")
    })
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bгод\b|\bгода\b|\b12\s+месяц").expect("static regex"))
}

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Compare current terms across entities.
    Comparison,
    /// Reconstruct how terms changed over a period.
    Trend,
}

/// A free-text request resolved into the parameters of a workflow call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedRequest {
    pub kind: RequestKind,
    pub product_type: ProductType,
    /// Canonical names of the entities mentioned, in the router's table order.
    pub entities: Vec<String>,
    pub period: TrendPeriod,
    /// 0.5 when nothing was recognized and defaults were used, up to 1.0 when the kind, the
    /// product and at least one entity were all named.
    pub confidence: f64,
}

/// Keyword router from a Russian free-text request to comparison or trend parameters.
///
/// Defaults: comparison, credit cards, no entities and the last three months.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    entities: Vec<(String, Vec<String>)>,
}

impl Default for RequestRouter {
    fn default() -> Self {
        Self {
            entities: DEFAULT_ENTITIES
                .iter()
                .map(|(name, aliases)| {
                    (
                        name.to_string(),
                        aliases.iter().map(|a| a.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl RequestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity recognized by its name or any of `aliases`, case-insensitively.
    pub fn with_entity(mut self, name: impl Into<String>, aliases: &[&str]) -> Self {
        let name = name.into();
        let mut spellings: Vec<String> = aliases.iter().map(|a| a.to_lowercase()).collect();
        spellings.push(name.to_lowercase());
        self.entities.push((name, spellings));
        self
    }

    pub fn route(&self, text: &str) -> Result<RoutedRequest> {
        let query = text.trim().to_lowercase();
        if query.is_empty() {
            return Err(ComparatorError::invalid_input(
                "request",
                "request text must not be blank",
            ));
        }

        let trend_hits = keyword_hits(&query, TREND_KEYWORDS);
        let comparison_hits = keyword_hits(&query, COMPARISON_KEYWORDS);
        let kind = if trend_hits > comparison_hits {
            RequestKind::Trend
        } else {
            RequestKind::Comparison
        };

        let product = PRODUCT_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| query.contains(k)))
            .map(|(product, _)| *product);

        let entities: Vec<String> = self
            .entities
            .iter()
            .filter(|(name, aliases)| {
                query.contains(&name.to_lowercase()) || aliases.iter().any(|a| query.contains(a))
            })
            .map(|(name, _)| name.clone())
            .collect();

        let mut confidence = 0.5;
        if trend_hits.max(comparison_hits) > 0 {
            confidence += 0.2;
        }
        if product.is_some() {
            confidence += 0.2;
        }
        if !entities.is_empty() {
            confidence += 0.1;
        }

        let routed = RoutedRequest {
            kind,
            product_type: product.unwrap_or(ProductType::CreditCard),
            entities,
            period: detect_period(&query),
            confidence: f64::min(confidence, 1.0),
        };
        debug!(
            "Routed request as {:?} for {} ({} entities, {:?}, confidence {:.1})",
            routed.kind,
            routed.product_type,
            routed.entities.len(),
            routed.period,
            routed.confidence
        );
        Ok(routed)
    }
}

fn keyword_hits(query: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| query.contains(*k)).count()
}

fn detect_period(query: &str) -> TrendPeriod {
    if six_months_re().is_match(query) {
        TrendPeriod::Last6Months
    } else if three_months_re().is_match(query) {
        TrendPeriod::Last3Months
    } else if year_re().is_match(query) {
        TrendPeriod::LastYear
    } else {
        TrendPeriod::Last3Months
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_request_with_period_and_entities() {
        let routed = RequestRouter::new()
            .route("Покажи динамику ставок по вкладам Сбера и ВТБ за последние полгода")
            .unwrap();
        assert_eq!(routed.kind, RequestKind::Trend);
        assert_eq!(routed.product_type, ProductType::Deposit);
        assert_eq!(routed.entities, vec!["Сбербанк", "ВТБ"]);
        assert_eq!(routed.period, TrendPeriod::Last6Months);
        assert!((routed.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_comparison_request_prefers_card_over_loan() {
        let routed = RequestRouter::new()
            .route("Сравни кредитные карты Альфы с конкурентами")
            .unwrap();
        assert_eq!(routed.kind, RequestKind::Comparison);
        assert_eq!(routed.product_type, ProductType::CreditCard);
        assert_eq!(routed.entities, vec!["Альфа-Банк"]);

        let routed = RequestRouter::new()
            .route("дебетовая карта т-банка")
            .unwrap();
        assert_eq!(routed.product_type, ProductType::DebitCard);
        assert_eq!(routed.entities, vec!["Т-Банк"]);
    }

    #[test]
    fn test_year_is_not_read_from_annual_rate() {
        let routed = RequestRouter::new()
            .route("история изменения ставки 20% годовых по потребительскому кредиту")
            .unwrap();
        assert_eq!(routed.kind, RequestKind::Trend);
        assert_eq!(routed.product_type, ProductType::ConsumerLoan);
        assert_eq!(routed.period, TrendPeriod::Last3Months);

        let routed = RequestRouter::new()
            .route("как менялась ставка по вкладу за последний год")
            .unwrap();
        assert_eq!(routed.period, TrendPeriod::LastYear);
    }

    #[test]
    fn test_unrecognized_request_uses_defaults_with_low_confidence() {
        let routed = RequestRouter::new().route("Что нового?").unwrap();
        assert_eq!(routed.kind, RequestKind::Comparison);
        assert_eq!(routed.product_type, ProductType::CreditCard);
        assert!(routed.entities.is_empty());
        assert!((routed.confidence - 0.5).abs() < 1e-9);

        assert!(RequestRouter::new().route("   ").unwrap_err().is_input_error());
    }

    #[test]
    fn test_custom_entity_is_recognized() {
        let router = RequestRouter::new().with_entity("Совкомбанк", &["халва"]);
        let routed = router.route("Сравни карту Халва с картами Сбербанка").unwrap();
        assert_eq!(routed.entities, vec!["Сбербанк", "Совкомбанк"]);
    }
}
