use crate::field_mapping::{FieldMappingTable, FieldSpec};
use crate::schema::{FieldFormat, FieldValue, NormalizedRecord, ProductType, RawRecord};
use crate::utils::{format_amount, format_number, is_missing_marker, key_form, parse_numeric};
use log::debug;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of looking a canonical field up in a raw record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'r> {
    /// No alias matched a usable value.
    Absent,
    /// An alias matched, but only with a whitespace-only string.
    Blank,
    /// The first alias, in declared order, carrying a real scalar value.
    Value(&'r Value),
}

fn lookup_key<'r>(map: &'r serde_json::Map<String, Value>, key: &str) -> Option<&'r Value> {
    if let Some(value) = map.get(key) {
        return Some(value);
    }
    let wanted = key_form(key);
    map.iter()
        .find(|(k, _)| key_form(k) == wanted)
        .map(|(_, v)| v)
}

/// Resolves one alias. A dotted alias is tried as a literal key first, then as
/// `parent.child` one level deep.
fn lookup_alias<'r>(raw: &'r RawRecord, alias: &str) -> Option<&'r Value> {
    if let Some(value) = lookup_key(raw, alias) {
        return Some(value);
    }
    let (parent, child) = alias.split_once('.')?;
    match lookup_key(raw, parent)? {
        Value::Object(nested) => lookup_key(nested, child),
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().is_empty())
}

fn is_usable(value: &Value) -> bool {
    match value {
        Value::String(s) => !is_missing_marker(s),
        Value::Number(_) | Value::Bool(_) => true,
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
}

/// Tries every alias of `spec` in order; the first usable scalar wins.
pub fn lookup_field<'r>(raw: &'r RawRecord, spec: &FieldSpec) -> Lookup<'r> {
    let mut saw_blank = false;
    for alias in &spec.aliases {
        match lookup_alias(raw, alias) {
            Some(value) if is_usable(value) => return Lookup::Value(value),
            Some(value) if is_blank(value) => saw_blank = true,
            _ => {}
        }
    }
    if saw_blank {
        Lookup::Blank
    } else {
        Lookup::Absent
    }
}

fn days_word(value: f64) -> &'static str {
    if value.fract() != 0.0 {
        return "дня";
    }
    let n = value.abs() as u64;
    match (n % 10, n % 100) {
        (1, r) if r != 11 => "день",
        (2..=4, r) if !(12..=14).contains(&r) => "дня",
        _ => "дней",
    }
}

fn flag_word(text: &str) -> Option<&'static str> {
    match text.trim().to_lowercase().as_str() {
        "да" | "yes" | "true" | "есть" | "+" | "доступно" | "возможно" => Some("Да"),
        "нет" | "no" | "false" | "недоступно" | "невозможно" => Some("Нет"),
        _ => None,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn format_text(format: FieldFormat, text: &str) -> String {
    let text = collapse_whitespace(text);
    let lowered = text.to_lowercase();

    match format {
        FieldFormat::Percent | FieldFormat::SharePercent => parse_numeric(&text)
            .map(|n| n.render(format_number, "%"))
            .unwrap_or(text),
        FieldFormat::Currency => {
            if lowered == "бесплатно" || lowered == "бесплатное" || lowered == "free" {
                return "0₽".to_string();
            }
            parse_numeric(&text)
                .map(|n| n.render(format_amount, "₽"))
                .unwrap_or(text)
        }
        FieldFormat::Days => parse_numeric(&text)
            .map(|n| {
                let last = n.values().last().copied().unwrap_or_default();
                n.render(format_number, &format!(" {}", days_word(last)))
            })
            .unwrap_or(text),
        FieldFormat::Months => parse_numeric(&text)
            .map(|n| n.render(format_number, " мес."))
            .unwrap_or(text),
        FieldFormat::Flag => flag_word(&text).map(str::to_string).unwrap_or(text),
        FieldFormat::Text => text,
    }
}

fn format_number_value(format: FieldFormat, n: f64) -> String {
    match format {
        FieldFormat::Percent => format!("{}%", format_number(n)),
        FieldFormat::SharePercent => {
            let percent = if n > 0.0 && n < 1.0 { n * 100.0 } else { n };
            format!("{}%", format_number(percent))
        }
        FieldFormat::Currency => format!("{}₽", format_amount(n)),
        FieldFormat::Days => format!("{} {}", format_number(n), days_word(n)),
        FieldFormat::Months => format!("{} мес.", format_number(n)),
        FieldFormat::Flag if n == 0.0 => "Нет".to_string(),
        FieldFormat::Flag if n == 1.0 => "Да".to_string(),
        FieldFormat::Flag | FieldFormat::Text => format_number(n),
    }
}

/// Display form of a raw scalar for a field format, `None` when the value carries no data.
///
/// Formatting is idempotent: feeding the output back in returns it unchanged.
pub fn format_value(format: FieldFormat, value: &Value) -> Option<String> {
    if !is_usable(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(format_text(format, s)),
        Value::Number(n) => n.as_f64().map(|n| format_number_value(format, n)),
        Value::Bool(b) => Some(if *b { "Да" } else { "Нет" }.to_string()),
        _ => None,
    }
}

/// Resolves raw records of any schema variant onto the canonical schema of their product.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    table: &'a FieldMappingTable,
}

impl<'a> Normalizer<'a> {
    pub fn new(table: &'a FieldMappingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &'a FieldMappingTable {
        self.table
    }

    /// Never fails: missing data becomes the sentinel and unknown keys are ignored.
    pub fn normalize(
        &self,
        raw: &RawRecord,
        product_type: ProductType,
        entity_name: &str,
    ) -> NormalizedRecord {
        let schema = self.table.schema(product_type);
        let mut values = BTreeMap::new();

        for spec in schema.fields() {
            let value = match lookup_field(raw, spec) {
                Lookup::Value(v) => format_value(spec.format, v)
                    .map(FieldValue::Value)
                    .unwrap_or(FieldValue::NoData),
                Lookup::Absent | Lookup::Blank => FieldValue::NoData,
            };
            values.insert(spec.name.clone(), value);
        }

        let record = NormalizedRecord {
            owner_name: entity_name.to_string(),
            product_type,
            values,
        };

        debug!(
            "Normalized {} {} record: {}/{} fields populated, {} raw keys",
            entity_name,
            product_type,
            record.present_count(),
            schema.required_count(),
            raw.len()
        );

        record
    }

    /// Normalizes every `(entity, raw)` pair, keeping the input order.
    pub fn normalize_all(
        &self,
        raws: &[(String, RawRecord)],
        product_type: ProductType,
    ) -> Vec<(String, NormalizedRecord)> {
        raws.iter()
            .map(|(entity, raw)| (entity.clone(), self.normalize(raw, product_type, entity)))
            .collect()
    }

    /// Raw keys that no alias of `product_type` recognizes.
    pub fn unknown_keys(&self, raw: &RawRecord, product_type: ProductType) -> Vec<String> {
        let known: BTreeSet<String> = self
            .table
            .aliases_to_canonical(product_type)
            .keys()
            .flat_map(|alias| {
                let parent = alias.split_once('.').map(|(parent, _)| key_form(parent));
                std::iter::once(key_form(alias)).chain(parent)
            })
            .collect();
        raw.keys()
            .filter(|key| !known.contains(&key_form(key)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    fn table() -> FieldMappingTable {
        FieldMappingTable::builtin().unwrap()
    }

    #[test]
    fn test_alias_invariance() {
        let table = table();
        let normalizer = Normalizer::new(&table);
        let spellings = [
            json!({ "ставка": "9.9" }),
            json!({ "процентная_ставка": "9,9 %" }),
            json!({ "Процентная ставка": 9.9 }),
            json!({ "interest_rate": "9.9%" }),
        ];
        for record in spellings {
            let normalized = normalizer.normalize(&raw(record), ProductType::CreditCard, "Sber");
            assert_eq!(normalized.display("interest_rate"), "9.9%");
        }
    }

    #[test]
    fn test_first_alias_in_declared_order_wins() {
        let table = table();
        let normalizer = Normalizer::new(&table);
        let record = raw(json!({
            "льготный_период": "55 дней",
            "грейс_период": { "покупки": 120, "снятие": 0 }
        }));
        let normalized = normalizer.normalize(&record, ProductType::CreditCard, "Sber");
        assert_eq!(normalized.display("grace_period"), "120 дней");

        let flat = raw(json!({ "льготный_период": "до 55 дней", "грейс_период": "100" }));
        let normalized = normalizer.normalize(&flat, ProductType::CreditCard, "X");
        assert_eq!(normalized.display("grace_period"), "100 дней");
    }

    #[test]
    fn test_every_required_field_is_present() {
        let table = table();
        let normalizer = Normalizer::new(&table);
        let record = raw(json!({ "unknown": 1, "кешбек": "Н/Д", "стоимость": null }));
        let normalized = normalizer.normalize(&record, ProductType::DebitCard, "Bank");
        let schema = table.schema(ProductType::DebitCard);
        assert_eq!(normalized.values.len(), schema.required_count());
        assert_eq!(normalized.present_count(), 0);
        assert_eq!(normalized.display("cashback"), crate::schema::NO_DATA);
    }

    #[test]
    fn test_nested_object_is_not_a_value() {
        let table = table();
        let normalizer = Normalizer::new(&table);
        let record = raw(json!({ "снятие_наличных": { "свои_банки": "0₽" } }));
        let normalized = normalizer.normalize(&record, ProductType::DebitCard, "Bank");
        assert!(!normalized
            .get("cash_withdrawal_other_banks")
            .unwrap()
            .is_present());
    }

    #[test]
    fn test_formatters() {
        let cases = [
            (FieldFormat::SharePercent, json!(0.03), "3%"),
            (FieldFormat::SharePercent, json!("до 10%"), "до 10%"),
            (FieldFormat::Percent, json!("9,8% - 49,8%"), "9.8-49.8%"),
            (FieldFormat::Currency, json!(1500000), "1 500 000₽"),
            (FieldFormat::Currency, json!("бесплатно"), "0₽"),
            (FieldFormat::Currency, json!("до 1 млн руб."), "до 1 000 000₽"),
            (FieldFormat::Days, json!(120), "120 дней"),
            (FieldFormat::Days, json!("51 день"), "51 день"),
            (FieldFormat::Months, json!("12 месяцев"), "12 мес."),
            (FieldFormat::Flag, json!(true), "Да"),
            (FieldFormat::Flag, json!("нет"), "Нет"),
            (FieldFormat::Text, json!("  по   тарифу "), "по тарифу"),
        ];
        for (format, input, expected) in cases {
            assert_eq!(format_value(format, &input).as_deref(), Some(expected));
        }
        assert_eq!(format_value(FieldFormat::Text, &json!("N/A")), None);
    }

    #[test]
    fn test_formatting_is_idempotent() {
        let inputs = [
            (FieldFormat::Percent, json!("17.9% годовых")),
            (FieldFormat::SharePercent, json!(0.015)),
            (FieldFormat::Currency, json!("от 10 000 руб")),
            (FieldFormat::Currency, json!("0₽ при тратах от 10 000₽")),
            (FieldFormat::Days, json!("от 10 до 22 дней")),
            (FieldFormat::Months, json!(36)),
            (FieldFormat::Flag, json!("Да")),
        ];
        for (format, input) in inputs {
            let once = format_value(format, &input).unwrap();
            let twice = format_value(format, &Value::String(once.clone())).unwrap();
            assert_eq!(once, twice, "{:?} {:?}", format, input);
        }
    }

    #[test]
    fn test_renormalizing_is_idempotent() {
        let table = table();
        let normalizer = Normalizer::new(&table);
        let record = raw(json!({
            "название": "Кредитная СберКарта",
            "ставка": "9,8-49,8",
            "грейс_период": { "покупки": 120 },
            "кешбек": 0.01,
            "стоимость": "бесплатно",
            "лимит": "до 1 000 000 руб"
        }));
        let first = normalizer.normalize(&record, ProductType::CreditCard, "Sber");
        let second = normalizer.normalize(&first.to_raw(), ProductType::CreditCard, "Sber");
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_keys_are_reported() {
        let table = table();
        let normalizer = Normalizer::new(&table);
        let record = raw(json!({ "ставка": 1, "грейс_период": {}, "погода": "ясно" }));
        assert_eq!(
            normalizer.unknown_keys(&record, ProductType::CreditCard),
            vec!["погода".to_string()]
        );
    }
}
