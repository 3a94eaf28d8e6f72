use chrono::{Months, NaiveDate};
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Spellings sources use for "no data".
const MISSING_MARKERS: &[&str] = &[
    "", "н/д", "нд", "n/a", "na", "none", "null", "нет данных", "-", "—", "–", "?",
];

const NUM: &str = r"(\d+(?:[.,]\d+)?)\s*(тыс\.?|млн)?";

fn digit_gap_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d)[\s\u{a0}\u{202f}]+(\d)").expect("static regex"))
}

fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(в\s+год|в\s+месяц|в\s+мес\.?|/\s*год|/\s*мес\.?|годовых|%|₽|руб\.?|р\.|дней|дня|день|дн\.|месяцев|месяца|месяц|мес\.?|лет|года|год)",
        )
        .expect("static regex")
    })
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^(?:от\s*)?{NUM}\s*(?:-|–|—|до)\s*{NUM}$")).expect("static regex")
    })
}

fn prefixed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"^(до|от)\s*{NUM}$")).expect("static regex"))
}

fn plain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"^{NUM}$")).expect("static regex"))
}

/// Folded form of a record key or alias: trimmed, lowercased, spaces and hyphens as underscores.
///
/// Alias lookup and the load-time collision check both compare keys in this form.
pub fn key_form(key: &str) -> String {
    key.trim().to_lowercase().replace([' ', '-'], "_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    UpTo,
    From,
}

impl Bound {
    pub fn word(&self) -> &'static str {
        match self {
            Bound::UpTo => "до",
            Bound::From => "от",
        }
    }
}

/// A number recovered from a display or source string, units stripped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericValue {
    Plain(f64),
    Bounded(Bound, f64),
    Range(f64, f64),
}

impl NumericValue {
    /// The single magnitude used for ranking. Ranges rank by their advertised lower bound.
    pub fn magnitude(&self) -> f64 {
        match self {
            NumericValue::Plain(v) | NumericValue::Bounded(_, v) => *v,
            NumericValue::Range(lo, _) => *lo,
        }
    }

    pub fn values(&self) -> Vec<f64> {
        match self {
            NumericValue::Plain(v) | NumericValue::Bounded(_, v) => vec![*v],
            NumericValue::Range(lo, hi) => vec![*lo, *hi],
        }
    }

    /// Renders the number(s) with `number`, appends `suffix`, and re-attaches the bound
    /// word or range dash.
    pub fn render(&self, number: impl Fn(f64) -> String, suffix: &str) -> String {
        match self {
            NumericValue::Plain(v) => format!("{}{}", number(*v), suffix),
            NumericValue::Bounded(bound, v) => {
                format!("{} {}{}", bound.word(), number(*v), suffix)
            }
            NumericValue::Range(lo, hi) => format!("{}-{}{}", number(*lo), number(*hi), suffix),
        }
    }
}

pub fn is_missing_marker(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    MISSING_MARKERS.contains(&lowered.as_str())
}

fn parse_decimal(number: &str, multiplier: Option<&str>) -> Option<f64> {
    let base: f64 = number.replace(',', ".").parse().ok()?;
    let factor = match multiplier {
        Some(m) if m.starts_with("тыс") => 1_000.0,
        Some("млн") => 1_000_000.0,
        _ => 1.0,
    };
    Some(base * factor)
}

/// Parses plain (`9.9%`), bounded (`до 1 000 000₽`) and range (`9,8 - 49,8%`) forms.
///
/// Returns `None` for anything else, including free text that merely contains digits.
pub fn parse_numeric(text: &str) -> Option<NumericValue> {
    let lowered = text.trim().to_lowercase();
    let collapsed = digit_gap_re().replace_all(&lowered, "$1$2");
    let stripped = unit_re().replace_all(&collapsed, " ");
    let cleaned = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(caps) = plain_re().captures(&cleaned) {
        let v = parse_decimal(&caps[1], caps.get(2).map(|m| m.as_str()))?;
        return Some(NumericValue::Plain(v));
    }
    if let Some(caps) = prefixed_re().captures(&cleaned) {
        let bound = if &caps[1] == "до" {
            Bound::UpTo
        } else {
            Bound::From
        };
        let v = parse_decimal(&caps[2], caps.get(3).map(|m| m.as_str()))?;
        return Some(NumericValue::Bounded(bound, v));
    }
    if let Some(caps) = range_re().captures(&cleaned) {
        let lo = parse_decimal(&caps[1], caps.get(2).map(|m| m.as_str()))?;
        let hi = parse_decimal(&caps[3], caps.get(4).map(|m| m.as_str()))?;
        return Some(NumericValue::Range(lo.min(hi), lo.max(hi)));
    }
    None
}

/// Magnitude of a display value, `None` when it is not numeric.
pub fn parse_magnitude(text: &str) -> Option<f64> {
    parse_numeric(text).map(|n| n.magnitude())
}

/// Up to two decimals, trailing zeros dropped: `25`, `9.9`, `3.25`.
pub fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        let text = format!("{:.2}", rounded);
        text.trim_end_matches('0').to_string()
    }
}

/// Integer part grouped by thousands with spaces: `1 500 000`, `99.5`.
pub fn format_amount(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let negative = rounded < 0.0;
    let abs = rounded.abs();
    let whole = abs.trunc() as u64;
    let digits = whole.to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    let fraction = abs.fract();
    if fraction > 0.0 {
        let decimals = format_number(fraction);
        grouped.push_str(decimals.trim_start_matches('0'));
    }

    if negative {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Date `months` calendar months before `date`, clamped to the target month's length.
pub fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months)).unwrap_or(date)
}

/// Parses a point date as `YYYY-MM-DD`, `DD.MM.YYYY` or `YYYY-MM`.
///
/// A month without a day resolves to the 15th, the middle of the month.
pub fn parse_point_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%d.%m.%Y") {
        return Some(date);
    }
    NaiveDate::parse_from_str(&format!("{}-15", trimmed), "%Y-%m-%d").ok()
}

/// Seed that stays the same for the same inputs within a build.
pub fn stable_seed(parts: &[&str]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for part in parts {
        part.hash(&mut hasher);
    }
    hasher.finish()
}
