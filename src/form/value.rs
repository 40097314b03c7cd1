//! Field values, their provenance, and coercion from raw text / JSON.

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use super::schema::{FieldDescriptor, FieldType};

// ═══════════════════════════════════════════
// Value
// ═══════════════════════════════════════════

/// A typed form value. Enum fields hold `Text` constrained by the schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Date(NaiveDate),
    Number(f64),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// The type's empty value: blank text or a zero amount.
    /// Dates have no empty value.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(n) => *n == 0.0,
            Self::Date(_) => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{n:.0}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

// ═══════════════════════════════════════════
// Source & FieldValue
// ═══════════════════════════════════════════

/// Where a value came from. Determines merge precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Default,
    Pattern,
    Model,
    User,
}

impl Source {
    /// Merge precedence: user > model > pattern > default.
    pub fn confidence_rank(&self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Pattern => 1,
            Self::Model => 2,
            Self::User => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Pattern => "pattern",
            Self::Model => "model",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate or accepted value for one named field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    pub name: String,
    pub value: Value,
    pub source: Source,
}

impl FieldValue {
    pub fn new(name: impl Into<String>, value: Value, source: Source) -> Self {
        Self {
            name: name.into(),
            value,
            source,
        }
    }

    pub fn confidence_rank(&self) -> u8 {
        self.source.confidence_rank()
    }

    /// Same value, re-attributed to another source.
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }
}

// ═══════════════════════════════════════════
// Coercion
// ═══════════════════════════════════════════

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})\s*日?")
        .expect("date pattern is valid")
});

static MAN_YEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*万\s*円?").expect("man-yen pattern is valid"));

static YEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:円|JPY|yen)").expect("yen pattern is valid"));

static PLAIN_NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number pattern is valid"));

/// Japanese and English spellings accepted for enum values, mapped to the
/// canonical allowed value. Only used when the canonical value is allowed
/// by the field being coerced.
const ENUM_SYNONYMS: &[(&str, &str)] = &[
    ("民間", "corporate"),
    ("民間企業", "corporate"),
    ("企業", "corporate"),
    ("company", "corporate"),
    ("官公庁", "government"),
    ("自治体", "government"),
    ("public sector", "government"),
    ("大学", "academic"),
    ("研究機関", "academic"),
    ("university", "academic"),
    ("個人", "individual"),
    ("person", "individual"),
];

/// Find the first date in `text`. Accepts `2024-03-01`, `2024/3/1`,
/// `2024.03.01` and `2024年3月1日`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let caps = DATE_PATTERN.captures(text)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse an amount. `350万円` -> 3_500_000, `3,500,000円` -> 3_500_000,
/// otherwise the first plain number.
pub fn parse_number(text: &str) -> Option<f64> {
    let t = text.replace([',', '，'], "");
    if let Some(caps) = MAN_YEN_PATTERN.captures(&t) {
        return caps[1].parse::<f64>().ok().map(|n| n * 10_000.0);
    }
    if let Some(caps) = YEN_PATTERN.captures(&t) {
        return caps[1].parse().ok();
    }
    PLAIN_NUMBER_PATTERN.find(&t).and_then(|m| m.as_str().parse().ok())
}

/// Map free text onto one of the descriptor's allowed values.
pub fn canonical_enum_value(descriptor: &FieldDescriptor, raw: &str) -> Option<String> {
    let allowed = descriptor.allowed_values.as_deref()?;
    let needle = raw.trim().to_lowercase();

    if let Some(hit) = allowed.iter().find(|a| a.to_lowercase() == needle) {
        return Some(hit.clone());
    }

    ENUM_SYNONYMS
        .iter()
        .filter(|(synonym, _)| needle == synonym.to_lowercase())
        .chain(
            ENUM_SYNONYMS
                .iter()
                .filter(|(synonym, _)| needle.contains(&synonym.to_lowercase())),
        )
        .map(|(_, canonical)| *canonical)
        .find(|canonical| allowed.iter().any(|a| a == canonical))
        .map(str::to_string)
}

/// Coerce raw text into a value for `descriptor`.
///
/// Returns `None` for blank input. Text that cannot be parsed into the
/// field's type is returned as `Value::Text` so that the merge step can
/// reject it with a reason instead of silently dropping it.
pub fn coerce_text(descriptor: &FieldDescriptor, raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value = match descriptor.field_type {
        FieldType::String => Value::text(trimmed),
        FieldType::Date => parse_date(trimmed)
            .map(Value::Date)
            .unwrap_or_else(|| Value::text(trimmed)),
        FieldType::Number => parse_number(trimmed)
            .map(Value::Number)
            .unwrap_or_else(|| Value::text(trimmed)),
        FieldType::Enum => Value::Text(
            canonical_enum_value(descriptor, trimmed).unwrap_or_else(|| trimmed.to_string()),
        ),
    };
    Some(value)
}

/// Coerce a JSON value returned by the model.
///
/// Nulls and blank strings become `None`. Arrays are joined line by line.
pub fn coerce_json(descriptor: &FieldDescriptor, raw: &serde_json::Value) -> Option<Value> {
    match raw {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => coerce_text(descriptor, s),
        serde_json::Value::Number(n) => match descriptor.field_type {
            FieldType::Number => n.as_f64().map(Value::Number),
            _ => coerce_text(descriptor, &n.to_string()),
        },
        serde_json::Value::Bool(b) => coerce_text(descriptor, &b.to_string()),
        serde_json::Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s.trim().to_string()),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            coerce_text(descriptor, &joined)
        }
        serde_json::Value::Object(_) => None,
    }
}
