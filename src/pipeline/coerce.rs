//! Type Coercion Engine.
//!
//! Normalizes loosely typed extracted values by column-name pattern. Never
//! fails: unparsable dates and decimals are left as they are, unparsable
//! integers become zero.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Number, Value};

use super::types::Record;

const DATE_PATTERNS: &[&str] = &["date", "timestamp", "created_at", "updated_at"];
const INTEGER_PATTERNS: &[&str] = &["quantity", "count", "amount", "capacity"];
const MISSING_PLACEHOLDERS: &[&str] = &["nan", "NaN", "NAN", "None", "null", "NULL"];

const STRENGTH_DECIMALS: u32 = 4;

/// Two-digit-year formats come first: `%Y` would accept "25" as year 25.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%m-%d-%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Which rule applies to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Date-only ISO output.
    Date,
    /// Full ISO timestamp output.
    Timestamp,
    Integer,
    Decimal,
    Text,
}

impl Coercion {
    pub fn for_field(field: &str) -> Self {
        if field == "expiry_date" {
            Self::Date
        } else if DATE_PATTERNS.iter().any(|p| field.contains(p)) {
            Self::Timestamp
        } else if INTEGER_PATTERNS.iter().any(|p| field.contains(p)) {
            Self::Integer
        } else if field.contains("strength") && !field.ends_with("_unit") {
            Self::Decimal
        } else {
            Self::Text
        }
    }
}

/// Coerce every present field of every record in place.
pub fn coerce_records(records: &mut [Record]) {
    for record in records {
        coerce_record(record);
    }
}

pub fn coerce_record(record: &mut Record) {
    for (field, value) in record.iter_mut() {
        *value = coerce_value(field, value);
    }
}

pub fn coerce_value(field: &str, value: &Value) -> Value {
    match Coercion::for_field(field) {
        Coercion::Date => coerce_date(value, false),
        Coercion::Timestamp => coerce_date(value, true),
        Coercion::Integer => Value::from(coerce_integer(value)),
        Coercion::Decimal => coerce_decimal(value).unwrap_or_else(|| value.clone()),
        Coercion::Text => coerce_text(value),
    }
}

// ═══════════════════════════════════════════
// Dates
// ═══════════════════════════════════════════

fn coerce_date(value: &Value, with_time: bool) -> Value {
    let Some(text) = value.as_str() else {
        return value.clone();
    };
    let text = text.trim();
    if MISSING_PLACEHOLDERS.contains(&text) {
        return Value::String(String::new());
    }
    match parse_date(text) {
        Some(parsed) if with_time => Value::String(parsed.to_timestamp_string()),
        Some(parsed) => Value::String(parsed.date().format("%Y-%m-%d").to_string()),
        None => value.clone(),
    }
}

enum ParsedDate {
    Offset(DateTime<chrono::FixedOffset>),
    Naive(NaiveDateTime),
}

impl ParsedDate {
    fn date(&self) -> NaiveDate {
        match self {
            Self::Offset(dt) => dt.date_naive(),
            Self::Naive(dt) => dt.date(),
        }
    }

    fn to_timestamp_string(&self) -> String {
        match self {
            Self::Offset(dt) => dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            Self::Naive(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

fn parse_date(text: &str) -> Option<ParsedDate> {
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(ParsedDate::Offset(dt));
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
    {
        return Some(ParsedDate::Naive(dt));
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(ParsedDate::Naive)
}

// ═══════════════════════════════════════════
// Numbers
// ═══════════════════════════════════════════

/// Truncates toward zero; anything non-numeric is 0.
fn coerce_integer(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(truncate_f64))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_f64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn truncate_f64(f: f64) -> Option<i64> {
    f.is_finite().then(|| f.trunc()).and_then(|t| t.to_i64())
}

/// Round half away from zero to four places. Integral results stay integers.
fn coerce_decimal(value: &Value) -> Option<Value> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    let decimal = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()?;
    let rounded = decimal
        .round_dp_with_strategy(STRENGTH_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
        .normalize();

    if rounded.scale() == 0 {
        if let Some(i) = rounded.to_i64() {
            return Some(Value::from(i));
        }
    }
    rounded.to_f64().and_then(Number::from_f64).map(Value::Number)
}

// ═══════════════════════════════════════════
// Text
// ═══════════════════════════════════════════

fn coerce_text(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if MISSING_PLACEHOLDERS.contains(&trimmed) {
                Value::String(String::new())
            } else {
                Value::String(trimmed.to_string())
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_patterns() {
        assert_eq!(Coercion::for_field("expiry_date"), Coercion::Date);
        assert_eq!(Coercion::for_field("timestamp"), Coercion::Timestamp);
        assert_eq!(Coercion::for_field("date_created"), Coercion::Timestamp);
        assert_eq!(Coercion::for_field("total_quantity"), Coercion::Integer);
        assert_eq!(Coercion::for_field("max_capacity"), Coercion::Integer);
        assert_eq!(Coercion::for_field("strength"), Coercion::Decimal);
        assert_eq!(Coercion::for_field("strength_unit"), Coercion::Text);
        assert_eq!(Coercion::for_field("medication_name"), Coercion::Text);
    }

    #[test]
    fn unparsable_quantity_is_zero() {
        assert_eq!(coerce_value("total_quantity", &json!("abc")), json!(0));
        assert_eq!(coerce_value("quantity", &json!("")), json!(0));
        assert_eq!(coerce_value("quantity", &json!(null)), json!(0));
    }

    #[test]
    fn quantities_truncate() {
        assert_eq!(coerce_value("total_quantity", &json!(" 12 ")), json!(12));
        assert_eq!(coerce_value("total_quantity", &json!("7.9")), json!(7));
        assert_eq!(coerce_value("available_quantity", &json!(-3.5)), json!(-3));
        assert_eq!(coerce_value("available_quantity", &json!(30)), json!(30));
    }

    #[test]
    fn strength_rounds_to_four_places() {
        assert_eq!(coerce_value("strength", &json!("10.12345")), json!(10.1235));
        assert_eq!(coerce_value("strength", &json!(10.12345)), json!(10.1235));
        assert_eq!(coerce_value("strength", &json!("0.5")), json!(0.5));
    }

    #[test]
    fn integral_strength_stays_integer() {
        assert_eq!(coerce_value("strength", &json!(325)), json!(325));
        assert_eq!(coerce_value("strength", &json!("325.00")), json!(325));
    }

    #[test]
    fn unparsable_strength_is_unchanged() {
        assert_eq!(coerce_value("strength", &json!("10mg")), json!("10mg"));
        assert_eq!(coerce_value("strength", &json!(true)), json!(true));
    }

    #[test]
    fn expiry_dates_become_iso() {
        assert_eq!(coerce_value("expiry_date", &json!("12/31/2025")), json!("2025-12-31"));
        assert_eq!(coerce_value("expiry_date", &json!("12/31/25")), json!("2025-12-31"));
        assert_eq!(coerce_value("expiry_date", &json!("2025/06/01")), json!("2025-06-01"));
        assert_eq!(coerce_value("expiry_date", &json!("Jan 5, 2026")), json!("2026-01-05"));
        assert_eq!(coerce_value("expiry_date", &json!("05-Jan-2026")), json!("2026-01-05"));
        assert_eq!(
            coerce_value("expiry_date", &json!("2025-12-31T10:00:00Z")),
            json!("2025-12-31")
        );
    }

    #[test]
    fn unparsable_date_is_unchanged() {
        assert_eq!(coerce_value("expiry_date", &json!("soon")), json!("soon"));
        assert_eq!(coerce_value("expiry_date", &json!("")), json!(""));
        assert_eq!(coerce_value("expiry_date", &json!("NaN")), json!(""));
    }

    #[test]
    fn timestamps_keep_offset_when_present() {
        assert_eq!(
            coerce_value("timestamp", &json!("2025-03-01 14:30:00")),
            json!("2025-03-01T14:30:00")
        );
        assert_eq!(
            coerce_value("timestamp", &json!("2025-03-01T14:30:00-05:00")),
            json!("2025-03-01T14:30:00-05:00")
        );
        assert_eq!(coerce_value("timestamp", &json!("3/1/2025")), json!("2025-03-01T00:00:00"));
    }

    #[test]
    fn text_is_trimmed_and_placeholders_cleared() {
        assert_eq!(coerce_value("medication_name", &json!("  Aspirin ")), json!("Aspirin"));
        for placeholder in ["nan", "NaN", "NAN", "None", "null", "NULL", " nan "] {
            assert_eq!(coerce_value("form", &json!(placeholder)), json!(""));
        }
        assert_eq!(coerce_value("max_capacity", &json!(100)), json!(100));
        assert_eq!(coerce_value("ndc_id", &json!(12345)), json!(12345));
    }

    #[test]
    fn records_stay_sparse() {
        let mut record = Record::new();
        record.insert("strength".into(), json!("5"));
        let mut records = vec![record];
        coerce_records(&mut records);
        assert_eq!(records[0].len(), 1);
        assert_eq!(records[0]["strength"], json!(5));
    }
}
