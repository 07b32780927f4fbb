//! Loose-to-typed value coercion.
//!
//! Spreadsheet cells and query strings hand us numbers as text and text as
//! numbers. `AttributeKind::coerce` brings such a value into the JSON shape
//! the attribute's kind expects, leaving it untouched when it cannot.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

use crate::schema::AttributeKind;

const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];

impl AttributeKind {
    pub fn coerce(self, value: Value) -> Value {
        if let Value::String(s) = &value {
            if s.trim().is_empty() && self != AttributeKind::String {
                return Value::Null;
            }
        }
        match self {
            AttributeKind::String | AttributeKind::Uuid => match value {
                Value::Number(n) => Value::String(number_text(&n)),
                Value::Bool(b) => Value::String(b.to_string()),
                other => other,
            },
            AttributeKind::Integer => match value {
                Value::String(s) => parse_integer(s.trim()).map(Value::from).unwrap_or(Value::String(s)),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if n.as_i64().is_none() && f.fract() == 0.0 => Value::from(f as i64),
                    _ => Value::Number(n),
                },
                Value::Bool(b) => Value::from(i64::from(b)),
                other => other,
            },
            AttributeKind::Float => match value {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::String(s)),
                other => other,
            },
            AttributeKind::Boolean => match value {
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "y" => Value::Bool(true),
                    "false" | "0" | "no" | "n" => Value::Bool(false),
                    _ => Value::String(s),
                },
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Value::Bool(false),
                    Some(1) => Value::Bool(true),
                    _ => Value::Number(n),
                },
                other => other,
            },
            AttributeKind::Timestamp => match value {
                Value::String(s) => parse_timestamp(s.trim())
                    .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true)))
                    .unwrap_or(Value::String(s)),
                other => other,
            },
            AttributeKind::Json => value,
        }
    }
}

/// RFC 3339, or a naive date/time taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in DATE_TIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Integer text, tolerating a `.0` tail the way spreadsheets render whole numbers.
pub fn parse_integer(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().or_else(|| {
        let f = s.parse::<f64>().ok()?;
        (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
    })
}

fn number_text(n: &Number) -> String {
    match (n.as_i64(), n.as_f64()) {
        (Some(i), _) => i.to_string(),
        (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_from_text_and_whole_floats() {
        assert_eq!(AttributeKind::Integer.coerce(json!("42")), json!(42));
        assert_eq!(AttributeKind::Integer.coerce(json!("7.0")), json!(7));
        assert_eq!(AttributeKind::Integer.coerce(json!(3.0)), json!(3));
        assert_eq!(AttributeKind::Integer.coerce(json!("abc")), json!("abc"));
    }

    #[test]
    fn blank_text_becomes_null_except_for_strings() {
        assert_eq!(AttributeKind::Integer.coerce(json!(" ")), Value::Null);
        assert_eq!(AttributeKind::String.coerce(json!("")), json!(""));
    }

    #[test]
    fn string_from_numbers() {
        assert_eq!(AttributeKind::String.coerce(json!(12.0)), json!("12"));
        assert_eq!(AttributeKind::String.coerce(json!(1.5)), json!("1.5"));
    }

    #[test]
    fn booleans_from_text_and_bits() {
        assert_eq!(AttributeKind::Boolean.coerce(json!("Yes")), json!(true));
        assert_eq!(AttributeKind::Boolean.coerce(json!(0)), json!(false));
    }

    #[test]
    fn timestamps_normalize_to_utc_millis() {
        assert_eq!(
            AttributeKind::Timestamp.coerce(json!("2024-05-01 08:30:00")),
            json!("2024-05-01T08:30:00.000Z")
        );
        assert_eq!(
            AttributeKind::Timestamp.coerce(json!("2024-05-01T10:30:00+02:00")),
            json!("2024-05-01T08:30:00.000Z")
        );
        assert_eq!(AttributeKind::Timestamp.coerce(json!("soon")), json!("soon"));
    }
}
