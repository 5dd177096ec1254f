//! Lenient field access on native JSON payloads.
//!
//! Servers omit, null out or retype optional fields freely. Every helper here
//! returns `None` for anything absent or unusable; only [`required_id`] fails.

use crate::{Result, SyncError};
use bridge_traits::NativeItem;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;

pub(crate) fn get<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    payload.get(key).filter(|value| !value.is_null())
}

/// A non-blank string, or a number rendered as one.
pub(crate) fn string(payload: &Value, key: &str) -> Option<String> {
    match get(payload, key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First present key wins.
pub(crate) fn first_string(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| string(payload, key))
}

/// The item's external id.
///
/// # Errors
///
/// Returns `Conversion` if none of `keys` holds a usable id.
pub(crate) fn required_id(item: &NativeItem, keys: &[&str]) -> Result<String> {
    first_string(&item.payload, keys).ok_or_else(|| {
        SyncError::conversion(
            &item.native_kind,
            format!("missing required id field ({})", keys.join("/")),
        )
    })
}

pub(crate) fn int(payload: &Value, key: &str) -> Option<i64> {
    match get(payload, key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub(crate) fn int32(payload: &Value, key: &str) -> Option<i32> {
    int(payload, key).and_then(|n| i32::try_from(n).ok())
}

pub(crate) fn float(payload: &Value, key: &str) -> Option<f64> {
    let value = match get(payload, key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

pub(crate) fn boolean(payload: &Value, key: &str) -> Option<bool> {
    match get(payload, key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Unix seconds from an RFC 3339 string or a bare number.
pub(crate) fn timestamp(payload: &Value, key: &str) -> Option<i64> {
    match get(payload, key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp());
    }
    // Offset-less timestamps are taken as UTC
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

/// A calendar date from `YYYY-MM-DD` or a full timestamp.
pub(crate) fn date(payload: &Value, key: &str) -> Option<NaiveDate> {
    let raw = string(payload, key)?;
    let day = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Strings from an array of strings or of `{tag|Name|name: ..}` objects.
pub(crate) fn string_list(payload: &Value, key: &str) -> Vec<String> {
    match get(payload, key) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|value| match value {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Object(_) => first_string(value, &["tag", "Name", "name"]),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// A nested object, if present.
pub(crate) fn object<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    get(payload, key).filter(|value| value.is_object())
}

/// First element of an array of objects.
pub(crate) fn first_object<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    match get(payload, key)? {
        Value::Array(values) => values.iter().find(|value| value.is_object()),
        _ => None,
    }
}

/// Year of a date when the explicit year field is absent.
pub(crate) fn year_or_date(year: Option<i32>, date: Option<NaiveDate>) -> Option<i32> {
    use chrono::Datelike;
    year.or_else(|| date.map(|d| d.year()))
}
