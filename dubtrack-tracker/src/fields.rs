//! Loose JSON field access shared by the classifier and reconciler

use serde_json::{Map, Value};

/// First non-null value among `camel` and `snake`, in that order
pub(crate) fn pick<'a>(object: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    object
        .get(camel)
        .filter(|v| !v.is_null())
        .or_else(|| object.get(snake).filter(|v| !v.is_null()))
}

/// Non-blank string value
pub(crate) fn as_text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Numeric value, accepting numbers encoded as strings
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
