//! Helpers for pulling typed values out of a `serde_json::Value` parameter object.
//!
//! Missing keys and wrong types fall back to the given default, so a partial
//! `--params` object only overrides what it names.

use serde_json::Value;

/// Reads `params[name]` as f64 (integers accepted), else `default`.
pub fn param_f64(params: &Value, name: &str, default: f64) -> f64 {
    params.get(name).and_then(Value::as_f64).unwrap_or(default)
}

/// Reads `params[name]` as a non-negative integer, else `default`.
pub fn param_usize(params: &Value, name: &str, default: usize) -> usize {
    params
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
}

/// Reads `params[name]` as a signed integer, else `default`.
///
/// Used for settings where a negative value means "disabled", such as the
/// birth generation count.
pub fn param_i64(params: &Value, name: &str, default: i64) -> i64 {
    params.get(name).and_then(Value::as_i64).unwrap_or(default)
}

/// Reads `params[name]` as a bool, else `default`.
pub fn param_bool(params: &Value, name: &str, default: bool) -> bool {
    params.get(name).and_then(Value::as_bool).unwrap_or(default)
}
