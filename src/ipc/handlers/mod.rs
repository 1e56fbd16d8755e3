pub mod core;
pub mod datasets;
pub mod rows;
pub mod session;
pub mod users;

use crate::error::{Result, TrackerError};
use serde_json::Value;

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TrackerError::BadParams(format!("missing params.{key}")))
}

fn opt_str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Integer parameter; digit strings are accepted since row ids come back
/// from the view as whatever the presentation layer kept.
fn i64_param(params: &Value, key: &str) -> Result<i64> {
    let parsed = match params.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| TrackerError::BadParams(format!("params.{key} must be an integer")))
}
