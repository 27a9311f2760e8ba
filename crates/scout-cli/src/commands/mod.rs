//! CLI subcommands.

pub mod enqueue;
pub mod pending;
pub mod query;
pub mod sync;

use serde_json::Value;

/// Parses a `field=value` argument.
///
/// The value is read as JSON when it parses as JSON, so `team=118` yields a
/// number and `event=2024casj` a string.
///
/// # Errors
///
/// Returns an error if the argument has no `=` or an empty field name.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{raw}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("empty field name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((field.to_string(), value))
}
