//! JSON payload codec
//!
//! The payload is a UTF-8 JSON array with one object per rule, in rule order.
//! Decoding stops at raw field maps; callers rebuild records with
//! [`RuleRecord::from_wire_dict`] so tag parsing errors stay catchable.

use serde_json::{Map, Value};
use std::path::Path;

use crate::core::error::{PayloadError, SyncError};
use crate::core::rule::{RuleRecord, validate_rules};

pub type WireDict = Map<String, Value>;

/// Serializes rules as a JSON array of wire dicts.
///
/// # Errors
///
/// Returns `PayloadError::Malformed` if serialization fails.
pub fn encode(rules: &[RuleRecord]) -> Result<Vec<u8>, PayloadError> {
    let dicts: Vec<Value> = rules
        .iter()
        .map(|rule| Value::Object(rule.to_wire_dict()))
        .collect();
    serde_json::to_vec(&dicts).map_err(|e| PayloadError::Malformed(e.to_string()))
}

/// Parses a payload into ordered wire dicts.
///
/// # Errors
///
/// - `Malformed` if the bytes are not UTF-8 JSON or the top level is not an array
/// - `UnexpectedShape` if an element is not an object
pub fn decode(bytes: &[u8]) -> Result<Vec<WireDict>, PayloadError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PayloadError::Malformed(format!("invalid UTF-8: {e}")))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| PayloadError::Malformed(e.to_string()))?;

    let Value::Array(items) = value else {
        return Err(PayloadError::Malformed(format!(
            "expected a JSON array, found {}",
            json_kind(&value)
        )));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) => Ok(map),
            other => Err(PayloadError::UnexpectedShape {
                index,
                found: json_kind(&other),
            }),
        })
        .collect()
}

/// Decodes a payload and rebuilds every record.
///
/// # Errors
///
/// Returns the first decode or field error.
pub fn decode_rules(bytes: &[u8]) -> Result<Vec<RuleRecord>, PayloadError> {
    decode(bytes)?
        .iter()
        .enumerate()
        .map(|(index, dict)| RuleRecord::from_wire_dict(dict, index))
        .collect()
}

/// Reads a JSON rule file in the wire schema and validates every rule.
///
/// # Errors
///
/// - `Io` if the file cannot be read
/// - `Payload` if it is not a valid rule list
/// - `Sync(Validation)` if a rule fails local validation
pub async fn read_rule_file(path: &Path) -> crate::Result<Vec<RuleRecord>> {
    let bytes = tokio::fs::read(path).await?;
    let rules = decode_rules(&bytes)?;
    validate_rules(&rules).map_err(SyncError::from)?;
    Ok(rules)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
