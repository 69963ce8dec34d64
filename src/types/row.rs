//! Row type and row-key extraction

use serde_json::{Map, Value};

/// A schema-free grid row: field name to JSON value
pub type Row = Map<String, Value>;

/// Key identifying a row across operations
pub type RowKey = String;

/// Extract the identity key of a row from the configured key field.
///
/// Strings are used as-is, numbers and booleans by their JSON rendering.
/// Missing, null, empty or composite values yield `None`.
pub fn extract_key(row: &Row, key_field: &str) -> Option<RowKey> {
    match row.get(key_field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Build a row from a JSON value, returning `None` unless it is an object
pub fn row_from_value(value: Value) -> Option<Row> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
