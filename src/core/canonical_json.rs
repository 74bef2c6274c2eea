// Canonical JSON - stable encoding for stored metadata, option and revision values

use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

/// Recursively sort object keys. Arrays keep their order; scalars pass through.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Encode a value the way it is persisted
pub fn encode(value: &Value) -> AppResult<String> {
    serde_json::to_string(&canonicalize(value))
        .map_err(|e| AppError::SerializationError(format!("Failed to encode value: {}", e)))
}

/// Plain JSON stringification without canonicalization (revision payloads)
pub fn encode_raw(value: &Value) -> AppResult<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::SerializationError(format!("Failed to encode value: {}", e)))
}

/// Best-effort decode: text that is not valid JSON comes back as a string value
pub fn decode(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Equality after canonicalization on both sides
pub fn canonical_eq(a: &Value, b: &Value) -> bool {
    canonicalize(a) == canonicalize(b)
}
