// Payload splitting - routes mutation payload keys to core columns, metadata and terms

use serde_json::Value;
use tracing::debug;

use crate::core::strong_types::EntityKind;
use crate::ent_framework::ent_hooks::MutationData;
use crate::error::{AppError, AppResult};
use crate::stores::entities::{ColumnValue, CoreValues};

pub const TERMS_KEY: &str = "terms";
pub const REVISION_COMMENT_KEY: &str = "revision_comment";
pub const DELETED_AT_KEY: &str = "deleted_at";

/// Split a JSON object payload. Server-managed core columns are dropped,
/// `deleted_at` only accepts `null` (untrash), unknown keys become metadata.
pub fn split_payload(kind: EntityKind, payload: &Value) -> AppResult<MutationData> {
    let fields = payload
        .as_object()
        .ok_or_else(|| AppError::Validation("Payload must be a JSON object".to_string()))?;

    let mut data = MutationData::default();
    for (key, value) in fields {
        if key.trim().is_empty() {
            return Err(AppError::Validation("Payload keys cannot be empty".to_string()));
        }

        match key.as_str() {
            TERMS_KEY if kind.has_relationships() => data.terms = Some(value.clone()),
            TERMS_KEY => {
                return Err(AppError::Validation(format!(
                    "{} entities cannot be assigned terms",
                    kind
                )))
            }
            REVISION_COMMENT_KEY => {
                data.revision_comment = match value {
                    Value::Null => None,
                    Value::String(comment) => Some(comment.clone()),
                    other => {
                        return Err(AppError::Validation(format!(
                            "revision_comment must be a string, got {}",
                            other
                        )))
                    }
                }
            }
            DELETED_AT_KEY => {
                if !value.is_null() {
                    return Err(AppError::Validation(
                        "deleted_at can only be cleared; use delete to trash".to_string(),
                    ));
                }
                data.untrash = true;
            }
            _ => match kind.column(key) {
                Some(column) if column.writable => {
                    data.core.insert(key.clone(), value.clone());
                }
                Some(_) => debug!(%kind, key = key.as_str(), "Ignoring server-managed column"),
                None => {
                    data.meta.insert(key.clone(), value.clone());
                }
            },
        }
    }
    Ok(data)
}

/// Typed values of the core part of `data`, validated against the kind's columns
pub fn core_values(kind: EntityKind, data: &MutationData) -> AppResult<CoreValues> {
    let mut values = CoreValues::new();
    for (key, value) in &data.core {
        let column = kind.writable_column(key).ok_or_else(|| {
            AppError::Validation(format!("'{}' is not a writable {} column", key, kind))
        })?;
        let value = ColumnValue::from_json(column, value)?;
        if column.name == "status" && value.as_text().map_or(true, |s| s.trim().is_empty()) {
            return Err(AppError::Validation("status cannot be empty".to_string()));
        }
        values.insert(column.name, value);
    }
    Ok(values)
}
