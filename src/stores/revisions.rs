// Revision Store - append-only per-field change log

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{Executor, Row};
use tracing::debug;

use crate::core::canonical_json;
use crate::core::strong_types::{EntityId, EntityKind, UserId};
use crate::error::{AppError, AppResult};

/// One historical value of one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Revision {
    pub id: i64,
    pub entity_id: EntityId,
    pub field_slug: String,
    pub value: Value,
    pub author_id: Option<UserId>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Revision {
    fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let raw: Option<String> = row
            .try_get("value")
            .map_err(|e| AppError::DatabaseError(format!("Failed to decode revision: {}", e)))?;
        Ok(Self {
            id: row.get("id"),
            entity_id: row.get("entity_id"),
            field_slug: row.get("field_slug"),
            value: raw.as_deref().map(canonical_json::decode).unwrap_or(Value::Null),
            author_id: row.get("author_id"),
            comment: row.get("comment"),
            created_at: row
                .try_get("created_at")
                .map_err(|e| AppError::DatabaseError(format!("Failed to decode revision: {}", e)))?,
        })
    }
}

pub struct RevisionStore;

impl RevisionStore {
    /// Append a revision when `new_value` differs from the field's latest revision.
    ///
    /// `None` means the field was not part of the mutation and is never a change.
    /// Returns whether a row was written.
    pub async fn capture_if_changed(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        entity_id: EntityId,
        field_slug: &str,
        new_value: Option<&Value>,
        author_id: Option<UserId>,
        comment: Option<&str>,
    ) -> AppResult<bool> {
        let Some(new_value) = new_value else {
            return Ok(false);
        };

        if let Some(latest) = Self::latest(&mut *conn, kind, entity_id, field_slug).await? {
            if canonical_json::canonical_eq(&latest.value, new_value) {
                return Ok(false);
            }
        }

        let sql = format!(
            "INSERT INTO {} (entity_id, field_slug, value, author_id, comment, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            kind.revision_table()
        );
        sqlx::query(&sql)
            .bind(entity_id)
            .bind(field_slug)
            .bind(canonical_json::encode_raw(new_value)?)
            .bind(author_id)
            .bind(comment)
            .bind(Utc::now())
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to record revision of {} {} '{}': {}",
                    kind, entity_id, field_slug, e
                ))
            })?;

        debug!(%kind, entity_id, field_slug, "Revision captured");
        Ok(true)
    }

    /// Most recent revision of a field by insertion order
    pub async fn latest<'e, E>(
        executor: E,
        kind: EntityKind,
        entity_id: EntityId,
        field_slug: &str,
    ) -> AppResult<Option<Revision>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT id, entity_id, field_slug, value, author_id, comment, created_at FROM {} \
             WHERE entity_id = ? AND field_slug = ? ORDER BY id DESC LIMIT 1",
            kind.revision_table()
        );
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .bind(field_slug)
            .fetch_optional(executor)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load latest revision: {}", e)))?;

        row.as_ref().map(Revision::from_row).transpose()
    }

    /// Revision chain newest first, optionally for a single field
    pub async fn list<'e, E>(
        executor: E,
        kind: EntityKind,
        entity_id: EntityId,
        field_slug: Option<&str>,
    ) -> AppResult<Vec<Revision>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT id, entity_id, field_slug, value, author_id, comment, created_at FROM {} \
             WHERE entity_id = ? AND (? IS NULL OR field_slug = ?) ORDER BY id DESC",
            kind.revision_table()
        );
        let rows = sqlx::query(&sql)
            .bind(entity_id)
            .bind(field_slug)
            .bind(field_slug)
            .fetch_all(executor)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list revisions: {}", e)))?;

        rows.iter().map(Revision::from_row).collect()
    }

    /// Cascade for permanent deletion
    pub async fn delete_for_entity(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        entity_id: EntityId,
    ) -> AppResult<u64> {
        let sql = format!("DELETE FROM {} WHERE entity_id = ?", kind.revision_table());
        let result = sqlx::query(&sql)
            .bind(entity_id)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to delete revisions of {} {}: {}",
                    kind, entity_id, e
                ))
            })?;
        Ok(result.rows_affected())
    }
}
