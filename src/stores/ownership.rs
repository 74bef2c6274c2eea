// Ownership Store - users considered authors of an entity

use chrono::Utc;
use sqlx::sqlite::{Sqlite, SqliteConnection};
use sqlx::Executor;

use crate::core::strong_types::{EntityId, EntityKind, UserId};
use crate::error::{AppError, AppResult};

pub struct OwnershipStore;

impl OwnershipStore {
    /// Record that `user_id` touched the entity. Repeated touches only refresh `updated_at`.
    pub async fn record_touch(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        entity_id: EntityId,
        user_id: UserId,
    ) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO {} (entity_id, user_id, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(entity_id, user_id) DO UPDATE SET updated_at = excluded.updated_at",
            kind.owner_table()
        );
        sqlx::query(&sql)
            .bind(entity_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to record owner {} of {} {}: {}",
                    user_id, kind, entity_id, e
                ))
            })?;
        Ok(())
    }

    pub async fn is_owner<'e, E>(
        executor: E,
        kind: EntityKind,
        entity_id: EntityId,
        user_id: UserId,
    ) -> AppResult<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT 1 FROM {} WHERE entity_id = ? AND user_id = ?",
            kind.owner_table()
        );
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .bind(user_id)
            .fetch_optional(executor)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to check ownership: {}", e)))?;
        Ok(row.is_some())
    }

    /// Owners of an entity, most recently active first
    pub async fn owners<'e, E>(
        executor: E,
        kind: EntityKind,
        entity_id: EntityId,
    ) -> AppResult<Vec<UserId>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT user_id FROM {} WHERE entity_id = ? ORDER BY updated_at DESC, user_id",
            kind.owner_table()
        );
        sqlx::query_scalar::<_, UserId>(&sql)
            .bind(entity_id)
            .fetch_all(executor)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list owners: {}", e)))
    }

    /// Cascade for permanent deletion
    pub async fn delete_for_entity(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        entity_id: EntityId,
    ) -> AppResult<u64> {
        let sql = format!("DELETE FROM {} WHERE entity_id = ?", kind.owner_table());
        let result = sqlx::query(&sql)
            .bind(entity_id)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to delete owners of {} {}: {}",
                    kind, entity_id, e
                ))
            })?;
        Ok(result.rows_affected())
    }
}
