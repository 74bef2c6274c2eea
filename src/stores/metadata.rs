// Metadata Store - schemaless key/value attributes attached to posts and terms

use serde_json::{Map, Value};
use sqlx::sqlite::{Sqlite, SqliteConnection};
use sqlx::{Executor, QueryBuilder, Row};
use std::collections::HashMap;

use crate::core::canonical_json;
use crate::core::strong_types::{EntityId, EntityKind};
use crate::error::{AppError, AppResult};

/// Decoded metadata of one entity, keyed by field slug
pub type MetaMap = Map<String, Value>;

pub struct MetadataStore;

impl MetadataStore {
    /// Metadata for every entity in `entity_ids`. Entities without metadata are absent
    /// from the result. Values that fail to parse come back as raw strings.
    pub async fn get<'e, E>(
        executor: E,
        kind: EntityKind,
        entity_ids: &[EntityId],
    ) -> AppResult<HashMap<EntityId, MetaMap>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT entity_id, field_slug, value FROM {} WHERE entity_id IN (",
            kind.meta_table()
        ));
        let mut separated = qb.separated(", ");
        for id in entity_ids {
            separated.push_bind(*id);
        }
        qb.push(") ORDER BY entity_id, id");

        let rows = qb.build().fetch_all(executor).await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to load {} metadata: {}", kind, e))
        })?;

        let mut result: HashMap<EntityId, MetaMap> = HashMap::new();
        for row in rows {
            let entity_id: EntityId = row.get("entity_id");
            let field_slug: String = row.get("field_slug");
            let raw: Option<String> = row.get("value");
            let value = raw.as_deref().map(canonical_json::decode).unwrap_or(Value::Null);
            result.entry(entity_id).or_default().insert(field_slug, value);
        }
        Ok(result)
    }

    /// Insert or replace one field. Relies on the `(entity_id, field_slug)` unique index.
    pub async fn upsert(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        entity_id: EntityId,
        field_slug: &str,
        value: &Value,
    ) -> AppResult<()> {
        let encoded = canonical_json::encode(value)?;
        let sql = format!(
            "INSERT INTO {} (entity_id, field_slug, value) VALUES (?, ?, ?) \
             ON CONFLICT(entity_id, field_slug) DO UPDATE SET value = excluded.value",
            kind.meta_table()
        );
        sqlx::query(&sql)
            .bind(entity_id)
            .bind(field_slug)
            .bind(encoded)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to upsert {} {} meta '{}': {}",
                    kind, entity_id, field_slug, e
                ))
            })?;
        Ok(())
    }

    pub async fn upsert_many(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        entity_id: EntityId,
        fields: &MetaMap,
    ) -> AppResult<()> {
        for (field_slug, value) in fields {
            Self::upsert(&mut *conn, kind, entity_id, field_slug, value).await?;
        }
        Ok(())
    }

    /// Cascade for permanent deletion
    pub async fn delete_for_entity(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        entity_id: EntityId,
    ) -> AppResult<u64> {
        let sql = format!("DELETE FROM {} WHERE entity_id = ?", kind.meta_table());
        let result = sqlx::query(&sql)
            .bind(entity_id)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to delete metadata of {} {}: {}",
                    kind, entity_id, e
                ))
            })?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sqlite_database::SqliteDatabase;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_field() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();
        MetadataStore::upsert(tx.conn(), EntityKind::Post, 1, "price", &json!(100)).await.unwrap();
        MetadataStore::upsert(tx.conn(), EntityKind::Post, 1, "price", &json!(200)).await.unwrap();
        tx.commit().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_meta WHERE entity_id = 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let meta = MetadataStore::get(db.pool(), EntityKind::Post, &[1]).await.unwrap();
        assert_eq!(meta[&1]["price"], json!(200));
    }

    #[tokio::test]
    async fn test_values_round_trip_and_objects_are_canonical() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let fields: MetaMap = serde_json::from_value(json!({
            "tags": ["b", "a"],
            "dims": {"w": 3, "h": 4},
            "featured": true,
            "subtitle": "hi"
        }))
        .unwrap();

        let mut tx = db.begin_transaction().await.unwrap();
        MetadataStore::upsert_many(tx.conn(), EntityKind::Term, 9, &fields).await.unwrap();
        tx.commit().await.unwrap();

        let stored: String = sqlx::query_scalar(
            "SELECT value FROM term_meta WHERE entity_id = 9 AND field_slug = 'dims'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(stored, r#"{"h":4,"w":3}"#);

        let meta = MetadataStore::get(db.pool(), EntityKind::Term, &[9]).await.unwrap();
        assert_eq!(Value::Object(meta[&9].clone()), Value::Object(fields));
    }

    #[tokio::test]
    async fn test_malformed_stored_value_returned_raw() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        sqlx::query("INSERT INTO post_meta (entity_id, field_slug, value) VALUES (3, 'legacy', 'not json')")
            .execute(db.pool())
            .await
            .unwrap();

        let meta = MetadataStore::get(db.pool(), EntityKind::Post, &[3, 4]).await.unwrap();
        assert_eq!(meta[&3]["legacy"], json!("not json"));
        assert!(!meta.contains_key(&4));
    }

    #[tokio::test]
    async fn test_kinds_do_not_share_metadata() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();
        MetadataStore::upsert(tx.conn(), EntityKind::Post, 5, "color", &json!("red")).await.unwrap();
        tx.commit().await.unwrap();

        let terms = MetadataStore::get(db.pool(), EntityKind::Term, &[5]).await.unwrap();
        assert!(terms.is_empty());
    }
}
