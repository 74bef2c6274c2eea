// Relationship Store - posts tagged with taxonomy terms

use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteConnection};
use sqlx::{Executor, QueryBuilder, Row};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::strong_types::EntityId;
use crate::error::{AppError, AppResult};

/// Term as embedded in a post's `terms` grouping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermSummary {
    pub id: EntityId,
    pub slug: String,
    pub name: Option<String>,
    pub taxonomy: String,
    pub parent_id: Option<EntityId>,
}

/// Terms of one post grouped by taxonomy slug
pub type TermGroups = BTreeMap<String, Vec<TermSummary>>;

pub struct RelationshipStore;

impl RelationshipStore {
    /// Replace every relationship of `post_id` with `term_ids`. An empty set clears them.
    pub async fn replace(
        conn: &mut SqliteConnection,
        post_id: EntityId,
        term_ids: &BTreeSet<EntityId>,
    ) -> AppResult<()> {
        Self::delete_for_post(&mut *conn, post_id).await?;

        if term_ids.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO post_terms (post_id, term_id) ");
        qb.push_values(term_ids.iter(), |mut b, term_id| {
            b.push_bind(post_id).push_bind(*term_id);
        });
        qb.build().execute(conn).await.map_err(|e| {
            AppError::DatabaseError(format!(
                "Failed to insert relationships for post {}: {}",
                post_id, e
            ))
        })?;
        Ok(())
    }

    /// Live terms of each post, grouped by taxonomy
    pub async fn list_by_entities<'e, E>(
        executor: E,
        post_ids: &[EntityId],
    ) -> AppResult<HashMap<EntityId, TermGroups>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT r.post_id, t.id, t.slug, t.name, t.type_slug, t.parent_id \
             FROM post_terms r JOIN terms t ON t.id = r.term_id \
             WHERE t.deleted_at IS NULL AND r.post_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in post_ids {
            separated.push_bind(*id);
        }
        qb.push(") ORDER BY r.post_id, t.type_slug, t.id");

        let rows = qb
            .build()
            .fetch_all(executor)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load relationships: {}", e)))?;

        let mut result: HashMap<EntityId, TermGroups> = HashMap::new();
        for row in rows {
            let post_id: EntityId = row.get("post_id");
            let term = TermSummary {
                id: row.get("id"),
                slug: row.get("slug"),
                name: row.get("name"),
                taxonomy: row.get("type_slug"),
                parent_id: row.get("parent_id"),
            };
            result
                .entry(post_id)
                .or_default()
                .entry(term.taxonomy.clone())
                .or_default()
                .push(term);
        }
        Ok(result)
    }

    pub async fn delete_for_post(conn: &mut SqliteConnection, post_id: EntityId) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM post_terms WHERE post_id = ?")
            .bind(post_id)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to delete relationships of post {}: {}",
                    post_id, e
                ))
            })?;
        Ok(result.rows_affected())
    }

    pub async fn delete_for_term(conn: &mut SqliteConnection, term_id: EntityId) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM post_terms WHERE term_id = ?")
            .bind(term_id)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to delete relationships of term {}: {}",
                    term_id, e
                ))
            })?;
        Ok(result.rows_affected())
    }
}

/// Flatten a `terms` payload into a de-duplicated id set.
///
/// Accepted shapes: `[1, 2]`, `["1", "2"]`, `[{"id": 1}]`, or an object keyed by taxonomy
/// slug whose values are any of those (or a single id). `null` clears all terms.
pub fn normalize_term_ids(payload: &Value) -> AppResult<BTreeSet<EntityId>> {
    let mut ids = BTreeSet::new();
    match payload {
        Value::Null => {}
        Value::Array(items) => collect_refs(items, &mut ids)?,
        Value::Object(groups) => {
            for (taxonomy, group) in groups {
                match group {
                    Value::Array(items) => collect_refs(items, &mut ids)?,
                    Value::Null => {}
                    single => {
                        ids.insert(term_ref(single).ok_or_else(|| {
                            AppError::Validation(format!(
                                "Invalid term reference under '{}': {}",
                                taxonomy, single
                            ))
                        })?);
                    }
                }
            }
        }
        other => {
            return Err(AppError::Validation(format!(
                "terms must be an array or an object keyed by taxonomy, got {}",
                other
            )))
        }
    }
    Ok(ids)
}

fn collect_refs(items: &[Value], ids: &mut BTreeSet<EntityId>) -> AppResult<()> {
    for item in items {
        let id = term_ref(item)
            .ok_or_else(|| AppError::Validation(format!("Invalid term reference: {}", item)))?;
        ids.insert(id);
    }
    Ok(())
}

fn term_ref(value: &Value) -> Option<EntityId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(obj) => obj.get("id").and_then(|id| match id {
            Value::Object(_) => None,
            other => term_ref(other),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sqlite_database::SqliteDatabase;
    use serde_json::json;

    async fn seed_term(db: &SqliteDatabase, id: i64, taxonomy: &str, slug: &str) {
        sqlx::query(
            "INSERT INTO terms (id, type_slug, slug, name, created_at, updated_at) VALUES (?, ?, ?, ?, 'now', 'now')",
        )
        .bind(id)
        .bind(taxonomy)
        .bind(slug)
        .bind(slug.to_uppercase())
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[test]
    fn test_normalize_all_shapes() {
        let expected: BTreeSet<i64> = [1, 2, 3].into_iter().collect();
        assert_eq!(normalize_term_ids(&json!([3, 1, 2, 2])).unwrap(), expected);
        assert_eq!(normalize_term_ids(&json!(["1", "2", "3"])).unwrap(), expected);
        assert_eq!(normalize_term_ids(&json!([{"id": 1}, {"id": 2}, {"id": "3"}])).unwrap(), expected);
        assert_eq!(
            normalize_term_ids(&json!({"categories": [1, {"id": 2}], "tags": ["3", 1], "series": null}))
                .unwrap(),
            expected
        );
        assert_eq!(normalize_term_ids(&json!({"categories": 2})).unwrap().len(), 1);
        assert!(normalize_term_ids(&json!(null)).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_term_ids(&json!("1,2")).is_err());
        assert!(normalize_term_ids(&json!([true])).is_err());
        assert!(normalize_term_ids(&json!([{"slug": "news"}])).is_err());
        assert!(normalize_term_ids(&json!({"tags": [[1]]})).is_err());
    }

    #[tokio::test]
    async fn test_replace_and_group_by_taxonomy() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_term(&db, 1, "category", "news").await;
        seed_term(&db, 2, "tag", "rust").await;
        seed_term(&db, 3, "tag", "sql").await;

        let mut tx = db.begin_transaction().await.unwrap();
        RelationshipStore::replace(tx.conn(), 10, &[1, 2, 3].into_iter().collect())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let groups = RelationshipStore::list_by_entities(db.pool(), &[10]).await.unwrap();
        let post = &groups[&10];
        assert_eq!(post["category"].len(), 1);
        assert_eq!(post["category"][0].slug, "news");
        assert_eq!(
            post["tag"].iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test]
    async fn test_replace_with_empty_set_clears() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_term(&db, 1, "category", "news").await;

        let mut tx = db.begin_transaction().await.unwrap();
        RelationshipStore::replace(tx.conn(), 10, &[1].into_iter().collect()).await.unwrap();
        RelationshipStore::replace(tx.conn(), 10, &BTreeSet::new()).await.unwrap();
        tx.commit().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_terms")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
        let groups = RelationshipStore::list_by_entities(db.pool(), &[10]).await.unwrap();
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn test_trashed_terms_hidden() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        seed_term(&db, 1, "tag", "old").await;
        sqlx::query("UPDATE terms SET deleted_at = 'now' WHERE id = 1")
            .execute(db.pool())
            .await
            .unwrap();

        let mut tx = db.begin_transaction().await.unwrap();
        RelationshipStore::replace(tx.conn(), 4, &[1].into_iter().collect()).await.unwrap();
        tx.commit().await.unwrap();

        let groups = RelationshipStore::list_by_entities(db.pool(), &[4]).await.unwrap();
        assert!(groups.get(&4).is_none());
    }
}
