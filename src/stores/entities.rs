// Entity Store - core rows of posts and terms

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{Executor, QueryBuilder, Row};
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::slug;
use crate::core::strong_types::{ColumnType, CoreColumn, EntityId, EntityKind, IdOrSlug};
use crate::error::{AppError, AppResult};

/// Value of a writable core column, typed for binding
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(Option<String>),
    Integer(Option<i64>),
}

impl ColumnValue {
    /// Coerce a payload value into the column's storage type
    pub fn from_json(column: &CoreColumn, value: &Value) -> AppResult<Self> {
        match column.column_type {
            ColumnType::Text => Ok(ColumnValue::Text(match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                other => Some(other.to_string()),
            })),
            ColumnType::Integer => match value {
                Value::Null => Ok(ColumnValue::Integer(None)),
                Value::Number(n) => n.as_i64().map(|i| ColumnValue::Integer(Some(i))).ok_or_else(|| {
                    AppError::Validation(format!("{} must be an integer", column.name))
                }),
                Value::String(s) if s.trim().is_empty() => Ok(ColumnValue::Integer(None)),
                Value::String(s) => s.trim().parse().map(|i| ColumnValue::Integer(Some(i))).map_err(|_| {
                    AppError::Validation(format!("{} must be an integer, got '{}'", column.name, s))
                }),
                other => Err(AppError::Validation(format!(
                    "{} must be an integer, got {}",
                    column.name, other
                ))),
            },
            ColumnType::Timestamp => Err(AppError::Validation(format!(
                "{} is managed by the server",
                column.name
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ColumnValue::Text(Some(s)) => Value::String(s.clone()),
            ColumnValue::Integer(Some(i)) => Value::from(*i),
            ColumnValue::Text(None) | ColumnValue::Integer(None) => Value::Null,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(Some(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Writable core column values keyed by column name
pub type CoreValues = BTreeMap<&'static str, ColumnValue>;

/// Core row of an entity. Kind-specific columns are flattened next to the shared ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRow {
    pub id: EntityId,
    pub type_slug: String,
    pub slug: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub columns: Map<String, Value>,
}

const SHARED_COLUMNS: &[&str] = &[
    "id",
    "type_slug",
    "slug",
    "status",
    "created_at",
    "updated_at",
    "deleted_at",
];

impl EntityRow {
    pub fn from_row(kind: EntityKind, row: &SqliteRow) -> AppResult<Self> {
        let decode_err =
            |e: sqlx::Error| AppError::DatabaseError(format!("Failed to decode {} row: {}", kind, e));

        let mut columns = Map::new();
        for column in kind.columns() {
            if SHARED_COLUMNS.contains(&column.name) {
                continue;
            }
            let value = match column.column_type {
                ColumnType::Text => row
                    .try_get::<Option<String>, _>(column.name)
                    .map_err(decode_err)?
                    .map(Value::String)
                    .unwrap_or(Value::Null),
                ColumnType::Integer => row
                    .try_get::<Option<i64>, _>(column.name)
                    .map_err(decode_err)?
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                ColumnType::Timestamp => row
                    .try_get::<Option<DateTime<Utc>>, _>(column.name)
                    .map_err(decode_err)?
                    .map(|t| Value::String(t.to_rfc3339()))
                    .unwrap_or(Value::Null),
            };
            columns.insert(column.name.to_string(), value);
        }

        Ok(Self {
            id: row.try_get("id").map_err(decode_err)?,
            type_slug: row.try_get("type_slug").map_err(decode_err)?,
            slug: row.try_get("slug").map_err(decode_err)?,
            status: row.try_get("status").map_err(decode_err)?,
            created_at: row.try_get("created_at").map_err(decode_err)?,
            updated_at: row.try_get("updated_at").map_err(decode_err)?,
            deleted_at: row.try_get("deleted_at").map_err(decode_err)?,
            columns,
        })
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Core value of a column as JSON, shared or kind-specific
    pub fn column_value(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id)),
            "type_slug" => Some(Value::String(self.type_slug.clone())),
            "slug" => Some(Value::String(self.slug.clone())),
            "status" => Some(Value::String(self.status.clone())),
            "created_at" => Some(Value::String(self.created_at.to_rfc3339())),
            "updated_at" => Some(Value::String(self.updated_at.to_rfc3339())),
            "deleted_at" => Some(
                self.deleted_at
                    .map(|t| Value::String(t.to_rfc3339()))
                    .unwrap_or(Value::Null),
            ),
            other => self.columns.get(other).cloned(),
        }
    }
}

pub struct EntityStore;

impl EntityStore {
    /// Look up a live or trashed row of `type_slug`. Slug lookups resolve to the lowest id.
    pub async fn find<'e, E>(
        executor: E,
        kind: EntityKind,
        type_slug: &str,
        key: &IdOrSlug,
    ) -> AppResult<Option<EntityRow>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM {} e WHERE e.type_slug = ",
            kind.select_list(),
            kind.table()
        ));
        qb.push_bind(type_slug.to_string());
        match key {
            IdOrSlug::Id(id) => {
                qb.push(" AND e.id = ").push_bind(*id);
            }
            IdOrSlug::Slug(slug) => {
                qb.push(" AND e.slug = ").push_bind(slug.clone());
            }
        }
        qb.push(" ORDER BY e.id ASC LIMIT 1");

        let row = qb.build().fetch_optional(executor).await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to load {} '{}': {}", kind, key, e))
        })?;

        row.as_ref().map(|r| EntityRow::from_row(kind, r)).transpose()
    }

    /// Insert a core row and return its id
    pub async fn insert(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        type_slug: &str,
        values: &CoreValues,
    ) -> AppResult<EntityId> {
        let now = Utc::now();
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "INSERT INTO {} (type_slug, created_at, updated_at",
            kind.table()
        ));
        for name in values.keys() {
            qb.push(", ").push(*name);
        }
        qb.push(") VALUES (");
        let mut separated = qb.separated(", ");
        separated.push_bind(type_slug.to_string());
        separated.push_bind(now);
        separated.push_bind(now);
        for value in values.values() {
            match value {
                ColumnValue::Text(v) => separated.push_bind(v.clone()),
                ColumnValue::Integer(v) => separated.push_bind(*v),
            };
        }
        separated.push_unseparated(")");

        let result = qb
            .build()
            .execute(conn)
            .await
            .map_err(|e| write_error(e, format!("Failed to insert {} of type {}", kind, type_slug)))?;

        let id = result.last_insert_rowid();
        debug!(%kind, type_slug, id, "Inserted core row");
        Ok(id)
    }

    /// Write core columns. `updated_at` is always bumped; `untrash` clears `deleted_at`.
    pub async fn update(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        id: EntityId,
        values: &CoreValues,
        untrash: bool,
    ) -> AppResult<()> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET updated_at = ", kind.table()));
        qb.push_bind(Utc::now());
        for (name, value) in values {
            qb.push(", ").push(*name).push(" = ");
            match value {
                ColumnValue::Text(v) => qb.push_bind(v.clone()),
                ColumnValue::Integer(v) => qb.push_bind(*v),
            };
        }
        if untrash {
            qb.push(", deleted_at = NULL");
        }
        qb.push(" WHERE id = ").push_bind(id);

        qb.build()
            .execute(conn)
            .await
            .map_err(|e| write_error(e, format!("Failed to update {} {}", kind, id)))?;
        Ok(())
    }

    /// Move a live row to the trash. Rows already trashed are left untouched.
    pub async fn soft_delete(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        id: EntityId,
    ) -> AppResult<bool> {
        let now = Utc::now();
        let sql = format!(
            "UPDATE {} SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to trash {} {}: {}", kind, id, e)))?;
        Ok(result.rows_affected() > 0)
    }

    /// Physically remove the core row. Cascades are the caller's job.
    pub async fn delete(conn: &mut SqliteConnection, kind: EntityKind, id: EntityId) -> AppResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", kind.table());
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(conn)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete {} {}: {}", kind, id, e)))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn slug_taken<'e, E>(
        executor: E,
        kind: EntityKind,
        type_slug: &str,
        slug: &str,
        exclude_id: Option<EntityId>,
    ) -> AppResult<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT 1 FROM {} WHERE type_slug = ? AND slug = ? AND (? IS NULL OR id != ?) LIMIT 1",
            kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(type_slug)
            .bind(slug)
            .bind(exclude_id)
            .bind(exclude_id)
            .fetch_optional(executor)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to check slug '{}': {}", slug, e)))?;
        Ok(row.is_some())
    }

    /// First free slug among `base`, `base-2`, `base-3`, ... within the type
    pub async fn unique_slug(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        type_slug: &str,
        base: &str,
        exclude_id: Option<EntityId>,
    ) -> AppResult<String> {
        if !Self::slug_taken(&mut *conn, kind, type_slug, base, exclude_id).await? {
            return Ok(base.to_string());
        }
        let mut n = 2;
        loop {
            let candidate = slug::with_suffix(base, n);
            if !Self::slug_taken(&mut *conn, kind, type_slug, &candidate, exclude_id).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

/// Unique violations can only come from the `(type_slug, slug)` index
fn write_error(e: sqlx::Error, context: String) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("{}: slug already taken", context))
        }
        _ => AppError::DatabaseError(format!("{}: {}", context, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sqlite_database::SqliteDatabase;
    use serde_json::json;

    fn post_values(slug: &str, title: &str) -> CoreValues {
        let mut values = CoreValues::new();
        values.insert("slug", ColumnValue::Text(Some(slug.to_string())));
        values.insert("title", ColumnValue::Text(Some(title.to_string())));
        values.insert("status", ColumnValue::Text(Some("draft".to_string())));
        values
    }

    #[test]
    fn test_column_value_coercion() {
        let parent = EntityKind::Term.column("parent_id").unwrap();
        assert_eq!(
            ColumnValue::from_json(parent, &json!("12")).unwrap(),
            ColumnValue::Integer(Some(12))
        );
        assert_eq!(ColumnValue::from_json(parent, &json!(null)).unwrap(), ColumnValue::Integer(None));
        assert!(ColumnValue::from_json(parent, &json!("twelve")).is_err());

        let title = EntityKind::Post.column("title").unwrap();
        assert_eq!(
            ColumnValue::from_json(title, &json!(42)).unwrap(),
            ColumnValue::Text(Some("42".to_string()))
        );
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id_or_slug() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();
        let id = EntityStore::insert(tx.conn(), EntityKind::Post, "page", &post_values("about", "About"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let by_id = EntityStore::find(db.pool(), EntityKind::Post, "page", &IdOrSlug::Id(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.slug, "about");
        assert_eq!(by_id.columns["title"], json!("About"));
        assert_eq!(by_id.columns["content"], Value::Null);
        assert!(!by_id.is_trashed());

        let by_slug = EntityStore::find(db.pool(), EntityKind::Post, "page", &IdOrSlug::from("about"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_slug.id, id);

        let other_type = EntityStore::find(db.pool(), EntityKind::Post, "post", &IdOrSlug::Id(id))
            .await
            .unwrap();
        assert!(other_type.is_none());
    }

    #[tokio::test]
    async fn test_unique_slug_suffixes() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();
        let first = EntityStore::insert(tx.conn(), EntityKind::Post, "post", &post_values("hello", "Hello"))
            .await
            .unwrap();
        EntityStore::insert(tx.conn(), EntityKind::Post, "post", &post_values("hello-2", "Hello"))
            .await
            .unwrap();

        let next = EntityStore::unique_slug(tx.conn(), EntityKind::Post, "post", "hello", None)
            .await
            .unwrap();
        assert_eq!(next, "hello-3");

        let own = EntityStore::unique_slug(tx.conn(), EntityKind::Post, "post", "hello", Some(first))
            .await
            .unwrap();
        assert_eq!(own, "hello");

        let other_type = EntityStore::unique_slug(tx.conn(), EntityKind::Post, "page", "hello", None)
            .await
            .unwrap();
        assert_eq!(other_type, "hello");
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_slug_is_a_conflict() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();
        let first = EntityStore::insert(tx.conn(), EntityKind::Post, "post", &post_values("taken", "One"))
            .await
            .unwrap();
        let second = EntityStore::insert(tx.conn(), EntityKind::Post, "post", &post_values("free", "Two"))
            .await
            .unwrap();

        let insert = EntityStore::insert(tx.conn(), EntityKind::Post, "post", &post_values("taken", "Three")).await;
        assert!(matches!(insert, Err(AppError::Conflict(_))));

        let mut rename = CoreValues::new();
        rename.insert("slug", ColumnValue::Text(Some("taken".to_string())));
        let update = EntityStore::update(tx.conn(), EntityKind::Post, second, &rename, false).await;
        assert!(matches!(update, Err(AppError::Conflict(_))));

        // The failed statements leave the transaction usable
        let found = EntityStore::find(tx.conn(), EntityKind::Post, "post", &IdOrSlug::Slug("taken".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_soft_delete_and_untrash() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();
        let id = EntityStore::insert(tx.conn(), EntityKind::Post, "post", &post_values("a", "A"))
            .await
            .unwrap();
        assert!(EntityStore::soft_delete(tx.conn(), EntityKind::Post, id).await.unwrap());
        assert!(!EntityStore::soft_delete(tx.conn(), EntityKind::Post, id).await.unwrap());
        tx.commit().await.unwrap();

        let trashed = EntityStore::find(db.pool(), EntityKind::Post, "post", &IdOrSlug::Id(id))
            .await
            .unwrap()
            .unwrap();
        assert!(trashed.is_trashed());

        let mut changes = CoreValues::new();
        changes.insert("title", ColumnValue::Text(Some("B".to_string())));
        let mut tx = db.begin_transaction().await.unwrap();
        EntityStore::update(tx.conn(), EntityKind::Post, id, &changes, true).await.unwrap();
        tx.commit().await.unwrap();

        let restored = EntityStore::find(db.pool(), EntityKind::Post, "post", &IdOrSlug::Id(id))
            .await
            .unwrap()
            .unwrap();
        assert!(!restored.is_trashed());
        assert_eq!(restored.column_value("title"), Some(json!("B")));
        assert!(restored.updated_at >= trashed.updated_at);
    }

    #[tokio::test]
    async fn test_term_columns_decoded() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let mut values = CoreValues::new();
        values.insert("slug", ColumnValue::Text(Some("rust".to_string())));
        values.insert("name", ColumnValue::Text(Some("Rust".to_string())));
        values.insert("parent_id", ColumnValue::Integer(Some(3)));

        let mut tx = db.begin_transaction().await.unwrap();
        let id = EntityStore::insert(tx.conn(), EntityKind::Term, "tag", &values).await.unwrap();
        assert!(!EntityStore::delete(tx.conn(), EntityKind::Term, id + 100).await.unwrap());
        tx.commit().await.unwrap();

        let row = EntityStore::find(db.pool(), EntityKind::Term, "tag", &IdOrSlug::Id(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.columns["parent_id"], json!(3));
        assert_eq!(row.status, "draft");
    }
}
