// Options Store - named site-wide settings stored as canonical JSON

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::Row;
use tracing::debug;

use crate::core::canonical_json;
use crate::error::{AppError, AppResult};
use crate::infrastructure::sqlite_database::SqliteDatabase;

#[derive(Clone)]
pub struct OptionsStore {
    db: SqliteDatabase,
}

impl OptionsStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    pub async fn get(&self, name: &str) -> AppResult<Option<Value>> {
        let raw: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM options WHERE name = ?")
                .bind(name)
                .fetch_optional(self.db.pool())
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to load option '{}': {}", name, e))
                })?;

        Ok(raw.map(|value| value.as_deref().map(canonical_json::decode).unwrap_or(Value::Null)))
    }

    /// Create or overwrite an option
    pub async fn set(&self, name: &str, value: &Value, autoload: bool) -> AppResult<()> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Option name cannot be empty".to_string()));
        }

        sqlx::query(
            "INSERT INTO options (name, value, autoload, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, \
             autoload = excluded.autoload, updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(canonical_json::encode(value)?)
        .bind(autoload)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to save option '{}': {}", name, e)))?;

        debug!(name, autoload, "Option saved");
        Ok(())
    }

    /// Returns whether the option existed
    pub async fn delete(&self, name: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM options WHERE name = ?")
            .bind(name)
            .execute(self.db.pool())
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to delete option '{}': {}", name, e))
            })?;
        Ok(result.rows_affected() > 0)
    }

    /// Every option flagged for loading at boot
    pub async fn autoloaded(&self) -> AppResult<Map<String, Value>> {
        let rows = sqlx::query("SELECT name, value FROM options WHERE autoload = 1 ORDER BY name")
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load options: {}", e)))?;

        let mut options = Map::new();
        for row in rows {
            let raw: Option<String> = row.get("value");
            options.insert(
                row.get("name"),
                raw.as_deref().map(canonical_json::decode).unwrap_or(Value::Null),
            );
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_overwrite_delete() {
        let store = OptionsStore::new(SqliteDatabase::new_in_memory().await.unwrap());

        assert_eq!(store.get("site_title").await.unwrap(), None);
        store.set("site_title", &json!("Hello"), true).await.unwrap();
        store.set("site_title", &json!("Renamed"), true).await.unwrap();
        assert_eq!(store.get("site_title").await.unwrap(), Some(json!("Renamed")));

        assert!(store.delete("site_title").await.unwrap());
        assert!(!store.delete("site_title").await.unwrap());
    }

    #[tokio::test]
    async fn test_autoloaded_only() {
        let store = OptionsStore::new(SqliteDatabase::new_in_memory().await.unwrap());
        store.set("theme", &json!({"name": "dark", "accent": "#fff"}), true).await.unwrap();
        store.set("secret_report", &json!([1, 2]), false).await.unwrap();

        let loaded = store.autoloaded().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["theme"]["name"], json!("dark"));
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let store = OptionsStore::new(SqliteDatabase::new_in_memory().await.unwrap());
        assert!(matches!(
            store.set("  ", &json!(1), true).await,
            Err(AppError::Validation(_))
        ));
    }
}
