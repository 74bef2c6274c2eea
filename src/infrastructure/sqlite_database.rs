// Database Layer - SQLite pool, schema and transaction wrapper for the entity engine

use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Transaction;
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

const SCHEMA: &[(&str, &str)] = &[
    (
        "posts table",
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type_slug TEXT NOT NULL,
            slug TEXT NOT NULL,
            title TEXT,
            content TEXT,
            excerpt TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    ),
    (
        "terms table",
        r#"
        CREATE TABLE IF NOT EXISTS terms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type_slug TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT,
            description TEXT,
            parent_id INTEGER,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    ),
    (
        "post meta table",
        r#"
        CREATE TABLE IF NOT EXISTS post_meta (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL,
            field_slug TEXT NOT NULL,
            value TEXT,
            UNIQUE (entity_id, field_slug)
        )
        "#,
    ),
    (
        "term meta table",
        r#"
        CREATE TABLE IF NOT EXISTS term_meta (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL,
            field_slug TEXT NOT NULL,
            value TEXT,
            UNIQUE (entity_id, field_slug)
        )
        "#,
    ),
    (
        "post revisions table",
        r#"
        CREATE TABLE IF NOT EXISTS post_revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL,
            field_slug TEXT NOT NULL,
            value TEXT,
            author_id INTEGER,
            comment TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "term revisions table",
        r#"
        CREATE TABLE IF NOT EXISTS term_revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL,
            field_slug TEXT NOT NULL,
            value TEXT,
            author_id INTEGER,
            comment TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "post authors table",
        r#"
        CREATE TABLE IF NOT EXISTS post_authors (
            entity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (entity_id, user_id)
        )
        "#,
    ),
    (
        "term authors table",
        r#"
        CREATE TABLE IF NOT EXISTS term_authors (
            entity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (entity_id, user_id)
        )
        "#,
    ),
    (
        "post terms table",
        r#"
        CREATE TABLE IF NOT EXISTS post_terms (
            post_id INTEGER NOT NULL,
            term_id INTEGER NOT NULL,
            PRIMARY KEY (post_id, term_id)
        )
        "#,
    ),
    (
        "options table",
        r#"
        CREATE TABLE IF NOT EXISTS options (
            name TEXT PRIMARY KEY,
            value TEXT,
            autoload INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "posts slug index",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_posts_type_slug ON posts(type_slug, slug)",
    ),
    (
        "terms slug index",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_terms_type_slug ON terms(type_slug, slug)",
    ),
    (
        "post revisions index",
        "CREATE INDEX IF NOT EXISTS idx_post_revisions_field ON post_revisions(entity_id, field_slug, id DESC)",
    ),
    (
        "term revisions index",
        "CREATE INDEX IF NOT EXISTS idx_term_revisions_field ON term_revisions(entity_id, field_slug, id DESC)",
    ),
    (
        "post authors user index",
        "CREATE INDEX IF NOT EXISTS idx_post_authors_user ON post_authors(user_id)",
    ),
    (
        "term authors user index",
        "CREATE INDEX IF NOT EXISTS idx_term_authors_user ON term_authors(user_id)",
    ),
    (
        "post terms term index",
        "CREATE INDEX IF NOT EXISTS idx_post_terms_term ON post_terms(term_id)",
    ),
];

/// Transaction wrapper for multi-statement mutations
pub struct DatabaseTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl DatabaseTransaction {
    pub fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// Connection the transaction's statements run on
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit the transaction
    pub async fn commit(self) -> AppResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transaction: {}", e)))
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> AppResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to rollback transaction: {}", e)))
    }
}

/// SQLite connection pool holding every engine table
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| {
                AppError::ConfigurationError(format!("Invalid database url {}: {}", config.url, e))
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = config.url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory {
            1
        } else {
            config.max_connections.max(1)
        });
        if in_memory {
            // Each connection would otherwise see its own empty database
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to connect to {}: {}", config.url, e))
        })?;

        info!(url = %config.url, in_memory, "Connected to SQLite");
        Ok(Self { pool })
    }

    /// Fresh in-memory database with the schema applied
    pub async fn new_in_memory() -> AppResult<Self> {
        let db = Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await?;
        db.initialize().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create every engine table and index if missing
    pub async fn initialize(&self) -> AppResult<()> {
        for (label, statement) in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to create {}: {}", label, e)))?;
        }
        info!(statements = SCHEMA.len(), "Schema initialized");
        Ok(())
    }

    pub async fn begin_transaction(&self) -> AppResult<DatabaseTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;
        Ok(DatabaseTransaction::new(tx))
    }

    /// Health check to verify database connectivity
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Database health check failed: {}", e)))?;
        Ok(())
    }

    /// Get connection pool statistics (idle, total)
    pub fn pool_stats(&self) -> (u32, u32) {
        (self.pool.num_idle() as u32, self.pool.size())
    }
}
