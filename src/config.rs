use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub query: QueryConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Pagination bounds applied by the query compiler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_limit: u32,
    pub max_limit: u32,
    /// Status values reported as `total_<status>` buckets by `list`
    pub status_buckets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory attachment files must live under
    pub uploads_dir: PathBuf,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            status_buckets: vec!["published".to_string(), "draft".to_string()],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("data/uploads"),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = QueryConfig::default();
        let query = QueryConfig {
            default_limit: env::var("QUERY_DEFAULT_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(defaults.default_limit),
            max_limit: env::var("QUERY_MAX_LIMIT")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(defaults.max_limit),
            status_buckets: env::var("QUERY_STATUS_BUCKETS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.status_buckets),
        };

        if query.default_limit == 0 || query.default_limit > query.max_limit {
            anyhow::bail!(
                "QUERY_DEFAULT_LIMIT must be between 1 and QUERY_MAX_LIMIT ({})",
                query.max_limit
            );
        }

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/cms.db?mode=rwc".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            query,
            storage: StorageConfig {
                uploads_dir: env::var("UPLOADS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| StorageConfig::default().uploads_dir),
            },
        })
    }

    /// Configuration for an isolated in-memory database, used by tests and tooling
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            query: QueryConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
