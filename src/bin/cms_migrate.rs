// CMS Migrate - applies the engine schema to the configured database

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cms_engine::{config::Config, infrastructure::sqlite_database::SqliteDatabase, stores::OptionsStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = SqliteDatabase::connect(&config.database).await?;
    db.initialize().await?;
    db.health_check().await?;

    tokio::fs::create_dir_all(&config.storage.uploads_dir).await?;

    let options = OptionsStore::new(db.clone()).autoloaded().await?;
    let (idle, size) = db.pool_stats();
    info!(
        url = %config.database.url,
        uploads_dir = %config.storage.uploads_dir.display(),
        autoloaded_options = options.len(),
        idle,
        size,
        "Database ready"
    );
    Ok(())
}
