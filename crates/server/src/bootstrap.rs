use std::sync::Arc;

use lapsel_core::config::{AppConfig, ConfigError, LoadOptions};
use lapsel_core::Engine;
use lapsel_db::{connect_with_settings, migrations, DbPool, SqlCatalogStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Engine,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

#[allow(dead_code)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlCatalogStore::new(db_pool.clone()));
    let engine = Engine::from_config(store, &config);
    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        default_amount = config.selection.default_amount,
        max_amount = config.selection.max_amount,
        max_concurrent_recomputes = config.scoring.max_concurrent_recomputes,
        "selection engine wired"
    );

    Ok(Application { config, db_pool, engine })
}
