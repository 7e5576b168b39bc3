pub mod config;
pub mod load_laptops;
pub mod load_rules;
pub mod migrate;
pub mod recompute;

use std::future::Future;
use std::sync::Arc;

use lapsel_core::config::{AppConfig, LoadOptions};
use lapsel_core::Engine;
use lapsel_db::{connect_with_settings, migrations, DbPool, SqlCatalogStore};
use serde::Serialize;

/// `(error_class, message, exit_code)` carried out of a failed command.
pub(crate) type CommandFailure = (&'static str, String, u8);

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads config, opens and migrates the catalog database, then hands the pool to `work`.
/// Every failure is mapped onto the shared exit-code classes.
pub(crate) fn with_catalog<F, Fut>(command: &str, work: F) -> CommandResult
where
    F: FnOnce(DbPool, AppConfig) -> Fut,
    Fut: Future<Output = Result<String, CommandFailure>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let outcome = work(pool.clone(), config).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => CommandResult::success(command, message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

/// [`with_catalog`] with an engine wired over the migrated database.
pub(crate) fn with_engine<F, Fut>(command: &str, work: F) -> CommandResult
where
    F: FnOnce(Engine) -> Fut,
    Fut: Future<Output = Result<String, CommandFailure>>,
{
    with_catalog(command, |pool, config| {
        work(Engine::from_config(Arc::new(SqlCatalogStore::new(pool)), &config))
    })
}

pub(crate) fn engine_failure(error: impl std::fmt::Display) -> CommandFailure {
    ("engine", error.to_string(), 7)
}

pub(crate) fn input_failure(error: impl std::fmt::Display) -> CommandFailure {
    ("input_file", error.to_string(), 6)
}

pub(crate) fn summarize(report: &impl Serialize) -> String {
    serde_json::to_string(report).unwrap_or_else(|error| format!("<unserializable: {error}>"))
}
