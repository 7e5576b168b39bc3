use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use lapsel_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: [(&str, String, &[&str]); 12] = [
        ("database.url", config.database.url.clone(), &["LAPSEL_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["LAPSEL_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["LAPSEL_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            &["LAPSEL_SERVER_BIND_ADDRESS"],
        ),
        ("server.port", config.server.port.to_string(), &["LAPSEL_SERVER_PORT"]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["LAPSEL_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "selection.default_amount",
            config.selection.default_amount.to_string(),
            &["LAPSEL_SELECTION_DEFAULT_AMOUNT"],
        ),
        (
            "selection.max_amount",
            config.selection.max_amount.to_string(),
            &["LAPSEL_SELECTION_MAX_AMOUNT"],
        ),
        (
            "scoring.max_concurrent_recomputes",
            config.scoring.max_concurrent_recomputes.to_string(),
            &["LAPSEL_SCORING_MAX_CONCURRENT_RECOMPUTES"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["LAPSEL_LOGGING_LEVEL", "LAPSEL_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["LAPSEL_LOGGING_FORMAT", "LAPSEL_LOG_FORMAT"],
        ),
        (
            "config.file",
            config_file_path
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            &[],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in &fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, value, source));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("lapsel.toml"), PathBuf::from("config/lapsel.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|env_key| env::var_os(env_key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn file_keys_are_attributed_to_the_file() {
        let doc = "[selection]\nmax_amount = 20\n".parse::<Value>().expect("toml");

        assert!(contains_path(&doc, "selection.max_amount"));
        assert!(!contains_path(&doc, "selection.default_amount"));
        assert_eq!(
            field_source("selection.max_amount", &[], Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(
            field_source("scoring.max_concurrent_recomputes", &[], Some(&doc), None),
            "default"
        );
    }
}
