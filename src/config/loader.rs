//! Configuration loading: `config.json` if present, then environment
//! overrides, then code defaults for everything else.

use std::path::Path;

use super::types::Config;
use super::validation::validate_config_security;

/// Environment variable naming the config file path.
const CONFIG_PATH_ENV: &str = "GRIMOIRE_CONFIG";
/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Load configuration. Never fails: unreadable or invalid files fall back
/// to defaults with a message on stderr (logging is not up yet).
pub fn load() -> Config {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let mut config = load_file(Path::new(&path));
    apply_env_overrides(&mut config);

    if let Err(err) = validate_config_security(&config) {
        eprintln!("Configuration warning:\n{err}");
    }
    config
}

fn load_file(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Config>(&contents) {
            Ok(config) => config,
            Err(err) => {
                eprintln!(
                    "Failed to parse config file '{}': {err}; using defaults",
                    path.display()
                );
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(value) = std::env::var("GRIMOIRE_HTTP_ADDR") {
        config.http_addr = value;
    }
    if let Ok(value) = std::env::var("GRIMOIRE_DB_DSN") {
        config.db_dsn = value;
    }
    if let Ok(value) = std::env::var("GRIMOIRE_JWT_SECRET") {
        config.auth.jwt_secret = value;
    }
    if let Ok(value) = std::env::var("GRIMOIRE_JWT_TTL") {
        if let Ok(parsed) = value.parse() {
            config.auth.jwt_ttl = parsed;
        }
    }
    if let Ok(value) = std::env::var("GRIMOIRE_SNAPSHOT_INTERVAL") {
        if let Ok(parsed) = value.parse() {
            config.engine.snapshot_interval = parsed;
        }
    }
    if let Ok(value) = std::env::var("GRIMOIRE_ROOM_IDLE_TIMEOUT") {
        if let Ok(parsed) = value.parse() {
            config.engine.room_idle_timeout = parsed;
        }
    }
    if let Ok(value) = std::env::var("GRIMOIRE_COMMAND_DEADLINE_MS") {
        if let Ok(parsed) = value.parse() {
            config.engine.command_deadline_ms = parsed;
        }
    }
    if let Ok(value) = std::env::var("GRIMOIRE_SUBSCRIBER_QUEUE_DEPTH") {
        if let Ok(parsed) = value.parse() {
            config.engine.subscriber_queue_depth = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_file(Path::new("/nonexistent/config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "engine": { "snapshot_interval": 7 } }"#).unwrap();

        let config = load_file(&path);
        assert_eq!(config.engine.snapshot_interval, 7);
        assert_eq!(
            config.engine.subscriber_queue_depth,
            Config::default().engine.subscriber_queue_depth
        );
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = load_file(&path);
        assert_eq!(config, Config::default());
    }
}
