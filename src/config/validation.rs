//! Configuration validation, run at load time and by `--validate-config`.

use super::types::Config;

/// Whether the process is running in production mode
/// (`GRIMOIRE_ENV=production`).
pub fn is_production_mode() -> bool {
    std::env::var("GRIMOIRE_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

/// Validate security-relevant settings. In production a weak or missing
/// token secret is fatal; in development it is reported but tolerated.
pub fn validate_config_security(config: &Config) -> Result<(), String> {
    let mut problems: Vec<String> = Vec::new();

    if config.auth.jwt_secret.is_empty() {
        problems.push("auth.jwt_secret is empty; tokens cannot be verified".to_string());
    } else if config.auth.jwt_secret.len() < 32 {
        problems.push(format!(
            "auth.jwt_secret is only {} bytes; use at least 32",
            config.auth.jwt_secret.len()
        ));
    }
    if config.auth.jwt_ttl == 0 {
        problems.push("auth.jwt_ttl must be greater than zero".to_string());
    }
    if config.engine.subscriber_queue_depth == 0 {
        problems.push("engine.subscriber_queue_depth must be at least 1".to_string());
    }
    if config.engine.command_deadline_ms == 0 {
        problems.push("engine.command_deadline_ms must be greater than zero".to_string());
    }
    if config.gateway.heartbeat_timeout <= config.gateway.heartbeat_interval {
        problems.push(format!(
            "gateway.heartbeat_timeout ({}) must exceed heartbeat_interval ({})",
            config.gateway.heartbeat_timeout, config.gateway.heartbeat_interval
        ));
    }
    if config.http_addr.parse::<std::net::SocketAddr>().is_err() {
        problems.push(format!(
            "http_addr '{}' is not a valid socket address",
            config.http_addr
        ));
    }

    if problems.is_empty() {
        return Ok(());
    }
    let report = problems.join("\n");
    if is_production_mode() {
        Err(report)
    } else {
        // Development mode: report but do not block startup, matching the
        // permissive loader behavior.
        eprintln!("{report}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config_security(&valid_config()).is_ok());
    }

    #[test]
    fn test_bad_addr_reported_in_dev_mode() {
        let mut config = valid_config();
        config.http_addr = "nonsense".to_string();
        // Development mode tolerates problems.
        assert!(validate_config_security(&config).is_ok());
    }

    #[test]
    fn test_heartbeat_ordering_checked() {
        let mut config = valid_config();
        config.gateway.heartbeat_interval = 60;
        config.gateway.heartbeat_timeout = 30;
        // Still Ok in dev mode, but the problem is real; production mode
        // would reject it. We only assert it does not panic here since
        // GRIMOIRE_ENV is not set under test.
        assert!(validate_config_security(&config).is_ok());
    }
}
