use serde::{Deserialize, Serialize};

use super::defaults;
use super::logging::LoggingConfig;

/// Root configuration, loaded from `config.json` with environment
/// overrides. Every field has a sensible default; a missing file is not an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// HTTP/WebSocket bind address.
    pub http_addr: String,
    /// Persistence target. `memory` is the built-in backend.
    pub db_dsn: String,
    pub auth: AuthConfig,
    pub engine: EngineConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: defaults::http_addr(),
            db_dsn: defaults::db_dsn(),
            auth: AuthConfig::default(),
            engine: EngineConfig::default(),
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Token signing settings shared with the external identity module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for bearer tokens. Required in production.
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_ttl: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: defaults::jwt_secret(),
            jwt_ttl: defaults::jwt_ttl(),
        }
    }
}

/// Engine timings and bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Applied events between snapshots.
    pub snapshot_interval: u64,
    /// Seconds a quiescent room actor stays loaded.
    pub room_idle_timeout: u64,
    /// Per-command deadline in milliseconds.
    pub command_deadline_ms: u64,
    /// Per-session outbound queue bound.
    pub subscriber_queue_depth: usize,
    /// Hours ended rooms are retained before GC.
    pub event_retention_hours: u64,
    /// Seconds between maintenance sweeps.
    pub sweep_interval: u64,
    /// Seconds graceful shutdown waits before aborting.
    pub shutdown_grace: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: defaults::snapshot_interval(),
            room_idle_timeout: defaults::room_idle_timeout(),
            command_deadline_ms: defaults::command_deadline_ms(),
            subscriber_queue_depth: defaults::subscriber_queue_depth(),
            event_retention_hours: defaults::event_retention_hours(),
            sweep_interval: defaults::sweep_interval(),
            shutdown_grace: defaults::shutdown_grace(),
        }
    }
}

/// WebSocket gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Seconds between server-side heartbeat pings.
    pub heartbeat_interval: u64,
    /// Seconds of inbound silence before the connection is closed.
    pub heartbeat_timeout: u64,
    /// Largest accepted text frame in bytes.
    pub max_frame_bytes: usize,
    /// Comma-separated allowed origins, or `*`.
    pub cors_origins: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: defaults::heartbeat_interval(),
            heartbeat_timeout: defaults::heartbeat_timeout(),
            max_frame_bytes: defaults::max_frame_bytes(),
            cors_origins: defaults::cors_origins(),
        }
    }
}
