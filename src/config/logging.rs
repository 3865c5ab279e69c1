use serde::{Deserialize, Serialize};

use super::defaults;

/// Console/file log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Log level override; when absent, `RUST_LOG` (or `info`) applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level override; `RUST_LOG` wins when this is unset.
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    /// Also write to a rolling file under `dir`.
    pub enable_file_logging: bool,
    pub dir: String,
    pub filename: String,
    /// `daily`, `hourly`, or `never`.
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Text,
            enable_file_logging: false,
            dir: defaults::log_dir(),
            filename: defaults::log_filename(),
            rotation: defaults::log_rotation(),
        }
    }
}
