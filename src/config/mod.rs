//! Configuration: JSON file + environment overrides + defaults.
//!
//! # Module structure
//!
//! - [`types`]: root `Config` struct and sections
//! - [`logging`]: logging configuration
//! - [`loader`]: loading functions
//! - [`validation`]: security validation
//! - [`defaults`]: default value functions

pub mod defaults;
pub mod loader;
pub mod logging;
pub mod types;
pub mod validation;

pub use loader::load;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use types::{AuthConfig, Config, EngineConfig, GatewayConfig};
pub use validation::{is_production_mode, validate_config_security};
