//! Configuration management for the voice bridge
//!
//! Supports loading configuration from:
//! - YAML/TOML files under `config/`
//! - Environment variables (VOICE_BRIDGE_ prefix, `__` separator)
//!
//! Every value has a default in [`constants`], so an empty environment
//! yields a working sequential bridge.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, BackendSettings, BridgeMode, BridgeSettings, HistorySettings,
    ObservabilityConfig, RealtimeSettings, Settings, SimulatorSettings, VadSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
