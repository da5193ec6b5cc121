//! Configuration for the voicebridge server
//!
//! Layered settings: `config/default.yaml`, an optional
//! environment-specific file, then `VOICEBRIDGE__`-prefixed environment
//! variables, highest priority last.

pub mod settings;

pub use settings::{
    load_settings, IceServerConfig, Modality, ObservabilityConfig, QueueConfig, RtcConfig,
    ServerConfig, Settings, StreamConfig, StreamMode, TrackConstraints,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
