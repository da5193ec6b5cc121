//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Stream behavior (modality, mode, limits, ICE)
    #[serde(default)]
    pub stream: StreamConfig,

    /// Bounded queue sizing
    #[serde(default)]
    pub queues: QueueConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(limit) = self.stream.concurrency_limit {
            if limit == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "stream.concurrency_limit".to_string(),
                    message: "must be at least 1 when set".to_string(),
                });
            }
        }
        if self.queues.outputs_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queues.outputs_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Media modality of a mounted stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    #[default]
    Audio,
    Video,
    AudioVideo,
}

impl Modality {
    pub fn has_audio(&self) -> bool {
        matches!(self, Modality::Audio | Modality::AudioVideo)
    }

    pub fn has_video(&self) -> bool {
        matches!(self, Modality::Video | Modality::AudioVideo)
    }
}

/// Direction of the media flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StreamMode {
    #[default]
    SendReceive,
    Send,
    Receive,
}

/// Stream behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub modality: Modality,

    #[serde(default)]
    pub mode: StreamMode,

    /// Maximum concurrent sessions; unbounded when unset
    #[serde(default)]
    pub concurrency_limit: Option<usize>,

    /// Hard session lifetime in seconds; unlimited when unset
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// ICE servers and transport policy handed to peers
    #[serde(default)]
    pub rtc: RtcConfig,

    /// Client capture hints, relayed verbatim during negotiation
    #[serde(default)]
    pub track_constraints: TrackConstraints,

    /// RTP sender parameters (degradation preference et al.)
    #[serde(default)]
    pub rtp_params: serde_json::Value,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            modality: Modality::Audio,
            mode: StreamMode::SendReceive,
            concurrency_limit: None,
            time_limit: None,
            rtc: RtcConfig::default(),
            track_constraints: TrackConstraints::default(),
            rtp_params: serde_json::Value::Null,
        }
    }
}

/// One ICE server entry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IceServerConfig {
    pub urls: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub credential: Option<String>,
}

/// ICE configuration surfaced at negotiation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcConfig {
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    /// "all" or "relay"
    #[serde(default = "default_transport_policy")]
    pub ice_transport_policy: String,
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}

fn default_transport_policy() -> String {
    "all".to_string()
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_transport_policy: default_transport_policy(),
        }
    }
}

/// Client-side capture hints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConstraints {
    #[serde(default = "default_true")]
    pub echo_cancellation: bool,

    #[serde(default = "default_true")]
    pub noise_suppression: bool,

    #[serde(default)]
    pub sample_rate: Option<u32>,

    #[serde(default)]
    pub channel_count: Option<u8>,
}

impl Default for TrackConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            sample_rate: None,
            channel_count: None,
        }
    }
}

/// Bounded queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Frames the inbound handler queue holds before dropping oldest
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Retained `AdditionalOutputs` entries per session
    #[serde(default = "default_outputs_capacity")]
    pub outputs_capacity: usize,
}

fn default_inbound_capacity() -> usize {
    64
}
fn default_outputs_capacity() -> usize {
    128
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: default_inbound_capacity(),
            outputs_capacity: default_outputs_capacity(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix every route is mounted under
    #[serde(default)]
    pub mount_prefix: String,

    /// POST route the client sends fresh input values to
    #[serde(default = "default_input_hook")]
    pub input_hook_path: String,

    /// GET route serving queued outputs as server-sent events
    #[serde(default = "default_output_hook")]
    pub output_hook_path: String,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_input_hook() -> String {
    "/input_hook".to_string()
}
fn default_output_hook() -> String {
    "/outputs".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mount_prefix: String::new(),
            input_hook_path: default_input_hook(),
            output_hook_path: default_output_hook(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of the human format
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOICEBRIDGE__ prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICEBRIDGE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.stream.modality, Modality::Audio);
        assert_eq!(settings.stream.mode, StreamMode::SendReceive);
        assert!(settings.stream.concurrency_limit.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_limit() {
        let mut settings = Settings::default();
        settings.stream.concurrency_limit = Some(0);
        assert!(settings.validate().is_err());

        settings.stream.concurrency_limit = Some(4);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_modality_helpers() {
        assert!(Modality::Audio.has_audio());
        assert!(!Modality::Audio.has_video());
        assert!(Modality::AudioVideo.has_audio());
        assert!(Modality::AudioVideo.has_video());
    }
}
