//! Signaling server configuration

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::MediaKind;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sfu: SfuConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum size of a single signaling frame in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Limits enforced by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Maximum number of concurrent peer sessions (0 = unlimited)
    pub max_peers: usize,
    /// Maximum consumer-role transports per peer (0 = unlimited)
    pub max_consumer_transports_per_peer: usize,
    /// Capacity of each peer's outbound event queue
    pub event_buffer: usize,
    /// Interval of the statistics log line (0 = disabled)
    pub stats_interval_seconds: u64,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            max_peers: 0,
            max_consumer_transports_per_peer: 16,
            event_buffer: 256,
            stats_interval_seconds: 30,
        }
    }
}

/// Router codec entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaCodecConfig {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Settings handed to the media engine at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub listen_ip: String,
    /// Public address announced in ICE candidates (defaults to `listen_ip`)
    pub announced_ip: Option<String>,
    pub port: u16,
    pub media_codecs: Vec<MediaCodecConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut h264_parameters = serde_json::Map::new();
        h264_parameters.insert("packetization-mode".to_string(), 1.into());
        h264_parameters.insert("profile-level-id".to_string(), "42e01f".into());
        h264_parameters.insert("level-asymmetry-allowed".to_string(), 1.into());

        Self {
            listen_ip: "0.0.0.0".to_string(),
            announced_ip: None,
            port: 40000,
            media_codecs: vec![
                MediaCodecConfig {
                    kind: MediaKind::Audio,
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: Some(2),
                    parameters: serde_json::Map::new(),
                },
                MediaCodecConfig {
                    kind: MediaKind::Video,
                    mime_type: "video/H264".to_string(),
                    clock_rate: 90000,
                    channels: None,
                    parameters: h264_parameters,
                },
            ],
        }
    }
}

impl EngineConfig {
    /// Address placed in ICE candidates
    #[must_use]
    pub fn public_ip(&self) -> &str {
        self.announced_ip.as_deref().unwrap_or(&self.listen_ip)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority, `SFU_SERVER__PORT` etc.)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SFU")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every configuration problem instead of stopping at the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.sfu.event_buffer == 0 {
            errors.push("sfu.event_buffer must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if self.engine.media_codecs.is_empty() {
            errors.push("engine.media_codecs must list at least one codec".to_string());
        }
        for (index, codec) in self.engine.media_codecs.iter().enumerate() {
            if codec.mime_type.trim().is_empty() {
                errors.push(format!("engine.media_codecs[{index}].mime_type is empty"));
            }
            if codec.clock_rate == 0 {
                errors.push(format!("engine.media_codecs[{index}].clock_rate must be non-zero"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Signaling listen address
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
