//! Configuration loading and types for avcast
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/avcast/config.toml)
//! 3. Environment variables (AVCAST_*)
//! 4. CLI arguments (highest priority)

use crate::error::AvcastError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Avcast Configuration
#
# Location: ~/.config/avcast/config.toml
# All settings can be overridden via CLI flags

[audio]
# Set false to disable audio capture entirely
enabled = true

# PCM sample rate in Hz
sample_rate = 16000

# Channel count (1 = mono, 2 = stereo)
channels = 1

# Bytes per sample per channel (2 = 16-bit PCM)
sample_bytes = 2

# Pace reads to real time (disable for offline/synthetic runs)
pace = true

[video]
# Set false to disable video capture entirely
enabled = true

# JPEG quality for transcoded frames (1-100)
jpeg_quality = 80

# Pace grabs to the sensor frame rate
pace = true

[sensor]
# Where applied sensor settings are persisted.
# "auto" uses the config directory, "disabled" turns persistence off.
persist_file = "auto"

[timeouts]
# All timeouts are fail-open: on expiry the producer proceeds,
# accepting a dropped event rather than a stalled capture loop.

# Peripheral read timeout per unit
read_ms = 25

# Rendezvous gate wait before publishing each unit
gate_ms = 500

# Drain wait after each publish
drain_ms = 500

# Bus acceptance timeout for Data publishes
publish_ms = 10

# Bounded wait for a worker to report terminated on stop
stop_wait_ms = 100
"#;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Whether audio capture is available on this deployment
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// PCM sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Channel count
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Bytes per sample per channel
    #[serde(default = "default_sample_bytes")]
    pub sample_bytes: u16,

    /// Pace reads to real time (a 20ms slice takes 20ms)
    #[serde(default = "default_true")]
    pub pace: bool,
}

/// Video capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoConfig {
    /// Whether video capture is available on this deployment
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JPEG quality for transcoded frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Pace grabs to the sensor frame rate
    #[serde(default = "default_true")]
    pub pace: bool,
}

/// Sensor settings persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorConfig {
    /// "auto", "disabled", or an explicit path
    #[serde(default = "default_persist_file")]
    pub persist_file: String,
}

/// Timeouts for the capture pipeline. Uniformly fail-open: on expiry
/// the caller proceeds instead of blocking.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Peripheral read timeout per unit (ms)
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,

    /// Rendezvous gate wait before each publish (ms)
    #[serde(default = "default_gate_ms")]
    pub gate_ms: u64,

    /// Drain wait after each publish (ms)
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,

    /// Bus acceptance timeout for Data publishes (ms)
    #[serde(default = "default_publish_ms")]
    pub publish_ms: u64,

    /// Bounded wait for worker termination on stop (ms)
    #[serde(default = "default_stop_wait_ms")]
    pub stop_wait_ms: u64,
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_sample_bytes() -> u16 {
    2
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_persist_file() -> String {
    "auto".to_string()
}

fn default_read_ms() -> u64 {
    25
}

fn default_gate_ms() -> u64 {
    500
}

fn default_drain_ms() -> u64 {
    500
}

fn default_publish_ms() -> u64 {
    10
}

fn default_stop_wait_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            sample_bytes: default_sample_bytes(),
            pace: true,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jpeg_quality: default_jpeg_quality(),
            pace: true,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            persist_file: default_persist_file(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_ms: default_read_ms(),
            gate_ms: default_gate_ms(),
            drain_ms: default_drain_ms(),
            publish_ms: default_publish_ms(),
            stop_wait_ms: default_stop_wait_ms(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "avcast")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "avcast")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Resolve the sensor persistence path.
    /// Returns None when persistence is disabled or no config dir exists.
    pub fn resolve_sensor_file(&self) -> Option<PathBuf> {
        match self.sensor.persist_file.to_lowercase().as_str() {
            "disabled" | "none" | "off" | "false" => None,
            "auto" => Self::config_dir().map(|dir| dir.join("sensor.json")),
            _ => Some(PathBuf::from(&self.sensor.persist_file)),
        }
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, AvcastError> {
    let mut config = Config::default();

    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| AvcastError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| AvcastError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    if let Ok(rate) = std::env::var("AVCAST_SAMPLE_RATE") {
        config.audio.sample_rate = rate
            .parse()
            .map_err(|_| AvcastError::Config(format!("Invalid AVCAST_SAMPLE_RATE: {}", rate)))?;
    }
    if let Ok(quality) = std::env::var("AVCAST_JPEG_QUALITY") {
        config.video.jpeg_quality = quality.parse().map_err(|_| {
            AvcastError::Config(format!("Invalid AVCAST_JPEG_QUALITY: {}", quality))
        })?;
    }

    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<(), AvcastError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AvcastError::Config(format!("Failed to create config dir: {}", e)))?;
    }

    let contents = toml::to_string_pretty(config)
        .map_err(|e| AvcastError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(path, contents)
        .map_err(|e| AvcastError::Config(format!("Failed to write config: {}", e)))?;

    Ok(())
}
