//! Configuration types for Tapedeck

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::validate_sequence_name;
use crate::{Result, TapedeckError};

/// Operating mode
///
/// Defaults to replay, the mode that never deletes recordings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Record mode: forward upstream and persist interactions
    Record,
    /// Replay mode: serve persisted interactions
    #[default]
    Replay,
}

impl Mode {
    /// Check if mode is Record
    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Mode::Record)
    }

    /// Check if mode is Replay
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Mode::Replay)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Record => f.write_str("record"),
            Mode::Replay => f.write_str("replay"),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Process-wide default mode
    #[serde(default)]
    pub mode: Mode,
    /// Directory for storing/loading recordings
    #[serde(default = "default_recording_dir")]
    pub recording_dir: PathBuf,
    /// Sequence activated at startup
    #[serde(default = "default_sequence")]
    pub sequence: String,
    /// Upstream and listener
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// What gets written into recordings
    #[serde(default)]
    pub recording: RecordingConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Target host to forward to in record mode
    pub target_host: String,
    /// Target port
    pub target_port: u16,
    /// Local port to listen on
    pub listen_port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            target_host: "127.0.0.1".to_string(),
            target_port: 80,
            listen_port: 8080,
        }
    }
}

/// Recording content configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Header names (case-insensitive) whose values are replaced before persisting
    #[serde(default)]
    pub redact_headers: Vec<String>,
    /// Store a best-effort decoded text copy of each body next to the raw bytes
    #[serde(default = "default_true")]
    pub include_plaintext: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            redact_headers: Vec::new(),
            include_plaintext: true,
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent client connections
    pub max_connections: usize,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Maximum response body size that will still be recorded
    pub max_response_size: usize,
    /// Capacity of the write pipeline queue
    pub write_queue_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 256 * 1024 * 1024, // 256 MB
            write_queue_capacity: 1024,
        }
    }
}

fn default_recording_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_sequence() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Configuration with defaults for everything except the mode
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            recording_dir: default_recording_dir(),
            sequence: default_sequence(),
            endpoint: EndpointConfig::default(),
            recording: RecordingConfig::default(),
            limits: LimitsConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.recording_dir.as_os_str().is_empty() {
            return Err(TapedeckError::ConfigError(
                "recording_dir cannot be empty".to_string(),
            ));
        }

        validate_sequence_name(&self.sequence)
            .map_err(|e| TapedeckError::ConfigError(format!("Initial sequence: {e}")))?;

        if self.endpoint.target_host.is_empty() {
            return Err(TapedeckError::ConfigError(
                "target_host cannot be empty".to_string(),
            ));
        }

        if self.endpoint.target_port == 0 {
            return Err(TapedeckError::ConfigError(
                "target_port cannot be 0".to_string(),
            ));
        }

        if self.endpoint.listen_port == 0 {
            return Err(TapedeckError::ConfigError(
                "listen_port cannot be 0".to_string(),
            ));
        }

        let limits = &self.limits;
        for (name, value) in [
            ("max_connections", limits.max_connections),
            ("max_request_size", limits.max_request_size),
            ("max_response_size", limits.max_response_size),
            ("write_queue_capacity", limits.write_queue_capacity),
        ] {
            if value == 0 {
                return Err(TapedeckError::ConfigError(format!("{name} must be > 0")));
            }
        }

        Ok(())
    }
}
