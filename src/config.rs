//! # Configuration Management
//!
//! Centralized configuration for the packet pipeline.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`GAME_PROTOCOL_*`)
//!
//! Durations are written to and read from TOML as milliseconds.

use crate::error::{ProtocolError, Result};
use crate::utils::replay_window::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE, MIN_WINDOW_SIZE};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Largest wire packet the 16-bit header `size` field can describe.
pub const MAX_WIRE_PACKET_SIZE: usize = u16::MAX as usize;

/// Upper bound for a single logical payload after decoding (decompression bomb guard).
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub fragmentation: FragmentationConfig,

    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub ordering: OrderingConfig,

    #[serde(default)]
    pub codec: CodecConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_u64("GAME_PROTOCOL_RETRANSMIT_INTERVAL_MS")? {
            config.reliability.retransmit_interval = Duration::from_millis(val);
        }

        if let Some(val) = env_u64("GAME_PROTOCOL_MAX_RETRIES")? {
            config.reliability.max_retries = u32::try_from(val).map_err(|_| {
                ProtocolError::ConfigError(format!("GAME_PROTOCOL_MAX_RETRIES out of range: {val}"))
            })?;
        }

        if let Some(val) = env_u64("GAME_PROTOCOL_MAX_FRAGMENT_SIZE")? {
            config.fragmentation.max_fragment_size = val as usize;
        }

        if let Some(val) = env_u64("GAME_PROTOCOL_FRAGMENT_TIMEOUT_MS")? {
            config.fragmentation.fragment_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_u64("GAME_PROTOCOL_BATCH_FLUSH_INTERVAL_MS")? {
            config.batching.flush_interval = Duration::from_millis(val);
        }

        if let Some(val) = env_u64("GAME_PROTOCOL_RECEIVE_WINDOW")? {
            config.ordering.receive_window = u32::try_from(val).map_err(|_| {
                ProtocolError::ConfigError(format!("GAME_PROTOCOL_RECEIVE_WINDOW out of range: {val}"))
            })?;
        }

        if let Some(val) = env_u64("GAME_PROTOCOL_TICK_INTERVAL_MS")? {
            config.maintenance.tick_interval = Duration::from_millis(val);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.reliability.validate());
        errors.extend(self.fragmentation.validate());
        errors.extend(self.batching.validate());
        errors.extend(self.ordering.validate());
        errors.extend(self.codec.validate());
        errors.extend(self.maintenance.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid value for {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Acknowledgment and retransmission settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReliabilityConfig {
    /// Age after which an unacknowledged reliable packet is resent
    #[serde(with = "duration_serde")]
    pub retransmit_interval: Duration,

    /// Number of resends before the packet is declared lost
    pub max_retries: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: Duration::from_millis(500),
            max_retries: 5,
        }
    }
}

impl ReliabilityConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.retransmit_interval.as_millis() < 10 {
            errors.push("Retransmit interval too short (minimum: 10ms)".to_string());
        } else if self.retransmit_interval.as_secs() > 60 {
            errors.push("Retransmit interval too long (maximum: 60s)".to_string());
        }

        if self.max_retries > 100 {
            errors.push(format!(
                "Max retries too large: {} (maximum: 100)",
                self.max_retries
            ));
        }

        errors
    }
}

/// Fragment splitting and reassembly settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FragmentationConfig {
    /// Largest payload carried by one wire packet; bigger payloads are fragmented
    pub max_fragment_size: usize,

    /// Incomplete fragment groups older than this are discarded
    #[serde(with = "duration_serde")]
    pub fragment_timeout: Duration,

    /// Maximum number of incomplete groups kept per connection
    pub max_pending_groups: usize,
}

impl Default for FragmentationConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: 1400,
            fragment_timeout: Duration::from_secs(5),
            max_pending_groups: 64,
        }
    }
}

impl FragmentationConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // the fragment sub-header rides inside the same wire packet
        let ceiling = MAX_WIRE_PACKET_SIZE
            - crate::core::header::HEADER_SIZE
            - crate::protocol::fragment::FRAGMENT_HEADER_SIZE;
        if self.max_fragment_size < 64 {
            errors.push("Max fragment size too small (minimum: 64 bytes)".to_string());
        } else if self.max_fragment_size > ceiling {
            errors.push(format!(
                "Max fragment size too large: {} (maximum: {ceiling})",
                self.max_fragment_size
            ));
        }

        if self.fragment_timeout.as_millis() < 100 {
            errors.push("Fragment timeout too short (minimum: 100ms)".to_string());
        }

        if self.max_pending_groups == 0 {
            errors.push("Max pending fragment groups must be greater than 0".to_string());
        }

        errors
    }
}

/// Small-message batching settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchingConfig {
    /// Whether batchable sends are coalesced at all
    pub enabled: bool,

    /// Maximum wire size of one batch packet
    pub max_batch_size: usize,

    /// A non-empty batch older than this is flushed by the tick
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 1200,
            flush_interval: Duration::from_millis(10),
        }
    }
}

impl BatchingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.enabled {
            if self.max_batch_size < 64 {
                errors.push("Max batch size too small (minimum: 64 bytes)".to_string());
            } else if self.max_batch_size > MAX_WIRE_PACKET_SIZE {
                errors.push(format!(
                    "Max batch size too large: {} (maximum: {MAX_WIRE_PACKET_SIZE})",
                    self.max_batch_size
                ));
            }

            if self.flush_interval.is_zero() {
                errors.push("Batch flush interval must be greater than 0".to_string());
            }
        }

        errors
    }
}

/// Ordered-channel hold-back settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderingConfig {
    /// How long an ordered packet may wait for a gap to fill
    #[serde(with = "duration_serde")]
    pub release_timeout: Duration,

    /// Maximum number of held ordered packets per connection
    pub max_held_packets: usize,

    /// Sequences tracked by the receive window, a multiple of 64. Lost
    /// reliable packets are only recoverable while their retransmission is
    /// still within this many sequences of the newest one received.
    #[serde(default = "default_receive_window")]
    pub receive_window: u32,
}

fn default_receive_window() -> u32 {
    DEFAULT_WINDOW_SIZE
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            release_timeout: Duration::from_millis(1000),
            max_held_packets: 256,
            receive_window: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl OrderingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.release_timeout.is_zero() {
            errors.push("Ordered release timeout must be greater than 0".to_string());
        }

        if self.max_held_packets == 0 {
            errors.push("Max held ordered packets must be greater than 0".to_string());
        }

        if self.receive_window < MIN_WINDOW_SIZE || self.receive_window % MIN_WINDOW_SIZE != 0 {
            errors.push(format!(
                "Receive window must be a positive multiple of {MIN_WINDOW_SIZE} (got {})",
                self.receive_window
            ));
        }

        if self.receive_window > MAX_WINDOW_SIZE {
            errors.push(format!(
                "Receive window too large: {} (maximum {MAX_WINDOW_SIZE})",
                self.receive_window
            ));
        }

        if (self.receive_window as usize) < self.max_held_packets {
            errors.push(format!(
                "Receive window ({}) smaller than max held ordered packets ({})",
                self.receive_window, self.max_held_packets
            ));
        }

        errors
    }
}

/// Compression, encryption and payload limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Minimum payload size (bytes) before compression is attempted
    pub compression_threshold_bytes: usize,

    /// Zstd compression level
    pub compression_level: i32,

    /// Maximum logical payload size accepted on either path
    pub max_payload_size: usize,

    /// Every this many codec failures on one connection a health event is raised
    pub health_report_threshold: u64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_threshold_bytes: 128,
            compression_level: 3,
            max_payload_size: MAX_PAYLOAD_SIZE,
            health_report_threshold: 8,
        }
    }
}

impl CodecConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.compression_level < 1 || self.compression_level > 22 {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 1-22)",
                self.compression_level
            ));
        }

        if self.max_payload_size == 0 {
            errors.push("Max payload size cannot be 0".to_string());
        } else if self.max_payload_size > 64 * 1024 * 1024 {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum: 64 MB)",
                self.max_payload_size
            ));
        }

        if self.compression_threshold_bytes > self.max_payload_size {
            errors.push("Compression threshold cannot be larger than max payload size".to_string());
        }

        if self.health_report_threshold == 0 {
            errors.push("Health report threshold must be greater than 0".to_string());
        }

        errors
    }
}

/// Periodic maintenance task settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    /// Interval between maintenance ticks
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.tick_interval.as_millis() < 1 {
            errors.push("Tick interval too short (minimum: 1ms)".to_string());
        } else if self.tick_interval.as_secs() > 10 {
            errors.push("Tick interval too long (maximum: 10s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("game-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
