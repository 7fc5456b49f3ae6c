//! # Configuration Management
//!
//! Centralized configuration for the protocol core.
//!
//! This module holds the protocol contract constants and the structured
//! configuration for servers and clients: connection limits, timeouts,
//! heartbeat and reconnection policy, per-packet-type rate limits and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Contract values
//! The constants below are part of the wire protocol. Config fields default to
//! them; changing a field only makes sense when both peers agree.

use crate::error::{ProtocolError, Result};
use crate::protocol::message::PacketType;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Current supported protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the length prefix in front of every frame
pub const FRAME_HEADER_LEN: usize = 4;

/// Max allowed serialized packet body (1 MB)
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Consecutive undecodable bodies tolerated before the connection is dropped
pub const MAX_CONSECUTIVE_DESERIALIZATION_ERRORS: u32 = 5;

/// Reconnection attempts made by the client supervisor
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Body size above which compression would pay off. Advisory only.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Framing and request configuration shared by both sides
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Per-packet-type request budgets (server)
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
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

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("ARENA_PROTOCOL_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(addr) = std::env::var("ARENA_PROTOCOL_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(max) = std::env::var("ARENA_PROTOCOL_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(timeout) = std::env::var("ARENA_PROTOCOL_REQUEST_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.protocol.request_timeout = Duration::from_millis(val);
                config.client.response_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(heartbeat) = std::env::var("ARENA_PROTOCOL_HEARTBEAT_INTERVAL_MS") {
            if let Ok(val) = heartbeat.parse::<u64>() {
                config.client.heartbeat_interval = Duration::from_millis(val);
            }
        }

        if let Ok(level) = std::env::var("ARENA_PROTOCOL_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
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

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.protocol.validate());
        errors.extend(self.rate_limit.validate());
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

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:7777")
    pub address: String,

    /// Capacity of each connection's inbound packet queue
    pub backpressure_limit: usize,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Sliding expiry applied to every session
    #[serde(with = "duration_serde")]
    pub session_expiry: Duration,

    /// Interval of the background session sweep
    #[serde(with = "duration_serde")]
    pub session_sweep_interval: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:7777"),
            backpressure_limit: 64,
            max_connections: 1000,
            session_expiry: timeout::SESSION_EXPIRY,
            session_sweep_interval: timeout::SESSION_SWEEP_INTERVAL,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:7777')",
                self.address
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.session_expiry.as_secs() < 60 {
            errors.push("Session expiry too short (minimum: 60s)".to_string());
        }

        if self.session_sweep_interval.as_secs() < 1 {
            errors.push("Session sweep interval too short (minimum: 1s)".to_string());
        } else if self.session_sweep_interval > self.session_expiry {
            errors.push("Session sweep interval cannot exceed session expiry".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Default timeout for correlated requests
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Interval for sending heartbeat packets
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Silence after which the connection is declared dead
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Whether to automatically reconnect on connection loss
    pub auto_reconnect: bool,

    /// Maximum number of reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Delay between reconnect attempts
    #[serde(with = "duration_serde")]
    pub reconnect_delay: Duration,

    /// Capacity of the client event queue
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:7777"),
            connection_timeout: timeout::CONNECT_TIMEOUT,
            response_timeout: timeout::DEFAULT_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            idle_timeout: timeout::IDLE_TIMEOUT,
            auto_reconnect: true,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: timeout::RECONNECT_DELAY,
            event_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: '127.0.0.1:7777')",
                self.address
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.response_timeout.as_millis() < 100 {
            errors.push("Response timeout too short (minimum: 100ms)".to_string());
        }

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.idle_timeout < self.heartbeat_interval * 2 {
            errors.push(
                "Idle timeout must span at least two heartbeat intervals".to_string(),
            );
        }

        if self.auto_reconnect && self.max_reconnect_attempts == 0 {
            errors.push(
                "Max reconnect attempts must be greater than 0 when auto_reconnect is enabled"
                    .to_string(),
            );
        }

        if self.reconnect_delay.as_millis() < 10 {
            errors.push("Reconnect delay too short (minimum: 10ms)".to_string());
        } else if self.reconnect_delay.as_secs() > 60 {
            errors.push("Reconnect delay too long (maximum: 60s)".to_string());
        }

        if self.event_buffer == 0 {
            errors.push("Event buffer must be greater than 0".to_string());
        }

        errors
    }
}

/// Framing and request settings shared by both peers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    /// Maximum serialized packet body in bytes
    pub max_packet_size: usize,

    /// Consecutive undecodable packets tolerated before disconnecting
    pub max_deserialization_errors: u32,

    /// Socket/request timeout; also the age after which pending requests are swept
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum accepted clock skew on packet timestamps
    #[serde(with = "duration_serde")]
    pub max_clock_skew: Duration,

    /// Minimum payload size (bytes) at which compression would be worthwhile.
    /// Recorded for peers that negotiate it; never enforced.
    #[serde(default)]
    pub compression_threshold_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            max_deserialization_errors: MAX_CONSECUTIVE_DESERIALIZATION_ERRORS,
            request_timeout: timeout::DEFAULT_TIMEOUT,
            max_clock_skew: timeout::MAX_CLOCK_SKEW,
            compression_threshold_bytes: COMPRESSION_THRESHOLD,
        }
    }
}

impl ProtocolConfig {
    /// Validate protocol configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_packet_size == 0 {
            errors.push("Max packet size cannot be 0".to_string());
        } else if self.max_packet_size < 1024 {
            errors.push("Max packet size too small (minimum: 1 KB)".to_string());
        } else if self.max_packet_size > i32::MAX as usize {
            errors.push(format!(
                "Max packet size too large: {} bytes (must fit the 4-byte signed length header)",
                self.max_packet_size
            ));
        }

        if self.max_deserialization_errors == 0 {
            errors.push("Max deserialization errors must be greater than 0".to_string());
        }

        if self.request_timeout.as_millis() < 100 {
            errors.push("Request timeout too short (minimum: 100ms)".to_string());
        } else if self.request_timeout.as_secs() > 300 {
            errors.push("Request timeout too long (maximum: 300s)".to_string());
        }

        if self.max_clock_skew.as_secs() < 1 {
            errors.push("Max clock skew too short (minimum: 1s)".to_string());
        }

        if self.compression_threshold_bytes > self.max_packet_size {
            errors.push("Compression threshold cannot be larger than max packet size".to_string());
        }

        errors
    }
}

/// Per-(connection, packet type) request budgets
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Length of one fixed counting window
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Budget for packet types without an explicit entry
    pub default_limit: u32,

    /// Budgets keyed by packet type name (e.g. `LoginRequest = 5`)
    #[serde(default)]
    pub limits: BTreeMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limits = [
            (PacketType::LoginRequest, 5),
            (PacketType::ReconnectRequest, 5),
            (PacketType::Heartbeat, 10),
            (PacketType::ChatMessage, 20),
        ]
        .into_iter()
        .map(|(packet_type, limit)| (packet_type.name().to_string(), limit))
        .collect();

        Self {
            window: timeout::DEFAULT_TIMEOUT,
            default_limit: 60,
            limits,
        }
    }
}

impl RateLimitConfig {
    /// Budget for one packet type within one window
    pub fn limit_for(&self, packet_type: PacketType) -> u32 {
        self.limits
            .get(packet_type.name())
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Override the budget of a single packet type
    pub fn with_limit(mut self, packet_type: PacketType, limit: u32) -> Self {
        self.limits.insert(packet_type.name().to_string(), limit);
        self
    }

    /// Validate rate limit configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.window.as_millis() < 100 {
            errors.push("Rate limit window too short (minimum: 100ms)".to_string());
        }

        if self.default_limit == 0 {
            errors.push("Default rate limit must be greater than 0".to_string());
        }

        for (name, limit) in &self.limits {
            if PacketType::from_name(name).is_none() {
                errors.push(format!("Unknown packet type in rate limits: '{name}'"));
            }
            if *limit == 0 {
                errors.push(format!("Rate limit for {name} must be greater than 0"));
            }
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
            app_name: String::from("arena-protocol"),
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
