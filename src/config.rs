//! # Configuration Management
//!
//! Centralized configuration for the relay server and its clients.
//!
//! This module provides structured configuration for the server acceptor,
//! participant clients, per-session message quotas, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Notes
//! - The message quota and the quota-exhaustion policy are configuration, not
//!   constants: deployments have run with quotas anywhere from 3 to 20
//! - Every read timeout is paired with a retry budget; the effective deadline
//!   of an operation is roughly `timeout * retries`

use crate::core::codec::DEFAULT_MAX_LINE_LENGTH;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default messages a participant may send per paired session
pub const DEFAULT_MESSAGE_QUOTA: u32 = 10;

/// Default cap on concurrently registered participants
pub const DEFAULT_MAX_PARTICIPANTS: usize = 10;

/// Default relay address
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:12345";

/// Main relay configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RelayConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Per-session quota configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
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

        if let Ok(addr) = std::env::var("CHAT_RELAY_SERVER_ADDRESS") {
            config.client.address = addr.clone();
            config.server.address = addr;
        }

        if let Ok(max) = std::env::var("CHAT_RELAY_MAX_PARTICIPANTS") {
            config.server.max_participants = max.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid CHAT_RELAY_MAX_PARTICIPANTS: {e}"))
            })?;
        }

        if let Ok(quota) = std::env::var("CHAT_RELAY_MESSAGE_QUOTA") {
            config.session.message_quota = quota.parse::<u32>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid CHAT_RELAY_MESSAGE_QUOTA: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("CHAT_RELAY_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.handshake_timeout = Duration::from_millis(val);
                config.client.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("CHAT_RELAY_PAIRING_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.pairing_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(level) = std::env::var("CHAT_RELAY_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid CHAT_RELAY_LOG_LEVEL: {level}"))
            })?;
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
        errors.extend(self.session.validate());
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
    /// Server listen address (e.g., "127.0.0.1:12345")
    pub address: String,

    /// Maximum number of concurrently registered participants
    pub max_participants: usize,

    /// Capacity of each session's outbound command queue
    pub outbound_queue_limit: usize,

    /// Per-read timeout while waiting for a handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Timed-out handshake reads tolerated before the connection is dropped
    pub handshake_retries: u32,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Longest accepted envelope line, in bytes
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            outbound_queue_limit: 32,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            handshake_retries: timeout::SERVER_HANDSHAKE_RETRIES,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
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
                "Invalid server address format: '{}' (expected format: '0.0.0.0:12345')",
                self.address
            ));
        }

        if self.max_participants == 0 {
            errors.push("Max participants must be greater than 0".to_string());
        } else if self.max_participants > 10_000 {
            errors.push(format!(
                "Max participants very high: {} (maximum recommended: 10,000)",
                self.max_participants
            ));
        }

        if self.outbound_queue_limit == 0 {
            errors.push("Outbound queue limit must be greater than 0".to_string());
        } else if self.outbound_queue_limit > 1_000_000 {
            errors.push(format!(
                "Outbound queue limit too large: {} (max recommended: 1,000,000)",
                self.outbound_queue_limit
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.handshake_retries == 0 {
            errors.push("Handshake retries must be greater than 0".to_string());
        } else if self.handshake_retries > 10 {
            errors.push(format!(
                "Handshake retries too high: {} (maximum: 10)",
                self.handshake_retries
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors.extend(validate_line_length(self.max_line_length));

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

    /// Per-read timeout while waiting for the handshake acknowledgment
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Timed-out acknowledgment reads tolerated before giving up
    pub handshake_retries: u32,

    /// Per-read timeout while waiting for a pairing outcome
    #[serde(with = "duration_serde")]
    pub pairing_timeout: Duration,

    /// Timed-out pairing reads tolerated before the attempt is abandoned
    pub pairing_retries: u32,

    /// Longest accepted envelope line, in bytes
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            handshake_retries: timeout::CLIENT_HANDSHAKE_RETRIES,
            pairing_timeout: timeout::PAIRING_TIMEOUT,
            pairing_retries: timeout::PAIRING_RETRIES,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
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
                "Invalid client address format: '{}' (expected format: '127.0.0.1:12345')",
                self.address
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        }

        if self.handshake_retries == 0 {
            errors.push("Handshake retries must be greater than 0".to_string());
        }

        if self.pairing_timeout.as_millis() < 100 {
            errors.push("Pairing timeout too short (minimum: 100ms)".to_string());
        } else if self.pairing_timeout.as_secs() > 600 {
            errors.push("Pairing timeout too long (maximum: 600s)".to_string());
        }

        if self.pairing_retries == 0 {
            errors.push("Pairing retries must be greater than 0".to_string());
        }

        errors.extend(validate_line_length(self.max_line_length));

        errors
    }
}

/// Per-session quota configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Messages a participant may send within one paired session
    pub message_quota: u32,

    /// Close the connection on the first send past the quota instead of
    /// refusing sends and keeping the read side open
    pub close_on_quota_exhausted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            message_quota: DEFAULT_MESSAGE_QUOTA,
            close_on_quota_exhausted: false,
        }
    }
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.message_quota == 0 {
            errors.push("Message quota must be greater than 0".to_string());
        } else if self.message_quota > 10_000 {
            errors.push(format!(
                "Message quota too large: {} (maximum: 10,000)",
                self.message_quota
            ));
        }

        errors
    }
}

fn validate_line_length(max_line_length: usize) -> Vec<String> {
    let mut errors = Vec::new();
    if max_line_length < 64 {
        errors.push("Max line length too small (minimum: 64 bytes)".to_string());
    } else if max_line_length > 1024 * 1024 {
        errors.push(format!(
            "Max line length too large: {max_line_length} bytes (maximum: 1 MB)"
        ));
    }
    errors
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
            app_name: String::from("chat-relay"),
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
