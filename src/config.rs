//! # Configuration Management
//!
//! Centralized configuration for servers and clients.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`MSGNET_*` variables)
//!
//! ## Timeout Policy
//! - A peer has `handshake_timeout` to answer the nonce; otherwise its socket
//!   is closed before it ever reaches the connection pool.
//! - Each frame write is bounded by `write_timeout`; a peer that stops
//!   reading is disconnected.
//! - Established connections have no idle read timeout. The protocol has no
//!   heartbeat, so a quiet peer is a legitimate peer.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed body size (16 MB)
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// First connection id handed out by a server
pub const FIRST_CONNECTION_ID: u32 = 10_000;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

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

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("MSGNET_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(max) = std::env::var("MSGNET_MAX_CONNECTIONS") {
            config.server.max_connections = max
                .parse::<usize>()
                .map_err(|e| ProtocolError::ConfigError(format!("MSGNET_MAX_CONNECTIONS: {e}")))?;
        }

        if let Ok(ms) = std::env::var("MSGNET_HANDSHAKE_TIMEOUT_MS") {
            let val = ms.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("MSGNET_HANDSHAKE_TIMEOUT_MS: {e}"))
            })?;
            config.server.handshake_timeout = Duration::from_millis(val);
            config.client.handshake_timeout = Duration::from_millis(val);
        }

        if let Ok(ms) = std::env::var("MSGNET_CONNECTION_TIMEOUT_MS") {
            let val = ms.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("MSGNET_CONNECTION_TIMEOUT_MS: {e}"))
            })?;
            config.client.connection_timeout = Duration::from_millis(val);
        }

        if let Ok(size) = std::env::var("MSGNET_MAX_BODY_SIZE") {
            let val = size
                .parse::<usize>()
                .map_err(|e| ProtocolError::ConfigError(format!("MSGNET_MAX_BODY_SIZE: {e}")))?;
            config.server.transport.max_body_size = val;
            config.client.transport.max_body_size = val;
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

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
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
    /// Listen address (e.g., "0.0.0.0:60000"); port 0 picks a free port
    pub address: String,

    /// Time a freshly accepted client has to answer the handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Bound on a single frame write
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,

    /// How long `stop()` waits for in-flight I/O before abandoning it
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Clients allowed at once, counting those still in the handshake; further accepts are denied
    pub max_connections: usize,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:60000"),
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            write_timeout: timeout::DEFAULT_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 1000,
            transport: TransportConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Listen on every interface at `port`, everything else default
    pub fn with_port(port: u16) -> Self {
        Self {
            address: format!("0.0.0.0:{port}"),
            ..Self::default()
        }
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:60000')",
                self.address
            ));
        }

        errors.extend(validate_handshake_timeout(self.handshake_timeout));
        errors.extend(validate_write_timeout(self.write_timeout));

        if self.shutdown_timeout.as_millis() < 10 {
            errors.push("Shutdown timeout too short (minimum: 10ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors.extend(self.transport.validate());
        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Timeout for resolving and connecting to the server
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Time the server has to send its nonce after the socket connects
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Bound on a single frame write
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,

    /// How long `disconnect()` waits for in-flight I/O before abandoning it
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            write_timeout: timeout::DEFAULT_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        errors.extend(validate_handshake_timeout(self.handshake_timeout));
        errors.extend(validate_write_timeout(self.write_timeout));

        if self.shutdown_timeout.as_millis() < 10 {
            errors.push("Shutdown timeout too short (minimum: 10ms)".to_string());
        }

        errors.extend(self.transport.validate());
        errors
    }
}

fn validate_handshake_timeout(timeout: Duration) -> Option<String> {
    if timeout.as_millis() < 10 {
        Some("Handshake timeout too short (minimum: 10ms)".to_string())
    } else if timeout.as_secs() > 120 {
        Some("Handshake timeout too long (maximum: 120s)".to_string())
    } else {
        None
    }
}

fn validate_write_timeout(timeout: Duration) -> Option<String> {
    if timeout.as_millis() < 10 {
        Some("Write timeout too short (minimum: 10ms)".to_string())
    } else {
        None
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Largest body accepted or sent; larger frames close the connection
    pub max_body_size: usize,

    /// Disable Nagle's algorithm on every socket
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_body_size == 0 {
            errors.push("Max body size cannot be 0".to_string());
        } else if self.max_body_size > u32::MAX as usize {
            errors.push(format!(
                "Max body size too large: {} bytes (the header stores a u32)",
                self.max_body_size
            ));
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

    /// Path to a log file; console output when unset
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("msgnet"),
            log_level: Level::INFO,
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

        if let Some(ref path) = self.log_file_path {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    errors.push(format!(
                        "Log file directory does not exist: {}",
                        parent.display()
                    ));
                }
            }
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
        level.as_str().to_ascii_lowercase().serialize(serializer)
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
