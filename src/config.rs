//! # Configuration Management
//!
//! Centralized configuration for the protocol library.
//!
//! This module provides structured configuration for the query and RCON
//! clients: timeouts, challenge-handling policy, reassembly limits, and
//! logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Maximum size of a Source Query datagram (per the protocol, 1400 bytes
/// plus IP/UDP headers).
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Whether challenge responses are handled transparently by default.
pub const AUTO_RESUBMIT_CHALLENGE: bool = true;

/// Whether terminator probe packets are sent after RCON commands by default.
pub const USE_TERMINATOR_PACKETS: bool = true;

/// Main configuration structure containing all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Source Query (UDP) configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// RCON (TCP) configuration
    #[serde(default)]
    pub rcon: RconConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("SOURCE_PROTOCOL_READ_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.query.read_timeout = Duration::from_millis(val);
                config.rcon.response_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(auto) = std::env::var("SOURCE_PROTOCOL_AUTO_CHALLENGE") {
            if let Ok(val) = auto.parse::<bool>() {
                config.query.auto_resubmit_challenge = val;
            }
        }

        if let Ok(terminators) = std::env::var("SOURCE_PROTOCOL_TERMINATOR_PACKETS") {
            if let Ok(val) = terminators.parse::<bool>() {
                config.rcon.use_terminator_packets = val;
            }
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
        errors.extend(self.query.validate());
        errors.extend(self.rcon.validate());
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

/// Source Query (UDP) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Timeout waiting for a response after a successful send
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,

    /// Whether challenge responses are resent transparently; when false the
    /// challenge value escalates to the caller instead
    pub auto_resubmit_challenge: bool,

    /// Upper bound on transparent challenge resubmissions per exchange
    pub max_challenge_resubmits: u32,

    /// Whether purging an incomplete split response surfaces an error with
    /// received/expected fragment counts
    pub report_incomplete_splits: bool,

    /// Time-to-live for pending split-packet containers
    #[serde(with = "duration_serde")]
    pub split_ttl: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            read_timeout: timeout::READ_TIMEOUT,
            auto_resubmit_challenge: AUTO_RESUBMIT_CHALLENGE,
            max_challenge_resubmits: 3,
            report_incomplete_splits: false,
            split_ttl: timeout::SPLIT_CONTAINER_TTL,
        }
    }
}

impl QueryConfig {
    /// Validate query configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.read_timeout.as_millis() < 50 {
            errors.push("Query read timeout too short (minimum: 50ms)".to_string());
        } else if self.read_timeout.as_secs() > 60 {
            errors.push("Query read timeout too long (maximum: 60s)".to_string());
        }

        if self.auto_resubmit_challenge && self.max_challenge_resubmits == 0 {
            errors.push(
                "Max challenge resubmits must be greater than 0 when auto resubmission is enabled"
                    .to_string(),
            );
        } else if self.max_challenge_resubmits > 10 {
            errors.push(format!(
                "Max challenge resubmits very high: {} (maximum recommended: 10)",
                self.max_challenge_resubmits
            ));
        }

        if self.split_ttl < self.read_timeout {
            errors.push(
                "Split container TTL must not be shorter than the read timeout".to_string(),
            );
        }

        errors
    }
}

/// RCON (TCP) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RconConfig {
    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout waiting for a command response
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Whether an empty probe packet is sent after each command so the
    /// server's terminator delimits multi-packet responses
    pub use_terminator_packets: bool,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            connect_timeout: timeout::CONNECT_TIMEOUT,
            response_timeout: timeout::READ_TIMEOUT,
            use_terminator_packets: USE_TERMINATOR_PACKETS,
        }
    }
}

impl RconConfig {
    /// Validate RCON configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connect_timeout.as_millis() < 100 {
            errors.push("RCON connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("RCON connect timeout too long (maximum: 300s)".to_string());
        }

        if self.response_timeout.as_millis() < 50 {
            errors.push("RCON response timeout too short (minimum: 50ms)".to_string());
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

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("source-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ProtocolConfig::default().validate().is_empty());
    }

    #[test]
    fn toml_round_trip() {
        let toml = ProtocolConfig::example_config();
        let parsed = ProtocolConfig::from_toml(&toml).unwrap();
        assert_eq!(
            parsed.query.read_timeout,
            QueryConfig::default().read_timeout
        );
        assert_eq!(parsed.rcon.use_terminator_packets, USE_TERMINATOR_PACKETS);
    }

    #[test]
    fn short_timeout_is_flagged() {
        let config = ProtocolConfig::default_with_overrides(|c| {
            c.query.read_timeout = Duration::from_millis(1);
        });
        assert!(!config.validate().is_empty());
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn split_ttl_must_cover_read_timeout() {
        let config = ProtocolConfig::default_with_overrides(|c| {
            c.query.split_ttl = Duration::from_millis(100);
            c.query.read_timeout = Duration::from_secs(5);
        });
        assert!(config
            .validate()
            .iter()
            .any(|e| e.contains("Split container TTL")));
    }
}
