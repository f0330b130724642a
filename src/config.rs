//! # Configuration Management
//!
//! Centralized configuration for the interception engine.
//!
//! This module provides structured configuration for the listener dispatcher, the
//! pipeline injector and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides (`PACKET_INTERCEPT_*`)
//!
//! ## Operational Considerations
//! - Auto-deregistration after 3 consecutive failures keeps a broken listener from
//!   flooding the error reporter while tolerating one-off failures
//! - The drain timeout bounds how long connection termination waits for running passes

use crate::error::{InterceptError, Result};
use crate::protocol::priority::CancellationPolicy;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default number of consecutive failures before a listener is deregistered
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Default bound on waiting for in-flight passes at connection termination
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on queued synthetic sends per connection and direction
pub const DEFAULT_SYNTHETIC_QUEUE_LIMIT: usize = 1024;

/// Default nesting limit for synthetic sends issued from inside a dispatch pass
pub const DEFAULT_MAX_SYNTHETIC_DEPTH: u32 = 8;

/// Main engine configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    /// Listener dispatch configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Pipeline injection configuration
    #[serde(default)]
    pub injector: InjectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| InterceptError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| InterceptError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| InterceptError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(failures) = std::env::var("PACKET_INTERCEPT_MAX_CONSECUTIVE_FAILURES") {
            if let Ok(val) = failures.parse::<u32>() {
                config.dispatcher.max_consecutive_failures = val;
            }
        }

        if let Ok(policy) = std::env::var("PACKET_INTERCEPT_CANCELLATION_POLICY") {
            match policy.to_ascii_lowercase().as_str() {
                "short_circuit" => {
                    config.dispatcher.cancellation_policy = CancellationPolicy::ShortCircuit
                }
                "propagate" => config.dispatcher.cancellation_policy = CancellationPolicy::Propagate,
                other => {
                    return Err(InterceptError::ConfigError(format!(
                        "Invalid cancellation policy: '{other}'"
                    )))
                }
            }
        }

        if let Ok(timeout) = std::env::var("PACKET_INTERCEPT_DRAIN_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.injector.drain_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(limit) = std::env::var("PACKET_INTERCEPT_SYNTHETIC_QUEUE_LIMIT") {
            if let Ok(val) = limit.parse::<usize>() {
                config.injector.synthetic_queue_limit = val;
            }
        }

        if let Ok(max) = std::env::var("PACKET_INTERCEPT_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.injector.max_connections = val;
            }
        }

        if let Ok(level) = std::env::var("PACKET_INTERCEPT_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                InterceptError::ConfigError(format!("Invalid log level: '{level}'"))
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
            .map_err(|e| InterceptError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| InterceptError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.dispatcher.validate());
        errors.extend(self.injector.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(InterceptError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener dispatch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Consecutive failures before a listener is deregistered; 0 disables auto-removal
    pub max_consecutive_failures: u32,

    /// What a non-monitor cancellation does to the rest of the chain
    pub cancellation_policy: CancellationPolicy,

    /// Whether listener panics are caught and treated as failures
    pub catch_panics: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            cancellation_policy: CancellationPolicy::default(),
            catch_panics: true,
        }
    }
}

impl DispatcherConfig {
    /// Validate dispatcher configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_consecutive_failures > 10_000 {
            errors.push(format!(
                "Max consecutive failures too large: {} (use 0 to disable auto-removal)",
                self.max_consecutive_failures
            ));
        }

        errors
    }
}

/// Pipeline injection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InjectorConfig {
    /// Bound on waiting for in-flight dispatch passes at termination
    #[serde(with = "duration_serde")]
    pub drain_timeout: Duration,

    /// Maximum queued synthetic sends per connection and direction
    pub synthetic_queue_limit: usize,

    /// Maximum number of concurrently injected connections
    pub max_connections: usize,

    /// Maximum nesting of synthetic sends issued while dispatching a synthetic message
    pub max_synthetic_depth: u32,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            synthetic_queue_limit: DEFAULT_SYNTHETIC_QUEUE_LIMIT,
            max_connections: 10_000,
            max_synthetic_depth: DEFAULT_MAX_SYNTHETIC_DEPTH,
        }
    }
}

impl InjectorConfig {
    /// Validate injector configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.drain_timeout.as_millis() < 10 {
            errors.push("Drain timeout too short (minimum: 10ms)".to_string());
        } else if self.drain_timeout.as_secs() > 300 {
            errors.push("Drain timeout too long (maximum: 300s)".to_string());
        }

        if self.synthetic_queue_limit == 0 {
            errors.push("Synthetic queue limit must be greater than 0".to_string());
        } else if self.synthetic_queue_limit > 1_000_000 {
            errors.push(format!(
                "Synthetic queue limit too large: {} (max recommended: 1,000,000)",
                self.synthetic_queue_limit
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 1_000_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.max_synthetic_depth == 0 {
            errors.push("Max synthetic depth must be greater than 0".to_string());
        } else if self.max_synthetic_depth > 64 {
            errors.push(format!(
                "Max synthetic depth too large: {} (maximum: 64)",
                self.max_synthetic_depth
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
            app_name: String::from("packet-intercept"),
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
                if let Some(parent) = Path::new(path).parent() {
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
