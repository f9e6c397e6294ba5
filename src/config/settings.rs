//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Log levels accepted by `logging.level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// TCP listener settings.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Discovery paths registered at startup.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Launch and polling timing.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.host.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "listen.host must not be empty".to_string(),
            });
        }

        if self.lifecycle.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "lifecycle.poll_interval_ms must be greater than 0".to_string(),
            });
        }
        if self.lifecycle.startup_timeout_ms < self.lifecycle.poll_interval_ms {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "lifecycle.startup_timeout_ms ({}) must not be less than lifecycle.poll_interval_ms ({})",
                    self.lifecycle.startup_timeout_ms, self.lifecycle.poll_interval_ms
                ),
            });
        }

        if let Some(path) = self
            .discovery
            .paths
            .iter()
            .find(|p| !Path::new(p).is_absolute())
        {
            return Err(ConfigError::ValidationError {
                message: format!("Discovery path '{path}' must be absolute"),
            });
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        Ok(())
    }
}

/// TCP listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    /// Interface to bind.
    /// Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind; 0 picks an ephemeral port.
    /// Default: 27511
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    27511
}

/// Discovery configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Absolute paths added as discovery paths when the session starts.
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Lifecycle timing configuration, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    /// How long a launched process must stay alive to count as started.
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,

    /// Interval between liveness checks of running servers.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long client-requested polling waits for the server to respond.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: default_startup_grace(),
            poll_interval_ms: default_poll_interval(),
            startup_timeout_ms: default_startup_timeout(),
        }
    }
}

const fn default_startup_grace() -> u64 {
    500
}

const fn default_poll_interval() -> u64 {
    1000
}

const fn default_startup_timeout() -> u64 {
    120_000
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
