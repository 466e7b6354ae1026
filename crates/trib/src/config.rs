//! Configuration module for redtrib
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};
use std::time::Duration;
use trib_core::{ConvergencePolicy, MoveOptions};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node connection configuration
    #[serde(default)]
    pub connect: ConnectConfig,
    /// Key transfer configuration
    #[serde(default)]
    pub migrate: MigrateConfig,
    /// Convergence wait configuration
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.connect.merge(other.connect);
        self.migrate.merge(other.migrate);
        self.convergence.merge(other.convergence);
        self.log.merge(other.log);
    }

    /// Transfer settings for repairs and moves
    pub fn move_options(&self) -> MoveOptions {
        MoveOptions {
            pipeline: self.migrate.pipeline,
            timeout_ms: self.migrate.timeout_ms,
            ..Default::default()
        }
    }

    pub fn convergence_policy(&self) -> ConvergencePolicy {
        ConvergencePolicy {
            interval: self.convergence.poll_interval(),
            timeout: self.convergence.timeout(),
        }
    }
}

/// Node connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-command reply timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl ConnectConfig {
    fn merge(&mut self, other: Self) {
        if other.connect_timeout_ms > 0 {
            self.connect_timeout_ms = other.connect_timeout_ms;
        }
        if other.command_timeout_ms > 0 {
            self.command_timeout_ms = other.command_timeout_ms;
        }
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get command timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Key transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateConfig {
    /// `MIGRATE` timeout in milliseconds
    #[serde(default = "default_migrate_timeout_ms")]
    pub timeout_ms: u64,
    /// Keys moved per `MIGRATE`
    #[serde(default = "default_pipeline")]
    pub pipeline: usize,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_migrate_timeout_ms(),
            pipeline: default_pipeline(),
        }
    }
}

impl MigrateConfig {
    fn merge(&mut self, other: Self) {
        if other.timeout_ms > 0 {
            self.timeout_ms = other.timeout_ms;
        }
        if other.pipeline > 0 {
            self.pipeline = other.pipeline;
        }
    }
}

/// Convergence wait configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up after this many seconds
    #[serde(default = "default_convergence_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_convergence_timeout_secs(),
        }
    }
}

impl ConvergenceConfig {
    fn merge(&mut self, other: Self) {
        if other.poll_interval_ms > 0 {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.timeout_secs > 0 {
            self.timeout_secs = other.timeout_secs;
        }
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_connect_timeout_ms() -> u64 {
    5000 // 5 seconds
}

fn default_command_timeout_ms() -> u64 {
    // Must outlast a MIGRATE batch
    90_000
}

fn default_migrate_timeout_ms() -> u64 {
    trib_core::mover::DEFAULT_MIGRATE_TIMEOUT_MS
}

fn default_pipeline() -> usize {
    trib_core::mover::DEFAULT_PIPELINE
}

fn default_poll_interval_ms() -> u64 {
    1000 // 1 second
}

fn default_convergence_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}
