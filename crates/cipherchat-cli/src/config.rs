//! Configuration management for cipherchat
//!
//! Configuration is stored in TOML format. Values are resolved in this order,
//! later sources winning: built-in defaults, the config file, environment
//! variables, command line flags.
//!
//! # Configuration File Locations
//!
//! - Linux: `~/.config/cipherchat/config.toml`
//! - macOS: `~/Library/Application Support/io.cipherchat.cipherchat/config.toml`
//! - Windows: `%APPDATA%\cipherchat\cipherchat\config\config.toml`

use std::path::{Path, PathBuf};

use cipherchat_core::{ChannelConfig, KeyStoreConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_KEYS_DIR: &str = "CIPHERCHAT_KEYS_DIR";
pub const ENV_LOG_LEVEL: &str = "CIPHERCHAT_LOG_LEVEL";
pub const ENV_FRESHNESS_SECS: &str = "CIPHERCHAT_FRESHNESS_SECS";
pub const ENV_MAX_MESSAGE_SIZE: &str = "CIPHERCHAT_MAX_MESSAGE_SIZE";

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Environment variable holds an unusable value
    #[error("Invalid value for {var}: {value:?}")]
    EnvError { var: &'static str, value: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// CLI configuration
///
/// # Example TOML
///
/// ```toml
/// [keystore]
/// path = "/home/alice/.local/share/cipherchat/keys"  # Omit for default location
///
/// [channel]
/// freshness_window_secs = 3600
/// max_future_skew_secs = 300
/// max_message_size = 1048576
/// reject_duplicates = false
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Key store location
    #[serde(default)]
    pub keystore: KeyStoreConfig,

    /// Channel tunables
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Overrides collected from command line flags
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub keys_dir: Option<PathBuf>,
    pub freshness_secs: Option<u64>,
    pub reject_duplicates: Option<bool>,
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = custom_path {
            Self::load(path)
        } else {
            Self::load_default()
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("io", "cipherchat", "cipherchat")
    }

    /// Get default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default key store directory
    pub fn default_keys_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().join("keys"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write [`Config::sample_toml`] to `path`, creating parent directories.
    pub fn write_sample(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::sample_toml())?;
        Ok(())
    }

    /// Apply `CIPHERCHAT_*` environment variables.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_env_from(|var| std::env::var(var).ok())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn with_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(dir) = lookup(ENV_KEYS_DIR).filter(|v| !v.is_empty()) {
            self.keystore.path = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.logging.level = level.to_lowercase();
        }
        if let Some(value) = lookup(ENV_FRESHNESS_SECS) {
            self.channel.freshness_window_secs = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::EnvError {
                    var: ENV_FRESHNESS_SECS,
                    value,
                })?;
        }
        if let Some(value) = lookup(ENV_MAX_MESSAGE_SIZE) {
            self.channel.max_message_size = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::EnvError {
                    var: ENV_MAX_MESSAGE_SIZE,
                    value,
                })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Apply command line overrides. Flags win over everything else.
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(dir) = &overrides.keys_dir {
            self.keystore.path = Some(dir.clone());
        }
        if let Some(secs) = overrides.freshness_secs {
            self.channel.freshness_window_secs = secs;
        }
        if let Some(reject) = overrides.reject_duplicates {
            self.channel.reject_duplicates = reject;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        self
    }

    /// Key store directory: configured path, or the platform data directory.
    pub fn keys_dir(&self) -> Result<PathBuf, ConfigError> {
        self.keystore
            .path
            .clone()
            .or_else(Self::default_keys_dir)
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "no key store directory; set [keystore] path or {ENV_KEYS_DIR}"
                ))
            })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, VALID_LOG_LEVELS
            )));
        }

        self.channel
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if let Some(path) = &self.keystore.path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "keystore path must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Generate a sample configuration file content
    pub fn sample_toml() -> &'static str {
        r#"# cipherchat configuration

[keystore]
# Key store directory (omit for the platform data directory)
# path = "/path/to/keys"

[channel]
# Oldest accepted envelope, in seconds
freshness_window_secs = 3600
# How far in the future an envelope timestamp may be, in seconds
max_future_skew_secs = 300
# Largest plaintext accepted, in bytes
max_message_size = 1048576
# Reject a second delivery of the same envelope
reject_duplicates = false

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
level = "warn"
"#
    }
}
