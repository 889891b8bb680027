//! Channel and key store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

pub const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 3600;
pub const DEFAULT_MAX_FUTURE_SKEW_SECS: u64 = 300;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;
/// Upper bound accepted for `max_message_size`.
pub const MAX_MESSAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// Tunables for [`crate::channel::SecureChannel`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum accepted age of an envelope timestamp.
    pub freshness_window_secs: u64,
    /// Maximum accepted distance of an envelope timestamp into the future.
    pub max_future_skew_secs: u64,
    /// Largest plaintext `send` accepts.
    pub max_message_size: usize,
    /// Remember accepted envelopes for the freshness window and reject
    /// repeats.
    pub reject_duplicates: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            max_future_skew_secs: DEFAULT_MAX_FUTURE_SKEW_SECS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            reject_duplicates: false,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.freshness_window_secs == 0 {
            return Err(CoreError::Config(
                "freshness_window_secs must be greater than zero".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(CoreError::Config(
                "max_message_size must be greater than zero".into(),
            ));
        }
        if self.max_message_size > MAX_MESSAGE_SIZE_LIMIT {
            return Err(CoreError::Config(format!(
                "max_message_size must be at most {MAX_MESSAGE_SIZE_LIMIT}"
            )));
        }
        if i64::try_from(self.freshness_window_secs).is_err()
            || i64::try_from(self.max_future_skew_secs).is_err()
        {
            return Err(CoreError::Config("time window out of range".into()));
        }
        Ok(())
    }
}

/// Where the file key store lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    pub path: Option<PathBuf>,
}

impl KeyStoreConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn require_path(&self) -> Result<&PathBuf, CoreError> {
        self.path
            .as_ref()
            .ok_or_else(|| CoreError::Config("key store path is not set".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.freshness_window_secs, 3600);
        assert_eq!(config.max_future_skew_secs, 300);
        assert_eq!(config.max_message_size, 1_048_576);
        assert!(!config.reject_duplicates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ChannelConfig =
            serde_json::from_str(r#"{"freshness_window_secs": 60}"#).unwrap();
        assert_eq!(config.freshness_window_secs, 60);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = ChannelConfig {
            freshness_window_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let config = ChannelConfig {
            max_message_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_bounds_message_size() {
        let at_limit = ChannelConfig {
            max_message_size: MAX_MESSAGE_SIZE_LIMIT,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());

        for size in [MAX_MESSAGE_SIZE_LIMIT + 1, usize::MAX] {
            let config = ChannelConfig {
                max_message_size: size,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(CoreError::Config(_))));
        }
    }

    #[test]
    fn test_keystore_config_requires_path() {
        assert!(KeyStoreConfig::default().require_path().is_err());
        let config = KeyStoreConfig::with_path("/tmp/keys");
        assert_eq!(config.require_path().unwrap(), &PathBuf::from("/tmp/keys"));
    }
}
