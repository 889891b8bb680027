//! Timestamp freshness and duplicate detection.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::config::ChannelConfig;
use crate::errors::CoreError;

/// Accepts timestamps no older than `max_age_secs` and no further ahead than
/// `max_future_skew_secs`, both relative to the caller's `now`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreshnessWindow {
    max_age_secs: u64,
    max_future_skew_secs: u64,
}

impl FreshnessWindow {
    pub fn new(max_age_secs: u64, max_future_skew_secs: u64) -> Self {
        Self {
            max_age_secs,
            max_future_skew_secs,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.freshness_window_secs, config.max_future_skew_secs)
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    pub fn is_fresh(&self, timestamp: u64, now: u64) -> bool {
        if timestamp <= now {
            now - timestamp <= self.max_age_secs
        } else {
            timestamp - now <= self.max_future_skew_secs
        }
    }

    pub fn check(&self, timestamp: u64, now: u64) -> Result<(), CoreError> {
        if self.is_fresh(timestamp, now) {
            Ok(())
        } else {
            Err(CoreError::StaleMessage { timestamp, now })
        }
    }
}

/// Remembers digests of accepted messages until their timestamps leave the
/// freshness window, after which the window itself rejects them.
#[derive(Debug)]
pub struct ReplayCache {
    window: FreshnessWindow,
    /// digest -> message timestamp
    seen: Mutex<HashMap<[u8; 32], u64>>,
}

impl ReplayCache {
    pub fn new(window: FreshnessWindow) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `digest`, or fail with `Replayed` if it was already recorded.
    /// Check and insert happen under one lock.
    pub fn check_and_insert(
        &self,
        digest: [u8; 32],
        timestamp: u64,
        now: u64,
    ) -> Result<(), CoreError> {
        let mut seen = self.seen.lock();
        let window = self.window;
        seen.retain(|_, ts| window.is_fresh(*ts, now));

        if seen.contains_key(&digest) {
            return Err(CoreError::Replayed);
        }
        seen.insert(digest, timestamp);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
