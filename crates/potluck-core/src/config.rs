//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used by the sync
//! engine components so that hosts can load them from a single source.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{SyncError, SyncResult};

// ----------------------------------------------------------------------------
// Loader Configuration
// ----------------------------------------------------------------------------

/// Configuration for the initial conversation load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Wall-clock budget for the combined metadata + history + profile fetch
    pub timeout_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl LoaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Live Feed Configuration
// ----------------------------------------------------------------------------

/// Configuration for live-feed reconnection behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveFeedConfig {
    /// Delay before the first resubscription after a close
    pub initial_reconnect_delay_ms: u64,
    /// Upper bound for the backoff delay
    pub max_reconnect_delay_ms: u64,
    /// Growth factor applied per consecutive failed attempt (1.0 = fixed delay)
    pub backoff_multiplier: f64,
    /// Number of state-machine audit entries retained
    pub audit_capacity: usize,
}

impl Default for LiveFeedConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            audit_capacity: 256,
        }
    }
}

impl LiveFeedConfig {
    /// Constant one-second reconnect cadence with no growth
    pub fn fixed_reconnect() -> Self {
        Self {
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 1_000,
            backoff_multiplier: 1.0,
            audit_capacity: 256,
        }
    }

    /// Delay before reconnect attempt number `failures` (1-based)
    pub fn reconnect_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_reconnect_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_reconnect_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

// ----------------------------------------------------------------------------
// Send Configuration
// ----------------------------------------------------------------------------

/// Configuration for outgoing message validation and summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    /// Maximum content length in characters
    pub max_content_length: usize,
    /// Characters of content kept in the conversation summary and notifications
    pub preview_length: usize,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_content_length: 4_000,
            preview_length: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Read Tracker Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadTrackerConfig {
    pub enabled: bool,
}

impl Default for ReadTrackerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ----------------------------------------------------------------------------
// Sync Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for one conversation session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub loader: LoaderConfig,
    pub live_feed: LiveFeedConfig,
    pub send: SendConfig,
    pub read_tracker: ReadTrackerConfig,
}

impl SyncConfig {
    /// Create configuration with short timers for tests
    pub fn testing() -> Self {
        Self {
            loader: LoaderConfig { timeout_ms: 500 },
            live_feed: LiveFeedConfig {
                initial_reconnect_delay_ms: 10,
                max_reconnect_delay_ms: 40,
                backoff_multiplier: 2.0,
                audit_capacity: 64,
            },
            send: SendConfig::default(),
            read_tracker: ReadTrackerConfig::default(),
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> SyncResult<()> {
        if self.loader.timeout_ms == 0 {
            return Err(SyncError::config_error("loader.timeout_ms must be greater than 0"));
        }
        if self.live_feed.backoff_multiplier < 1.0 {
            return Err(SyncError::config_error(
                "live_feed.backoff_multiplier must be at least 1.0",
            ));
        }
        if self.live_feed.max_reconnect_delay_ms < self.live_feed.initial_reconnect_delay_ms {
            return Err(SyncError::config_error(
                "live_feed.max_reconnect_delay_ms must not be below initial_reconnect_delay_ms",
            ));
        }
        if self.send.max_content_length == 0 {
            return Err(SyncError::config_error("send.max_content_length must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.loader.timeout(), Duration::from_secs(30));
        assert!(SyncConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = LiveFeedConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(config.reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(config.reconnect_delay(10), Duration::from_secs(30));
        assert_eq!(config.reconnect_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_fixed_reconnect_cadence() {
        let config = LiveFeedConfig::fixed_reconnect();
        for attempt in 1..6 {
            assert_eq!(config.reconnect_delay(attempt), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut config = SyncConfig::default();
        config.live_feed.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.live_feed.max_reconnect_delay_ms = 10;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.loader.timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
