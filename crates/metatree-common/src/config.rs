//! Configuration types for metatree
//!
//! This module defines configuration structures used across components.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a metatree repository
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Hide the data tree and serve only each client's projected self view
    pub only_self: bool,
    /// Watch and coalescing configuration
    pub watch: WatchConfig,
    /// Backend sync lifecycle configuration
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            only_self: false,
            watch: WatchConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Watch delivery and coalescing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Per-watcher event buffer capacity
    pub buf_len: usize,
    /// Quiet period before a coalesced watch result is returned (milliseconds)
    pub debounce_ms: u64,
    /// Maximum idle timers retained by the shared pool
    pub timer_pool_idle: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buf_len: 100,
            debounce_ms: 100,
            timer_pool_idle: 32,
        }
    }
}

impl WatchConfig {
    /// Debounce window as a [`Duration`]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Backend sync lifecycle configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Grace period between signalling the sync loops to stop and
    /// destroying the stores (milliseconds)
    pub shutdown_grace_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 1000,
        }
    }
}

impl SyncConfig {
    /// Shutdown grace period as a [`Duration`]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.only_self);
        assert_eq!(config.watch.buf_len, 100);
        assert_eq!(config.watch.debounce(), Duration::from_millis(100));
        assert_eq!(config.sync.shutdown_grace(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = Config::default();
        let text = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.watch.buf_len, config.watch.buf_len);
        assert_eq!(parsed.sync.shutdown_grace_ms, config.sync.shutdown_grace_ms);
    }
}
