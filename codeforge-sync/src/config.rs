//! Persistence and sync configuration.

use crate::domain::Domain;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How changes to one domain are persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Ignore changes to the domain when false.
    pub enabled: bool,
    /// Push each successful local write to the remote service as well.
    pub mirror_remote: bool,
    /// Quiet period before a change is flushed.
    pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mirror_remote: true,
            debounce_ms: 300,
        }
    }
}

impl PersistenceConfig {
    /// Default settings for `domain`. Settings are never mirrored.
    pub fn for_domain(domain: Domain) -> Self {
        Self {
            mirror_remote: domain != Domain::Settings,
            ..Self::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Periodic sync settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSyncConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Skip timer ticks when nothing changed since the last sync.
    pub sync_on_change: bool,
    /// Changes after which a sync starts without waiting for the timer.
    pub max_queue_size: usize,
}

impl Default for AutoSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 30_000,
            sync_on_change: false,
            max_queue_size: 50,
        }
    }
}

impl AutoSyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Top-level settings for the sync crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub auto_sync: AutoSyncConfig,
    /// Domains covered by bulk push and pull.
    pub tracked_domains: Vec<Domain>,
    /// Debounce applied to every domain unless overridden later.
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: AutoSyncConfig::default(),
            tracked_domains: Domain::COLLECTIONS.to_vec(),
            debounce_ms: 300,
        }
    }
}
