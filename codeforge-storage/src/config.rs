//! Storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the remote key-value service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the service (e.g., "http://localhost:5001").
    pub base_url: String,

    /// Path prefix of the storage endpoints.
    pub storage_path: String,

    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            storage_path: "/api/storage".to_string(),
            timeout_ms: 2000,
        }
    }
}

impl RemoteConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for backend selection and the on-disk engines.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Remote service configured by the deployment. When set, the remote
    /// backend is attempted first even without a stored preference.
    pub remote: Option<RemoteConfig>,

    /// Database file of the local embedded object store.
    pub object_store_path: Option<PathBuf>,

    /// Snapshot blob of the embedded relational engine.
    pub relational_snapshot_path: Option<PathBuf>,

    /// Consecutive remote failures before demoting to the local fallback.
    pub max_failures_before_switch: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            remote: None,
            object_store_path: None,
            relational_snapshot_path: None,
            max_failures_before_switch: 3,
        }
    }
}

impl StorageConfig {
    /// Lays out the engine files under a single data directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            object_store_path: Some(dir.join("codeforge.duckdb")),
            relational_snapshot_path: Some(dir.join("codeforge-sqlite.snapshot")),
            ..Self::default()
        }
    }
}
