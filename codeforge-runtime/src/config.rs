//! Runtime configuration: a JSON file plus environment overrides.

use anyhow::Context;
use codeforge_storage::{RemoteConfig, StorageConfig};
use codeforge_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the remote service URL.
pub const ENV_REMOTE_URL: &str = "CODEFORGE_REMOTE_URL";
/// Overrides the data directory.
pub const ENV_DATA_DIR: &str = "CODEFORGE_DATA_DIR";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding the embedded engines and preferences.
    pub data_dir: PathBuf,

    /// Remote key-value service chosen by the deployment.
    pub remote_url: Option<String>,

    pub remote_timeout_ms: u64,

    pub max_failures_before_switch: u32,

    pub sync: SyncConfig,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("codeforge-data"),
            remote_url: None,
            remote_timeout_ms: 2000,
            max_failures_before_switch: 3,
            sync: SyncConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Loads `path` if given, otherwise the defaults, then applies env overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_REMOTE_URL)
            && !url.trim().is_empty()
        {
            self.remote_url = Some(url);
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR)
            && !dir.trim().is_empty()
        {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("storage-preferences.json")
    }

    pub fn remote_config(&self, url: impl Into<String>) -> RemoteConfig {
        RemoteConfig {
            timeout_ms: self.remote_timeout_ms,
            ..RemoteConfig::with_base_url(url)
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            remote: self.remote_url.as_deref().map(|url| self.remote_config(url)),
            max_failures_before_switch: self.max_failures_before_switch,
            ..StorageConfig::in_dir(&self.data_dir)
        }
    }
}
