//! Persisted backend preferences read by the selector at startup.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Backend preference flags that survive restarts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePreferences {
    /// Try the remote service first.
    pub prefer_remote: bool,
    /// Use the embedded relational engine when the object store is unavailable.
    pub prefer_relational: bool,
    /// Remote service URL chosen by the user.
    pub remote_url: Option<String>,
}

/// Where preferences are kept.
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> StorageResult<StoragePreferences>;
    fn save(&self, prefs: &StoragePreferences) -> StorageResult<()>;
}

/// Preferences stored as a JSON file.
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferences {
    fn load(&self) -> StorageResult<StoragePreferences> {
        if !self.path.exists() {
            return Ok(StoragePreferences::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|e| {
            StorageError::Preferences(format!("{}: {e}", self.path.display()))
        })
    }

    fn save(&self, prefs: &StoragePreferences) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(prefs)?)?;
        Ok(())
    }
}

/// Preferences kept for the lifetime of the process.
#[derive(Default)]
pub struct MemoryPreferences {
    prefs: Mutex<StoragePreferences>,
}

impl MemoryPreferences {
    pub fn new(prefs: StoragePreferences) -> Self {
        Self {
            prefs: Mutex::new(prefs),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn load(&self) -> StorageResult<StoragePreferences> {
        self.prefs
            .lock()
            .map(|p| p.clone())
            .map_err(|_| StorageError::Preferences("preferences lock poisoned".to_string()))
    }

    fn save(&self, prefs: &StoragePreferences) -> StorageResult<()> {
        let mut guard = self
            .prefs
            .lock()
            .map_err(|_| StorageError::Preferences("preferences lock poisoned".to_string()))?;
        *guard = prefs.clone();
        Ok(())
    }
}
