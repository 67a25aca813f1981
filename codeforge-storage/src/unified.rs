//! The unified storage facade.
//!
//! Consumers see one key-value surface regardless of which backend the
//! selector picked. The backend is chosen on first use and can be changed at
//! runtime with [`UnifiedStorage::switch_backend`], which migrates every
//! entry to the new backend.

use crate::adapter::{BackendKind, StorageAdapter};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::host_kv::HostKv;
use crate::preferences::{MemoryPreferences, PreferenceStore, StoragePreferences};
use crate::selector::BackendSelector;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Outcome of a backend switch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: BackendKind,
    pub to: BackendKind,
    /// Entries found on the previous backend.
    pub total: usize,
    pub migrated: usize,
    /// Entries that could not be read from the old backend or written to the
    /// new one. They are not rolled back.
    pub failed: usize,
}

impl MigrationReport {
    fn unchanged(kind: BackendKind) -> Self {
        Self {
            from: kind,
            to: kind,
            total: 0,
            migrated: 0,
            failed: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// The report as an error, if anything failed to migrate.
    pub fn partial_error(&self) -> Option<StorageError> {
        (!self.is_complete()).then_some(StorageError::PartialMigration {
            failed: self.failed,
            total: self.total,
        })
    }
}

/// Single entry point for key-value persistence.
///
/// Every operation initializes the backend on first use. Initialization is
/// memoized: concurrent first calls wait for one selection attempt, and a
/// failed attempt is retried by the next call.
///
/// Calls issued while a switch is migrating data may land on either backend.
pub struct UnifiedStorage {
    selector: BackendSelector,
    preferences: Arc<dyn PreferenceStore>,
    active: RwLock<Option<Arc<dyn StorageAdapter>>>,
}

impl UnifiedStorage {
    pub fn new(
        config: StorageConfig,
        preferences: Arc<dyn PreferenceStore>,
        host: Option<Arc<dyn HostKv>>,
    ) -> Self {
        Self {
            selector: BackendSelector::new(config, host),
            preferences,
            active: RwLock::new(None),
        }
    }

    /// Facade already bound to `adapter`, skipping selection.
    pub fn from_adapter(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            selector: BackendSelector::new(StorageConfig::default(), None),
            preferences: Arc::new(MemoryPreferences::default()),
            active: RwLock::new(Some(adapter)),
        }
    }

    async fn adapter(&self) -> StorageResult<Arc<dyn StorageAdapter>> {
        if let Some(adapter) = self.active.read().await.as_ref() {
            return Ok(adapter.clone());
        }

        let mut active = self.active.write().await;
        // Another caller may have finished initialization while we waited.
        if let Some(adapter) = active.as_ref() {
            return Ok(adapter.clone());
        }

        let prefs = self.preferences.load().unwrap_or_else(|e| {
            warn!("[STORAGE] Could not read storage preferences, using defaults: {e}");
            StoragePreferences::default()
        });
        let adapter = self.selector.select(&prefs, None).await?;
        *active = Some(adapter.clone());
        Ok(adapter)
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.adapter().await?.get(key).await
    }

    pub async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        self.adapter().await?.set(key, value).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.adapter().await?.delete(key).await
    }

    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        self.adapter().await?.keys().await
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.adapter().await?.clear().await
    }

    /// Backend currently serving requests, initializing one if needed.
    pub async fn active_backend(&self) -> StorageResult<BackendKind> {
        Ok(self.adapter().await?.kind())
    }

    /// Stores a remote URL and switches to the remote backend.
    pub async fn switch_to_remote(&self, url: impl Into<String>) -> StorageResult<MigrationReport> {
        let mut prefs = self.preferences.load()?;
        prefs.remote_url = Some(url.into());
        self.preferences.save(&prefs)?;
        self.switch_backend(BackendKind::RemoteHttp).await
    }

    /// Moves every entry to `target` and makes it the active backend.
    ///
    /// Entries that fail to migrate are logged and counted in the report;
    /// there is no rollback. Fails with [`StorageError::BackendUnavailable`]
    /// when `target` could not be initialized, after migrating the entries to
    /// whichever backend the selector fell back to.
    pub async fn switch_backend(&self, target: BackendKind) -> StorageResult<MigrationReport> {
        let current = self.adapter().await?;
        let from = current.kind();
        if from == target {
            debug!("[STORAGE] Already using {target} backend");
            return Ok(MigrationReport::unchanged(target));
        }

        info!("[STORAGE] Switching storage backend from {from} to {target}");
        let keys = current.keys().await?;
        let total = keys.len();
        let mut failed = 0;
        let mut captured = Vec::with_capacity(total);
        for key in keys {
            match current.get(&key).await {
                Ok(Some(value)) => captured.push((key, value)),
                Ok(None) => {}
                Err(e) => {
                    error!("[STORAGE] Failed to read {key} for migration: {e}");
                    failed += 1;
                }
            }
        }

        if let Err(e) = current.close().await {
            warn!("[STORAGE] Failed to close {from} backend: {e}");
        }

        let mut prefs = self.preferences.load()?;
        match target {
            BackendKind::RemoteHttp => {
                prefs.prefer_remote = true;
                prefs.prefer_relational = false;
            }
            BackendKind::EmbeddedRelational => {
                prefs.prefer_remote = false;
                prefs.prefer_relational = true;
            }
            BackendKind::LocalEmbedded | BackendKind::HostKv => {
                prefs.prefer_remote = false;
                prefs.prefer_relational = false;
            }
        }
        self.preferences.save(&prefs)?;

        let next = {
            let mut active = self.active.write().await;
            match self.selector.select(&prefs, Some(target)).await {
                Ok(next) => {
                    *active = Some(next.clone());
                    next
                }
                Err(e) => {
                    // The old backend still holds every entry and reopens lazily.
                    error!("[STORAGE] No backend available after switch, staying on {from}: {e}");
                    *active = Some(current.clone());
                    return Err(e);
                }
            }
        };

        let mut migrated = 0;
        for (key, value) in &captured {
            match next.set(key, value).await {
                Ok(()) => migrated += 1,
                Err(e) => {
                    error!("[STORAGE] Failed to migrate {key}: {e}");
                    failed += 1;
                }
            }
        }

        let report = MigrationReport {
            from,
            to: next.kind(),
            total,
            migrated,
            failed,
        };
        if let Some(partial) = report.partial_error() {
            warn!("[STORAGE] {partial}");
        }
        info!(
            "[STORAGE] Migrated {migrated}/{total} entries from {from} to {}",
            report.to
        );

        if report.to != target {
            return Err(StorageError::BackendUnavailable(target));
        }
        Ok(report)
    }

    /// Every stored entry as one map.
    pub async fn export_data(&self) -> StorageResult<BTreeMap<String, Value>> {
        let adapter = self.adapter().await?;
        let mut data = BTreeMap::new();
        for key in adapter.keys().await? {
            if let Some(value) = adapter.get(&key).await? {
                data.insert(key, value);
            }
        }
        Ok(data)
    }

    /// Writes every entry of `data`, returning how many were stored.
    pub async fn import_data(&self, data: &BTreeMap<String, Value>) -> StorageResult<usize> {
        let adapter = self.adapter().await?;
        let mut imported = 0;
        for (key, value) in data {
            match adapter.set(key, value).await {
                Ok(()) => imported += 1,
                Err(e) => error!("[STORAGE] Failed to import {key}: {e}"),
            }
        }
        Ok(imported)
    }

    /// Closes the active backend. The next call selects one again.
    pub async fn close(&self) -> StorageResult<()> {
        let adapter = self.active.write().await.take();
        match adapter {
            Some(adapter) => adapter.close().await,
            None => Ok(()),
        }
    }
}
