//! Bulk push/pull between the local store and the remote service.
//!
//! Pull is a destructive full replace: for every tracked domain the remote
//! snapshot wins, and local entities the remote does not know are deleted.

use crate::auto_sync::SyncRunner;
use crate::domain::{Domain, StorageKey};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codeforge_storage::{RemoteHttpAdapter, RemoteStats, StorageAdapter, StorageResult, UnifiedStorage};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Remote operations used by bulk sync.
#[async_trait]
pub trait SyncRemote: Send + Sync {
    async fn export_all(&self) -> StorageResult<BTreeMap<String, Value>>;
    async fn import_all(&self, data: &BTreeMap<String, Value>) -> StorageResult<usize>;
    async fn stats(&self) -> StorageResult<RemoteStats>;
    async fn clear_all(&self) -> StorageResult<()>;
}

#[async_trait]
impl SyncRemote for RemoteHttpAdapter {
    async fn export_all(&self) -> StorageResult<BTreeMap<String, Value>> {
        RemoteHttpAdapter::export_all(self).await
    }

    async fn import_all(&self, data: &BTreeMap<String, Value>) -> StorageResult<usize> {
        RemoteHttpAdapter::import_all(self, data).await
    }

    async fn stats(&self) -> StorageResult<RemoteStats> {
        RemoteHttpAdapter::stats(self).await
    }

    async fn clear_all(&self) -> StorageResult<()> {
        StorageAdapter::clear(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
}

/// Observable state of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub remote_connected: bool,
    pub remote_stats: RemoteStats,
    pub error: Option<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            last_synced_at: None,
            remote_connected: false,
            remote_stats: RemoteStats::default(),
            error: None,
        }
    }
}

/// Result of a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub written: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Result of a full push-then-pull sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub pushed: usize,
    pub pull: PullSummary,
}

pub struct SyncOrchestrator {
    storage: Arc<UnifiedStorage>,
    remote: std::sync::RwLock<Option<Arc<dyn SyncRemote>>>,
    domains: Vec<Domain>,
    state: RwLock<SyncState>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator covering the collection domains.
    pub fn new(storage: Arc<UnifiedStorage>, remote: Option<Arc<dyn SyncRemote>>) -> Self {
        Self::with_domains(storage, remote, Domain::COLLECTIONS.to_vec())
    }

    pub fn with_domains(
        storage: Arc<UnifiedStorage>,
        remote: Option<Arc<dyn SyncRemote>>,
        domains: Vec<Domain>,
    ) -> Self {
        Self {
            storage,
            remote: std::sync::RwLock::new(remote),
            domains,
            state: RwLock::new(SyncState::default()),
        }
    }

    pub async fn state(&self) -> SyncState {
        self.state.read().await.clone()
    }

    /// Replaces the remote service. Later operations target `remote`.
    pub fn set_remote(&self, remote: Option<Arc<dyn SyncRemote>>) {
        *self.remote.write().unwrap_or_else(PoisonError::into_inner) = remote;
    }

    fn remote(&self) -> SyncResult<Arc<dyn SyncRemote>> {
        self.remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SyncError::NotConfigured)
    }

    async fn begin(&self) {
        let mut state = self.state.write().await;
        state.status = SyncStatus::Syncing;
        state.error = None;
    }

    async fn finish<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        let mut state = self.state.write().await;
        match &result {
            Ok(_) => {
                state.status = SyncStatus::Success;
                state.last_synced_at = Some(Utc::now());
            }
            Err(e) => {
                state.status = SyncStatus::Error;
                state.error = Some(e.to_string());
            }
        }
        result
    }

    /// Uploads every local entity of the tracked domains in one bulk import.
    pub async fn push_all(&self) -> SyncResult<usize> {
        self.begin().await;
        let result = self.push().await;
        self.finish(result).await
    }

    /// Replaces local entities of the tracked domains with the remote snapshot.
    pub async fn pull_all(&self) -> SyncResult<PullSummary> {
        self.begin().await;
        let result = self.pull().await;
        self.finish(result).await
    }

    /// Pushes, then pulls, so entities only known locally survive the pull.
    pub async fn sync_all(&self) -> SyncResult<SyncSummary> {
        self.begin().await;
        let result = self.push_then_pull().await;
        self.finish(result).await
    }

    async fn push_then_pull(&self) -> SyncResult<SyncSummary> {
        let pushed = self.push().await?;
        let pull = self.pull().await?;
        Ok(SyncSummary { pushed, pull })
    }

    async fn push(&self) -> SyncResult<usize> {
        let remote = self.remote()?;
        let data = self.collect_local().await?;
        let total = data.len();
        let imported = remote.import_all(&data).await.map_err(SyncError::Remote)?;
        info!("[SYNC] Pushed {imported}/{total} entities to remote");
        Ok(imported)
    }

    async fn collect_local(&self) -> SyncResult<BTreeMap<String, Value>> {
        let keys = self.storage.keys().await?;
        let mut data = BTreeMap::new();
        for domain in &self.domains {
            for key in keys.iter().filter(|k| in_domain(k, *domain)) {
                if let Some(value) = self.storage.get(key).await? {
                    data.insert(key.clone(), value);
                }
            }
        }
        Ok(data)
    }

    async fn pull(&self) -> SyncResult<PullSummary> {
        let remote = self.remote()?;
        let snapshot = remote.export_all().await.map_err(SyncError::Remote)?;
        let local_keys = self.storage.keys().await?;
        let mut summary = PullSummary::default();

        for domain in &self.domains {
            let incoming: BTreeMap<&String, &Value> = snapshot
                .iter()
                .filter(|(k, _)| in_domain(k, *domain))
                .collect();

            let mut failed = 0;
            for (key, value) in &incoming {
                match self.storage.set(key, value).await {
                    Ok(()) => summary.written += 1,
                    Err(e) => {
                        error!("[SYNC] Failed to write {key} during pull: {e}");
                        failed += 1;
                    }
                }
            }

            if failed > 0 {
                warn!("[SYNC] Skipping deletions for {domain}: {failed} writes failed");
                summary.failed += failed;
                continue;
            }

            let stale: BTreeSet<&String> = local_keys
                .iter()
                .filter(|k| in_domain(k, *domain) && !incoming.contains_key(k))
                .collect();
            for key in stale {
                match self.storage.delete(key).await {
                    Ok(()) => summary.deleted += 1,
                    Err(e) => {
                        error!("[SYNC] Failed to delete {key} during pull: {e}");
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            "[SYNC] Pulled {} entities, removed {} stale",
            summary.written, summary.deleted
        );
        if summary.failed > 0 {
            return Err(SyncError::PartialPull {
                failed: summary.failed,
            });
        }
        Ok(summary)
    }

    /// Probes the remote and records whether it answered.
    pub async fn check_connection(&self) -> bool {
        let Ok(remote) = self.remote() else {
            self.state.write().await.remote_connected = false;
            return false;
        };

        match remote.stats().await {
            Ok(stats) => {
                debug!("[SYNC] Remote has {} keys", stats.total_keys);
                let mut state = self.state.write().await;
                state.remote_connected = true;
                state.remote_stats = stats;
                true
            }
            Err(e) => {
                warn!("[SYNC] Remote connection check failed: {e}");
                let mut state = self.state.write().await;
                state.remote_connected = false;
                state.remote_stats = RemoteStats::default();
                false
            }
        }
    }

    /// Deletes everything on the remote.
    pub async fn clear_remote(&self) -> SyncResult<()> {
        self.remote()?.clear_all().await.map_err(SyncError::Remote)?;
        self.state.write().await.remote_stats = RemoteStats::default();
        info!("[SYNC] Remote storage cleared");
        Ok(())
    }

    /// Returns to `Idle` and drops the last error.
    pub async fn reset_status(&self) {
        let mut state = self.state.write().await;
        state.status = SyncStatus::Idle;
        state.error = None;
    }
}

fn in_domain(key: &str, domain: Domain) -> bool {
    StorageKey::parse(key).is_some_and(|k| k.domain == domain)
}

#[async_trait]
impl SyncRunner for SyncOrchestrator {
    async fn run_sync(&self) -> SyncResult<()> {
        self.sync_all().await.map(|_| ())
    }

    async fn check_connection(&self) -> bool {
        SyncOrchestrator::check_connection(self).await
    }
}
