//! Backend auto-detection and within-session fallback.
//!
//! At first use the selector walks the backends in priority order and keeps
//! the first one whose health probe succeeds:
//!
//! 1. remote HTTP, when preferred or configured by the deployment
//! 2. local embedded object store (default)
//! 3. embedded relational engine, when preferred
//! 4. host key-value service, as a last resort
//!
//! A remote backend chosen while a local store is configured is wrapped in a
//! [`FallbackAdapter`] that retries failed calls locally and demotes the
//! remote permanently after repeated failures.

use crate::adapter::{BackendKind, StorageAdapter};
use crate::config::{RemoteConfig, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::host_kv::{HostKv, HostKvAdapter};
use crate::object_store::ObjectStoreAdapter;
use crate::preferences::StoragePreferences;
use crate::relational::RelationalAdapter;
use crate::remote::RemoteHttpAdapter;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Builds and probes storage adapters.
pub struct BackendSelector {
    config: StorageConfig,
    host: Option<Arc<dyn HostKv>>,
}

impl BackendSelector {
    pub fn new(config: StorageConfig, host: Option<Arc<dyn HostKv>>) -> Self {
        Self { config, host }
    }

    /// Remote settings after applying the user's stored URL.
    pub fn remote_config(&self, prefs: &StoragePreferences) -> RemoteConfig {
        let mut remote = self.config.remote.clone().unwrap_or_default();
        if let Some(url) = &prefs.remote_url {
            remote.base_url = url.clone();
        }
        remote
    }

    /// Backends to attempt, highest priority first.
    pub fn candidates(&self, prefs: &StoragePreferences) -> Vec<BackendKind> {
        let mut order = Vec::with_capacity(4);
        if prefs.prefer_remote || self.config.remote.is_some() {
            order.push(BackendKind::RemoteHttp);
        }
        if self.config.object_store_path.is_some() {
            order.push(BackendKind::LocalEmbedded);
        }
        if prefs.prefer_relational {
            order.push(BackendKind::EmbeddedRelational);
        }
        if self.host.is_some() {
            order.push(BackendKind::HostKv);
        }
        order
    }

    /// Creates the adapter for `kind` without probing it.
    pub fn build(
        &self,
        kind: BackendKind,
        prefs: &StoragePreferences,
    ) -> StorageResult<Arc<dyn StorageAdapter>> {
        let adapter: Arc<dyn StorageAdapter> = match kind {
            BackendKind::RemoteHttp => {
                Arc::new(RemoteHttpAdapter::new(self.remote_config(prefs))?)
            }
            BackendKind::LocalEmbedded => match &self.config.object_store_path {
                Some(path) => Arc::new(ObjectStoreAdapter::open(path)),
                None => Arc::new(ObjectStoreAdapter::open_in_memory()),
            },
            BackendKind::EmbeddedRelational => match &self.config.relational_snapshot_path {
                Some(path) => Arc::new(RelationalAdapter::new(path)),
                None => Arc::new(RelationalAdapter::in_memory()),
            },
            BackendKind::HostKv => Arc::new(HostKvAdapter::new(self.host.clone())),
        };
        Ok(adapter)
    }

    /// Picks the first healthy backend. `preferred` is attempted before the
    /// regular priority order.
    pub async fn select(
        &self,
        prefs: &StoragePreferences,
        preferred: Option<BackendKind>,
    ) -> StorageResult<Arc<dyn StorageAdapter>> {
        let mut order = self.candidates(prefs);
        if let Some(kind) = preferred {
            order.retain(|k| *k != kind);
            order.insert(0, kind);
        }

        for kind in order {
            debug!("[STORAGE] Attempting {kind} backend");
            let adapter = match self.build(kind, prefs) {
                Ok(adapter) => adapter,
                Err(e) => {
                    warn!("[STORAGE] Could not create {kind} backend: {e}");
                    continue;
                }
            };

            match adapter.probe().await {
                Ok(()) => {
                    info!("[STORAGE] Using {kind} backend");
                    return Ok(self.with_fallback(adapter, prefs));
                }
                Err(e) => warn!("[STORAGE] {kind} backend not available: {e}"),
            }
        }

        Err(StorageError::NoBackendAvailable)
    }

    fn with_fallback(
        &self,
        adapter: Arc<dyn StorageAdapter>,
        prefs: &StoragePreferences,
    ) -> Arc<dyn StorageAdapter> {
        if adapter.kind() != BackendKind::RemoteHttp || self.config.object_store_path.is_none() {
            return adapter;
        }
        match self.build(BackendKind::LocalEmbedded, prefs) {
            Ok(fallback) => {
                info!("[STORAGE] Remote backend has a local object store fallback");
                Arc::new(FallbackAdapter::new(
                    adapter,
                    fallback,
                    self.config.max_failures_before_switch,
                ))
            }
            Err(e) => {
                warn!("[STORAGE] No fallback for remote backend: {e}");
                adapter
            }
        }
    }
}

#[derive(Debug, Default)]
struct FallbackState {
    consecutive_failures: u32,
    demoted: bool,
    warned: bool,
}

/// Runs every call against the primary backend, retrying on the fallback.
///
/// Once `threshold` consecutive calls have failed, the fallback becomes the
/// active backend for the rest of the session and the primary is no longer
/// contacted.
pub struct FallbackAdapter {
    primary: Arc<dyn StorageAdapter>,
    fallback: Arc<dyn StorageAdapter>,
    threshold: u32,
    state: Mutex<FallbackState>,
}

impl FallbackAdapter {
    pub fn new(
        primary: Arc<dyn StorageAdapter>,
        fallback: Arc<dyn StorageAdapter>,
        threshold: u32,
    ) -> Self {
        Self {
            primary,
            fallback,
            threshold: threshold.max(1),
            state: Mutex::new(FallbackState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FallbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the primary has been permanently replaced by the fallback.
    pub fn is_demoted(&self) -> bool {
        self.state().demoted
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    async fn run<T, F, Fut>(&self, op: F) -> StorageResult<T>
    where
        F: Fn(Arc<dyn StorageAdapter>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        if self.is_demoted() {
            return op(self.fallback.clone()).await;
        }

        let err = match op(self.primary.clone()).await {
            Ok(value) => {
                self.state().consecutive_failures = 0;
                return Ok(value);
            }
            Err(e) => e,
        };

        let demoted_now = {
            let mut state = self.state();
            state.consecutive_failures += 1;
            if !state.warned {
                warn!(
                    "[STORAGE] {} operation failed, falling back to {}: {err}",
                    self.primary.kind(),
                    self.fallback.kind()
                );
                state.warned = true;
            }
            if state.consecutive_failures >= self.threshold {
                state.demoted = true;
                state.consecutive_failures = 0;
                true
            } else {
                false
            }
        };
        if demoted_now {
            warn!(
                "[STORAGE] Too many {} failures, permanently switching to {} for this session",
                self.primary.kind(),
                self.fallback.kind()
            );
        }

        op(self.fallback.clone()).await.map_err(|e| {
            error!("[STORAGE] Fallback to {} also failed: {e}", self.fallback.kind());
            e
        })
    }
}

#[async_trait]
impl StorageAdapter for FallbackAdapter {
    fn kind(&self) -> BackendKind {
        if self.is_demoted() {
            self.fallback.kind()
        } else {
            self.primary.kind()
        }
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.run(|a| async move { a.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        self.run(|a| async move { a.set(key, value).await }).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.run(|a| async move { a.delete(key).await }).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.run(|a| async move { a.keys().await }).await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.run(|a| async move { a.clear().await }).await
    }

    async fn close(&self) -> StorageResult<()> {
        if let Err(e) = self.primary.close().await {
            warn!("[STORAGE] Failed to close {}: {e}", self.primary.kind());
        }
        self.fallback.close().await
    }

    async fn probe(&self) -> StorageResult<()> {
        self.run(|a| async move { a.probe().await }).await
    }
}
