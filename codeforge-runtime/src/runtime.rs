//! Builds the storage and sync services and routes state changes to them.

use crate::config::RuntimeConfig;
use anyhow::Context;
use codeforge_storage::{
    BackendKind, FilePreferences, HostKv, MigrationReport, PreferenceStore, RemoteHttpAdapter,
    StorageAdapter, UnifiedStorage,
};
use codeforge_sync::{
    AutoSyncConfig, AutoSyncManager, Domain, PersistenceQueue, StateChange, SyncOrchestrator,
    SyncRemote,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// The running persistence core.
pub struct Runtime {
    config: RuntimeConfig,
    storage: Arc<UnifiedStorage>,
    queue: PersistenceQueue,
    orchestrator: Arc<SyncOrchestrator>,
    auto_sync: AutoSyncManager,
}

impl Runtime {
    pub async fn start(config: RuntimeConfig) -> anyhow::Result<Self> {
        Self::start_with_host(config, None).await
    }

    /// Starts the services, using `host` as the last-resort backend.
    pub async fn start_with_host(
        config: RuntimeConfig,
        host: Option<Arc<dyn HostKv>>,
    ) -> anyhow::Result<Self> {
        crate::init_logging(&config.log_filter);
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

        let preferences: Arc<dyn PreferenceStore> =
            Arc::new(FilePreferences::new(config.preferences_path()));
        let remote_url = match &config.remote_url {
            Some(url) => Some(url.clone()),
            None => match preferences.load() {
                Ok(prefs) => prefs.remote_url,
                Err(e) => {
                    warn!("[RUNTIME] Ignoring unreadable storage preferences: {e}");
                    None
                }
            },
        };

        let storage = Arc::new(UnifiedStorage::new(
            config.storage_config(),
            preferences,
            host,
        ));
        let backend = storage
            .active_backend()
            .await
            .context("initializing storage backend")?;
        info!("[RUNTIME] Storage ready on {backend} backend");

        let remote = match remote_url {
            Some(url) => Some(Arc::new(
                RemoteHttpAdapter::new(config.remote_config(url)).context("creating remote client")?,
            )),
            None => None,
        };

        let queue = PersistenceQueue::new(
            storage.clone(),
            remote.clone().map(|r| r as Arc<dyn StorageAdapter>),
        );
        for domain in Domain::ALL {
            let mut domain_config = queue.domain_config(domain);
            domain_config.debounce_ms = config.sync.debounce_ms;
            queue.configure_domain(domain, domain_config);
        }

        let orchestrator = Arc::new(SyncOrchestrator::with_domains(
            storage.clone(),
            remote.map(|r| r as Arc<dyn SyncRemote>),
            config.sync.tracked_domains.clone(),
        ));
        let auto_sync = AutoSyncManager::new(orchestrator.clone());
        auto_sync.configure(config.sync.auto_sync.clone());

        Ok(Self {
            config,
            storage,
            queue,
            orchestrator,
            auto_sync,
        })
    }

    pub fn storage(&self) -> &Arc<UnifiedStorage> {
        &self.storage
    }

    pub fn queue(&self) -> &PersistenceQueue {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn auto_sync(&self) -> &AutoSyncManager {
        &self.auto_sync
    }

    pub async fn active_backend(&self) -> anyhow::Result<BackendKind> {
        Ok(self.storage.active_backend().await?)
    }

    /// Moves storage onto the remote service at `url` and points sync and
    /// mirroring at it.
    ///
    /// Sync targets `url` even when the storage switch fails.
    pub async fn switch_to_remote(&self, url: impl Into<String>) -> anyhow::Result<MigrationReport> {
        let url = url.into();
        let remote = Arc::new(
            RemoteHttpAdapter::new(self.config.remote_config(url.clone()))
                .context("creating remote client")?,
        );

        let report = self.storage.switch_to_remote(url.clone()).await;

        self.queue.set_mirror(Some(remote.clone() as Arc<dyn StorageAdapter>));
        self.orchestrator.set_remote(Some(remote as Arc<dyn SyncRemote>));
        info!("[RUNTIME] Sync now targets {url}");

        report.with_context(|| format!("switching storage to {url}"))
    }

    /// Hook invoked for every state-changing event.
    pub fn on_state_change(&self, change: &StateChange) {
        self.queue.observe(change);

        if change.is_tracked_edit() {
            self.auto_sync.track_change();
        }

        if let StateChange::UpdateSettings(settings) = change
            && let Some(config) = auto_sync_from_settings(settings, self.auto_sync.config())
        {
            info!(
                "[RUNTIME] Auto-sync {} from settings",
                if config.enabled { "enabled" } else { "disabled" }
            );
            self.auto_sync.configure(config);
        }
    }

    /// Stops the timer, flushes pending writes and closes the backend.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.auto_sync.stop();

        let summary = self.queue.flush().await;
        if !summary.is_clean() {
            warn!(
                "[RUNTIME] {} writes failed during shutdown flush",
                summary.failed.len()
            );
        }

        self.storage.close().await.context("closing storage")?;
        info!("[RUNTIME] Shut down");
        Ok(())
    }
}

/// Auto-sync settings carried by an app settings update, if it has any.
fn auto_sync_from_settings(settings: &Value, current: AutoSyncConfig) -> Option<AutoSyncConfig> {
    let enabled = settings.get("autoSync")?.as_bool()?;
    let interval_ms = settings
        .get("autoSyncInterval")
        .and_then(Value::as_u64)
        .unwrap_or(AutoSyncConfig::default().interval_ms);

    Some(AutoSyncConfig {
        enabled,
        interval_ms,
        ..current
    })
}
