//! Debounced, write-coalescing persistence queue.
//!
//! Every observed change becomes a [`PendingOperation`] parked in a per-key
//! slot with its own debounce timer. A newer change for the same key replaces
//! the parked operation and re-arms the timer, so bursts of edits collapse
//! into one write carrying the latest value. When a timer expires the
//! operation moves to the due batch and a flush starts.
//!
//! Flushes never overlap. A flush requested while one is running is recorded
//! as pending and the running flush keeps draining until the due batch is
//! empty.

use crate::config::PersistenceConfig;
use crate::domain::{Domain, OperationKind, PendingOperation, StateChange};
use codeforge_storage::{BackendKind, StorageAdapter, UnifiedStorage};
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one or more flush batches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Operations written to the local store.
    pub persisted: usize,
    /// Keys whose local write failed.
    pub failed: Vec<String>,
    /// Successful remote mirror pushes.
    pub mirrored: usize,
    pub mirror_failed: usize,
}

impl FlushSummary {
    fn merge(&mut self, other: FlushSummary) {
        self.persisted += other.persisted;
        self.failed.extend(other.failed);
        self.mirrored += other.mirrored;
        self.mirror_failed += other.mirror_failed;
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    Idle,
    Flushing,
    /// More work arrived while flushing; drain again before going idle.
    FlushingWithPending,
}

struct Slot {
    op: PendingOperation,
    generation: u64,
    timer: JoinHandle<()>,
}

struct QueueState {
    configs: HashMap<Domain, PersistenceConfig>,
    /// Operations still inside their debounce window.
    slots: HashMap<String, Slot>,
    /// Operations ready for the next flush batch.
    due: HashMap<String, PendingOperation>,
    flush: FlushState,
    next_generation: u64,
    last_summary: FlushSummary,
}

enum Outcome {
    Persisted { mirrored: Option<bool> },
    Failed(String),
}

struct Inner {
    storage: Arc<UnifiedStorage>,
    mirror: RwLock<Option<Arc<dyn StorageAdapter>>>,
    state: Mutex<QueueState>,
    idle: watch::Sender<bool>,
}

/// Observes state changes and persists them through the storage facade.
///
/// Cloning shares the queue. Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct PersistenceQueue {
    inner: Arc<Inner>,
}

impl PersistenceQueue {
    /// Creates a queue writing to `storage`. Successful writes are also
    /// pushed to `mirror` for domains with mirroring enabled.
    pub fn new(storage: Arc<UnifiedStorage>, mirror: Option<Arc<dyn StorageAdapter>>) -> Self {
        let configs = Domain::ALL
            .into_iter()
            .map(|d| (d, PersistenceConfig::for_domain(d)))
            .collect();
        let (idle, _) = watch::channel(true);

        Self {
            inner: Arc::new(Inner {
                storage,
                mirror: RwLock::new(mirror),
                state: Mutex::new(QueueState {
                    configs,
                    slots: HashMap::new(),
                    due: HashMap::new(),
                    flush: FlushState::Idle,
                    next_generation: 0,
                    last_summary: FlushSummary::default(),
                }),
                idle,
            }),
        }
    }

    /// Translates a state change into pending operations.
    ///
    /// Returns how many operations were queued; changes to a disabled domain
    /// queue nothing.
    pub fn observe(&self, change: &StateChange) -> usize {
        let domain = change.domain();
        let config = self.domain_config(domain);
        if !config.enabled {
            debug!("[QUEUE] Persistence disabled for {domain}, ignoring change");
            return 0;
        }

        let ops = change.operations();
        let queued = ops.len();
        for op in ops {
            self.enqueue(op, config.debounce());
        }
        queued
    }

    fn enqueue(&self, op: PendingOperation, debounce: Duration) {
        let key = op.key.to_string();
        let mut state = self.inner.state();
        state.next_generation += 1;
        let generation = state.next_generation;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&timer_key, generation).await;
            }
        });

        // A due operation for the key is superseded as well.
        if state.due.remove(&key).is_some() {
            debug!("[QUEUE] Replacing due operation for {key}");
        }
        if let Some(replaced) = state.slots.insert(key, Slot { op, generation, timer }) {
            replaced.timer.abort();
        }
    }

    /// Skips every debounce window and drains the queue to empty.
    pub async fn flush(&self) -> FlushSummary {
        {
            let mut state = self.inner.state();
            let QueueState { slots, due, .. } = &mut *state;
            for (key, slot) in slots.drain() {
                slot.timer.abort();
                due.insert(key, slot.op);
            }
        }

        match self.inner.process().await {
            Some(summary) => summary,
            None => {
                self.wait_idle().await;
                self.inner.state().last_summary.clone()
            }
        }
    }

    /// Resolves once no flush is running.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        if let Err(e) = idle.wait_for(|idle| *idle).await {
            debug!("[QUEUE] Idle signal closed: {e}");
        }
    }

    /// Replaces the remote mirror used by later flushes.
    pub fn set_mirror(&self, mirror: Option<Arc<dyn StorageAdapter>>) {
        *self.inner.mirror.write().unwrap_or_else(PoisonError::into_inner) = mirror;
    }

    /// Operations not yet written, whether debouncing or due.
    pub fn pending_count(&self) -> usize {
        let state = self.inner.state();
        state.slots.len() + state.due.len()
    }

    pub fn domain_config(&self, domain: Domain) -> PersistenceConfig {
        self.inner
            .state()
            .configs
            .get(&domain)
            .cloned()
            .unwrap_or_else(|| PersistenceConfig::for_domain(domain))
    }

    pub fn configure_domain(&self, domain: Domain, config: PersistenceConfig) {
        self.inner.state().configs.insert(domain, config);
    }

    pub fn enable_domain(&self, domain: Domain) {
        self.update_config(domain, |c| c.enabled = true);
    }

    /// Stops persisting changes to `domain`. Already queued operations still
    /// flush.
    pub fn disable_domain(&self, domain: Domain) {
        self.update_config(domain, |c| c.enabled = false);
    }

    fn update_config(&self, domain: Domain, f: impl FnOnce(&mut PersistenceConfig)) {
        let mut state = self.inner.state();
        let config = state
            .configs
            .entry(domain)
            .or_insert_with(|| PersistenceConfig::for_domain(domain));
        f(config);
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Debounce timer callback. Stale generations are ignored.
    async fn expire(self: &Arc<Self>, key: &str, generation: u64) {
        let fire = {
            let mut state = self.state();
            let current = state
                .slots
                .get(key)
                .is_some_and(|slot| slot.generation == generation);
            if current && let Some(slot) = state.slots.remove(key) {
                state.due.insert(key.to_string(), slot.op);
            }
            current
        };
        if fire {
            self.process().await;
        }
    }

    /// Runs flush batches until nothing is due. Returns `None` when another
    /// flush was already running and will pick up the work instead.
    async fn process(self: &Arc<Self>) -> Option<FlushSummary> {
        {
            let mut state = self.state();
            match state.flush {
                FlushState::Idle if state.due.is_empty() => {
                    return Some(FlushSummary::default());
                }
                FlushState::Idle => {
                    state.flush = FlushState::Flushing;
                    self.idle.send_replace(false);
                }
                FlushState::Flushing | FlushState::FlushingWithPending => {
                    state.flush = FlushState::FlushingWithPending;
                    return None;
                }
            }
        }

        let mut summary = FlushSummary::default();
        loop {
            let batch: Vec<PendingOperation> = {
                let mut state = self.state();
                state.flush = FlushState::Flushing;
                state.due.drain().map(|(_, op)| op).collect()
            };

            if !batch.is_empty() {
                debug!("[QUEUE] Flushing {} operations", batch.len());
                summary.merge(self.execute(batch).await);
            }

            let done = {
                let mut state = self.state();
                if state.flush == FlushState::FlushingWithPending || !state.due.is_empty() {
                    false
                } else {
                    state.flush = FlushState::Idle;
                    state.last_summary = summary.clone();
                    self.idle.send_replace(true);
                    true
                }
            };
            if done {
                break;
            }
        }

        if !summary.is_clean() {
            warn!("[QUEUE] {} operations failed", summary.failed.len());
        }
        Some(summary)
    }

    async fn execute(&self, batch: Vec<PendingOperation>) -> FlushSummary {
        let configs = self.state().configs.clone();

        // Mirroring onto the backend that just took the write would duplicate it.
        let mirror = self
            .mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mirror = match mirror {
            Some(mirror)
                if self.storage.active_backend().await.ok() != Some(BackendKind::RemoteHttp) =>
            {
                Some(mirror)
            }
            _ => None,
        };

        let outcomes = join_all(batch.iter().map(|op| {
            let mirror = mirror.as_ref().filter(|_| {
                configs
                    .get(&op.key.domain)
                    .is_some_and(|config| config.mirror_remote)
            });
            self.apply(op, mirror)
        }))
        .await;

        let mut summary = FlushSummary::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Persisted { mirrored } => {
                    summary.persisted += 1;
                    match mirrored {
                        Some(true) => summary.mirrored += 1,
                        Some(false) => summary.mirror_failed += 1,
                        None => {}
                    }
                }
                Outcome::Failed(key) => summary.failed.push(key),
            }
        }
        if summary.persisted > 0 {
            info!("[QUEUE] Persisted {} operations", summary.persisted);
        }
        summary
    }

    async fn apply(&self, op: &PendingOperation, mirror: Option<&Arc<dyn StorageAdapter>>) -> Outcome {
        let key = op.key.to_string();
        let value = op.value.as_ref().unwrap_or(&Value::Null);

        let local = match op.kind {
            OperationKind::Put => self.storage.set(&key, value).await,
            OperationKind::Delete => self.storage.delete(&key).await,
        };
        if let Err(e) = local {
            error!("[QUEUE] Failed to persist {:?} for {key}: {e}", op.kind);
            return Outcome::Failed(key);
        }

        let Some(mirror) = mirror else {
            return Outcome::Persisted { mirrored: None };
        };
        let remote = match op.kind {
            OperationKind::Put => mirror.set(&key, value).await,
            OperationKind::Delete => mirror.delete(&key).await,
        };
        if let Err(e) = &remote {
            // Left for the next full sync to reconcile.
            warn!("[QUEUE] Remote mirror failed for {key}: {e}");
        }
        Outcome::Persisted {
            mirrored: Some(remote.is_ok()),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in state.slots.values() {
            slot.timer.abort();
        }
    }
}
