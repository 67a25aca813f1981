//! Periodic and change-driven full sync.
//!
//! At most one sync runs at a time. Requests arriving while a sync runs are
//! coalesced into exactly one follow-up run, however many there were.

use crate::config::AutoSyncConfig;
use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Performs one full sync. Implemented by the sync orchestrator.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run_sync(&self) -> SyncResult<()>;

    /// Refreshes the remote connection status. Returns true if reachable.
    async fn check_connection(&self) -> bool {
        true
    }
}

/// What a sync request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The request ran a sync (plus any coalesced rerun) to completion.
    Started,
    /// A sync was already running; one rerun is scheduled after it.
    Coalesced,
}

/// Snapshot returned by [`AutoSyncManager::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSyncStatus {
    pub enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub change_counter: usize,
    /// Time until the timer may sync again; `None` while disabled.
    pub next_sync_in: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhase {
    Idle,
    Running,
    RunningWithPending,
}

struct State {
    config: AutoSyncConfig,
    phase: SyncPhase,
    change_counter: usize,
    last_sync: Option<Instant>,
    last_sync_at: Option<DateTime<Utc>>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    runner: Arc<dyn SyncRunner>,
    state: Mutex<State>,
}

/// Schedules full syncs on a timer, on demand and after bursts of changes.
///
/// Cloning shares the manager. Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct AutoSyncManager {
    inner: Arc<Inner>,
}

impl AutoSyncManager {
    pub fn new(runner: Arc<dyn SyncRunner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                state: Mutex::new(State {
                    config: AutoSyncConfig::default(),
                    phase: SyncPhase::Idle,
                    change_counter: 0,
                    last_sync: None,
                    last_sync_at: None,
                    timer: None,
                }),
            }),
        }
    }

    /// Applies `config`, starting the timer when enabled and stopping it
    /// otherwise. Starting the timer also checks the remote connection.
    pub fn configure(&self, config: AutoSyncConfig) {
        let mut state = self.inner.state();
        let interval_changed = state.config.interval_ms != config.interval_ms;
        state.config = config;

        if !state.config.enabled {
            if let Some(timer) = state.timer.take() {
                timer.abort();
                info!("[AUTOSYNC] Stopped");
            }
            return;
        }

        if state.timer.is_some() && !interval_changed {
            return;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let period = state.config.interval();
        state.timer = Some(self.spawn_timer(period));
        info!("[AUTOSYNC] Started with {}ms interval", period.as_millis());

        let runner = self.inner.runner.clone();
        tokio::spawn(async move {
            if !runner.check_connection().await {
                warn!("[AUTOSYNC] Remote service not reachable");
            }
        });
    }

    pub fn config(&self) -> AutoSyncConfig {
        self.inner.state().config.clone()
    }

    fn spawn_timer(&self, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.should_sync() {
                    let manager = AutoSyncManager { inner };
                    tokio::spawn(async move {
                        manager.sync_now().await;
                    });
                }
            }
        })
    }

    /// Runs a sync now, or schedules one rerun if a sync is in flight.
    ///
    /// A started sync completes even if the returned future is dropped.
    pub async fn sync_now(&self) -> SyncTrigger {
        if !self.inner.begin() {
            debug!("[AUTOSYNC] Sync in flight, coalescing request");
            return SyncTrigger::Coalesced;
        }

        let driver = tokio::spawn(self.inner.clone().drive());
        if let Err(e) = driver.await {
            error!("[AUTOSYNC] Sync task aborted: {e}");
            self.inner.state().phase = SyncPhase::Idle;
        }
        SyncTrigger::Started
    }

    /// Counts a change. Returns true when the backlog reached
    /// `max_queue_size` with `sync_on_change` set and a sync was triggered.
    pub fn track_change(&self) -> bool {
        let triggered = {
            let mut state = self.inner.state();
            state.change_counter += 1;
            state.config.sync_on_change && state.change_counter >= state.config.max_queue_size
        };

        if triggered {
            debug!("[AUTOSYNC] Change backlog full, syncing now");
            let manager = self.clone();
            tokio::spawn(async move {
                manager.sync_now().await;
            });
        }
        triggered
    }

    pub fn status(&self) -> AutoSyncStatus {
        let state = self.inner.state();
        let next_sync_in = state.config.enabled.then(|| match state.last_sync {
            Some(at) => state.config.interval().saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        });

        AutoSyncStatus {
            enabled: state.config.enabled,
            last_sync_at: state.last_sync_at,
            change_counter: state.change_counter,
            next_sync_in,
        }
    }

    /// Stops the timer. A sync already in flight finishes.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.state().timer.take() {
            timer.abort();
        }
    }

    /// True while the periodic timer is armed.
    pub fn is_scheduled(&self) -> bool {
        self.inner.state().timer.is_some()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a timer tick is due. A due tick during a running sync is
    /// coalesced into its rerun by `sync_now`.
    fn should_sync(&self) -> bool {
        let state = self.state();
        if !state.config.enabled {
            return false;
        }
        if let Some(at) = state.last_sync
            && at.elapsed() < state.config.interval()
        {
            return false;
        }
        !(state.config.sync_on_change && state.change_counter == 0)
    }

    /// Claims the sync slot. Returns false if a sync is already running, in
    /// which case one rerun is recorded.
    fn begin(&self) -> bool {
        let mut state = self.state();
        match state.phase {
            SyncPhase::Idle => {
                state.phase = SyncPhase::Running;
                true
            }
            SyncPhase::Running | SyncPhase::RunningWithPending => {
                state.phase = SyncPhase::RunningWithPending;
                false
            }
        }
    }

    async fn drive(self: Arc<Self>) {
        loop {
            let result = self.runner.run_sync().await;

            let again = {
                let mut state = self.state();
                match result {
                    Ok(()) => {
                        state.change_counter = 0;
                        state.last_sync = Some(Instant::now());
                        state.last_sync_at = Some(Utc::now());
                        info!("[AUTOSYNC] Sync completed");
                    }
                    Err(e) => error!("[AUTOSYNC] Sync failed: {e}"),
                }
                if state.phase == SyncPhase::RunningWithPending {
                    state.phase = SyncPhase::Running;
                    true
                } else {
                    state.phase = SyncPhase::Idle;
                    false
                }
            };
            if !again {
                break;
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}
