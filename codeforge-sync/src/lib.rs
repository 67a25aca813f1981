//! CodeForge persistence and sync.
//!
//! - [`PersistenceQueue`] turns state changes into debounced writes.
//! - [`AutoSyncManager`] runs full syncs on a timer or after bursts of edits.
//! - [`SyncOrchestrator`] performs bulk push and pull against the remote.

pub mod auto_sync;
pub mod config;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod queue;

pub use auto_sync::{AutoSyncManager, AutoSyncStatus, SyncRunner, SyncTrigger};
pub use config::{AutoSyncConfig, PersistenceConfig, SyncConfig};
pub use domain::{Domain, OperationKind, PendingOperation, StateChange, StorageKey};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{PullSummary, SyncOrchestrator, SyncRemote, SyncState, SyncStatus, SyncSummary};
pub use queue::{FlushSummary, PersistenceQueue};
