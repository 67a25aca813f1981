//! CodeForge storage layer.
//!
//! Four interchangeable key-value backends behind one [`StorageAdapter`]
//! contract, a [`BackendSelector`] that probes them in priority order, and the
//! [`UnifiedStorage`] facade the rest of the application talks to.

pub mod adapter;
pub mod config;
pub mod error;
pub mod host_kv;
pub mod object_store;
pub mod preferences;
pub mod relational;
pub mod remote;
pub mod selector;
pub mod unified;

pub use adapter::{BackendKind, HEALTH_CHECK_KEY, StorageAdapter};
pub use config::{RemoteConfig, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use host_kv::{HostKv, HostKvAdapter, MemoryHostKv};
pub use object_store::ObjectStoreAdapter;
pub use preferences::{FilePreferences, MemoryPreferences, PreferenceStore, StoragePreferences};
pub use relational::RelationalAdapter;
pub use remote::{RemoteHttpAdapter, RemoteStats};
pub use selector::{BackendSelector, FallbackAdapter};
pub use unified::{MigrationReport, UnifiedStorage};
