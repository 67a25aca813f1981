//! The uniform backend contract shared by every storage variant.

use crate::error::StorageResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Key read by health probes. Its absence is the expected answer.
pub const HEALTH_CHECK_KEY: &str = "_health_check";

/// The four storage backends a session can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Remote HTTP key-value service.
    RemoteHttp,
    /// Local embedded transactional object store.
    LocalEmbedded,
    /// Embedded relational engine persisted as a snapshot blob.
    EmbeddedRelational,
    /// Key-value service injected by the host environment.
    HostKv,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteHttp => "remote-http",
            Self::LocalEmbedded => "local-embedded",
            Self::EmbeddedRelational => "embedded-relational",
            Self::HostKv => "host-kv",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key-value contract implemented by every backend.
///
/// A missing key is never an error: `get` returns `Ok(None)` and `delete` is
/// a no-op. Transport failures surface as [`StorageError::Connectivity`].
///
/// [`StorageError::Connectivity`]: crate::StorageError::Connectivity
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Which backend this adapter talks to.
    fn kind(&self) -> BackendKind;

    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn keys(&self) -> StorageResult<Vec<String>>;

    async fn clear(&self) -> StorageResult<()>;

    /// Releases engine resources. The adapter may reopen lazily afterwards.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Cheap reachability check run before the selector commits to a backend.
    async fn probe(&self) -> StorageResult<()> {
        self.get(HEALTH_CHECK_KEY).await.map(|_| ())
    }
}

/// Parses a stored JSON string, treating unparseable values as absent.
pub(crate) fn decode_stored(key: &str, raw: &str) -> Option<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("[STORAGE] Ignoring unparseable value for {key}: {e}");
            None
        }
    }
}
