//! Adapter over a key-value service injected by the host environment.

use crate::adapter::{BackendKind, StorageAdapter};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Key-value service provided by the embedding host.
#[async_trait]
pub trait HostKv: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;
    async fn delete(&self, key: &str) -> StorageResult<()>;
    async fn keys(&self) -> StorageResult<Vec<String>>;
}

/// In-process host service, used when the host wants a volatile store.
#[derive(Default)]
pub struct MemoryHostKv {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryHostKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostKv for MemoryHostKv {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Storage adapter delegating to the host service, if one was injected.
#[derive(Clone, Default)]
pub struct HostKvAdapter {
    host: Option<Arc<dyn HostKv>>,
}

impl HostKvAdapter {
    pub fn new(host: Option<Arc<dyn HostKv>>) -> Self {
        Self { host }
    }

    pub fn is_injected(&self) -> bool {
        self.host.is_some()
    }

    fn host(&self) -> StorageResult<&Arc<dyn HostKv>> {
        self.host.as_ref().ok_or_else(|| {
            StorageError::connectivity(BackendKind::HostKv, "host key-value service not available")
        })
    }
}

#[async_trait]
impl StorageAdapter for HostKvAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::HostKv
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.host()?.get(key).await
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        self.host()?.set(key, value.clone()).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.host()?.delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.host()?.keys().await
    }

    /// The host service has no bulk clear, so keys are deleted one by one.
    async fn clear(&self) -> StorageResult<()> {
        let host = self.host()?;
        for key in host.keys().await? {
            host.delete(&key).await?;
        }
        Ok(())
    }
}
