//! Shared in-memory fakes for the sync integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use codeforge_storage::{BackendKind, RemoteStats, StorageAdapter, StorageError, StorageResult, UnifiedStorage};
use codeforge_sync::{SyncError, SyncRemote, SyncResult, SyncRunner};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Key-value store that records every write and fails keys containing "bad".
#[derive(Default)]
pub struct RecordingStore {
    entries: Mutex<BTreeMap<String, Value>>,
    writes: Mutex<Vec<String>>,
    delay: Duration,
    fail_all: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store whose writes take `delay` to complete.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        let store = Self::default();
        store.fail_all.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn seed(&self, key: &str, value: Value) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn entry(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    /// Keys written or deleted, in completion order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn check(&self, key: &str) -> StorageResult<()> {
        if self.fail_all.load(Ordering::SeqCst) || key.contains("bad") {
            return Err(StorageError::Database(format!("write rejected for {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for RecordingStore {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalEmbedded
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entry(key))
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.check(key)?;
        self.entries.lock().unwrap().insert(key.to_string(), value.clone());
        self.writes.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check(key)?;
        self.entries.lock().unwrap().remove(key);
        self.writes.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(RecordingStore::keys(self))
    }

    async fn clear(&self) -> StorageResult<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

pub fn facade(store: &Arc<RecordingStore>) -> Arc<UnifiedStorage> {
    Arc::new(UnifiedStorage::from_adapter(store.clone()))
}

/// Remote service kept in memory. Import merges into the existing map.
#[derive(Default)]
pub struct FakeRemote {
    data: Mutex<BTreeMap<String, Value>>,
    pub unreachable: AtomicBool,
}

impl FakeRemote {
    pub fn with(entries: &[(&str, Value)]) -> Arc<Self> {
        let remote = Self::default();
        {
            let mut data = remote.data.lock().unwrap();
            for (key, value) in entries {
                data.insert(key.to_string(), value.clone());
            }
        }
        Arc::new(remote)
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }

    fn reachable(&self) -> StorageResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StorageError::Connectivity {
                backend: BackendKind::RemoteHttp,
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SyncRemote for FakeRemote {
    async fn export_all(&self) -> StorageResult<BTreeMap<String, Value>> {
        self.reachable()?;
        Ok(self.data.lock().unwrap().clone())
    }

    async fn import_all(&self, data: &BTreeMap<String, Value>) -> StorageResult<usize> {
        self.reachable()?;
        self.data.lock().unwrap().extend(data.clone());
        Ok(data.len())
    }

    async fn stats(&self) -> StorageResult<RemoteStats> {
        self.reachable()?;
        let data = self.data.lock().unwrap();
        Ok(RemoteStats {
            total_keys: data.len() as u64,
            total_size_bytes: data.values().map(|v| v.to_string().len() as u64).sum(),
        })
    }

    async fn clear_all(&self) -> StorageResult<()> {
        self.reachable()?;
        self.data.lock().unwrap().clear();
        Ok(())
    }
}

/// Sync runner that counts runs and connection checks.
#[derive(Default)]
pub struct CountingRunner {
    runs: AtomicUsize,
    checks: AtomicUsize,
    pub failing: AtomicBool,
    delay: Duration,
}

impl CountingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncRunner for CountingRunner {
    async fn run_sync(&self) -> SyncResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::NotConfigured);
        }
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        true
    }
}

pub fn entity(id: &str, n: i64) -> Value {
    json!({ "id": id, "n": n })
}
