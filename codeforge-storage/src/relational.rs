//! Embedded relational engine backed by an in-memory SQLite database.
//!
//! The engine is loaded on first use, restoring the last snapshot blob when
//! one exists. After every mutation the whole database is written back to the
//! snapshot, so an unexpected restart loses at most the mutation whose
//! snapshot failed.

use crate::adapter::{BackendKind, StorageAdapter, decode_stored};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

struct Engine {
    conn: Connection,
}

impl Engine {
    fn load(snapshot: Option<&Path>) -> StorageResult<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| StorageError::connectivity(BackendKind::EmbeddedRelational, e))?;

        if let Some(path) = snapshot.filter(|p| p.exists()) {
            conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)
                .map_err(|e| StorageError::connectivity(BackendKind::EmbeddedRelational, e))?;
            info!("[STORAGE] Relational engine restored from {}", path.display());
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS keyvalue (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Serializes the database into the snapshot blob, replacing it atomically.
    fn persist(&self, snapshot: Option<&Path>) {
        let Some(path) = snapshot else {
            return;
        };
        let tmp = path.with_extension("tmp");
        let result = (|| -> StorageResult<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.conn.backup(DatabaseName::Main, &tmp, None)?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        })();
        if let Err(e) = result {
            error!("[STORAGE] Failed to persist relational snapshot: {e}");
        }
    }
}

/// Relational engine adapter. Cloning shares the loaded engine.
#[derive(Clone)]
pub struct RelationalAdapter {
    snapshot: Option<PathBuf>,
    engine: Arc<Mutex<Option<Engine>>>,
}

impl RelationalAdapter {
    /// Engine persisted to the snapshot blob at `snapshot`.
    pub fn new(snapshot: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: Some(snapshot.into()),
            engine: Arc::new(Mutex::new(None)),
        }
    }

    /// Engine without a snapshot blob (for testing).
    pub fn in_memory() -> Self {
        Self {
            snapshot: None,
            engine: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_engine<T, F>(&self, mutates: bool, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let engine = self.engine.clone();
        let snapshot = self.snapshot.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = engine.lock().map_err(|_| {
                StorageError::Database("relational engine lock poisoned".to_string())
            })?;
            if guard.is_none() {
                debug!("[STORAGE] Loading relational engine");
                *guard = Some(Engine::load(snapshot.as_deref())?);
            }
            let Some(engine) = guard.as_ref() else {
                return Err(StorageError::connectivity(
                    BackendKind::EmbeddedRelational,
                    "engine unavailable",
                ));
            };
            let out = f(&engine.conn)?;
            if mutates {
                engine.persist(snapshot.as_deref());
            }
            Ok(out)
        })
        .await?
    }
}

#[async_trait]
impl StorageAdapter for RelationalAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::EmbeddedRelational
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let key = key.to_string();
        self.with_engine(false, move |conn| {
            let result = conn.query_row(
                "SELECT value FROM keyvalue WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(raw) => Ok(decode_stored(&key, &raw)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let key = key.to_string();
        let raw = serde_json::to_string(value)?;
        self.with_engine(true, move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO keyvalue (key, value) VALUES (?1, ?2)",
                params![key, raw],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.with_engine(true, move |conn| {
            conn.execute("DELETE FROM keyvalue WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.with_engine(false, |conn| {
            let mut stmt = conn.prepare("SELECT key FROM keyvalue ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.with_engine(true, |conn| {
            conn.execute("DELETE FROM keyvalue", [])?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> StorageResult<()> {
        // Without a snapshot the data only lives in the engine.
        if self.snapshot.is_none() {
            return Ok(());
        }
        let engine = self.engine.clone();
        let snapshot = self.snapshot.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = engine.lock().map_err(|_| {
                StorageError::Database("relational engine lock poisoned".to_string())
            })?;
            if let Some(engine) = guard.take() {
                engine.persist(snapshot.as_deref());
            }
            Ok(())
        })
        .await?
    }
}
