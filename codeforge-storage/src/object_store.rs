//! Local embedded object store backed by DuckDB.
//!
//! A single `keyvalue` table holds JSON-encoded values keyed by storage key.
//! The database is opened lazily on first use; every call runs as one
//! statement on the blocking pool.

use crate::adapter::{BackendKind, StorageAdapter, decode_stored};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use duckdb::{Connection, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Object store adapter. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct ObjectStoreAdapter {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl ObjectStoreAdapter {
    /// Store persisted at `path`. Nothing touches the disk until first use.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Store living in memory only (for testing).
    pub fn open_in_memory() -> Self {
        Self {
            path: None,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| {
                StorageError::Database("object store connection lock poisoned".to_string())
            })?;
            if guard.is_none() {
                *guard = Some(open_connection(path.as_deref())?);
            }
            let Some(conn) = guard.as_ref() else {
                return Err(StorageError::connectivity(
                    BackendKind::LocalEmbedded,
                    "connection unavailable",
                ));
            };
            f(conn)
        })
        .await?
    }
}

/// Opens the database, removing a stale WAL once if the first open fails.
///
/// An unclean shutdown can leave a WAL file behind that prevents reopening.
fn open_with_wal_recovery(path: &Path) -> Result<Connection, duckdb::Error> {
    match Connection::open(path) {
        Ok(conn) => Ok(conn),
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    "[STORAGE] Object store open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    return Connection::open(path);
                }
            }
            Err(first_err)
        }
    }
}

fn open_connection(path: Option<&Path>) -> StorageResult<Connection> {
    let conn = match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            open_with_wal_recovery(path)
        }
        None => Connection::open_in_memory(),
    }
    .map_err(|e| StorageError::connectivity(BackendKind::LocalEmbedded, e))?;

    conn.execute_batch(
        "PRAGMA memory_limit='64MB'; PRAGMA threads=1;
         CREATE TABLE IF NOT EXISTS keyvalue (
             key VARCHAR PRIMARY KEY,
             value VARCHAR NOT NULL
         );",
    )?;
    debug!("[STORAGE] Object store opened");
    Ok(conn)
}

#[async_trait]
impl StorageAdapter for ObjectStoreAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalEmbedded
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let result = conn.query_row(
                "SELECT value FROM keyvalue WHERE key = ?",
                params![key],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(raw) => Ok(decode_stored(&key, &raw)),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let key = key.to_string();
        let raw = serde_json::to_string(value)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO keyvalue (key, value) VALUES (?, ?)",
                params![key, raw],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM keyvalue WHERE key = ?", params![key])?;
            Ok(())
        })
        .await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM keyvalue ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM keyvalue", [])?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> StorageResult<()> {
        // An in-memory database would lose its contents if dropped.
        if self.path.is_none() {
            return Ok(());
        }
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| {
                StorageError::Database("object store connection lock poisoned".to_string())
            })?;
            guard.take();
            Ok(())
        })
        .await?
    }
}
