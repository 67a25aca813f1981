//! HTTP adapter for the remote key-value service.
//!
//! Every request is bounded by the client timeout (2s by default). Transport
//! failures and timeouts surface as [`StorageError::Connectivity`] so the
//! selector can fall back to a local backend.

use crate::adapter::{BackendKind, HEALTH_CHECK_KEY, StorageAdapter};
use crate::config::RemoteConfig;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Aggregate usage reported by `GET {prefix}/stats`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStats {
    pub total_keys: u64,
    pub total_size_bytes: u64,
}

#[derive(Deserialize)]
struct ValueEnvelope {
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Deserialize)]
struct KeysResponse {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct ImportResponse {
    imported: usize,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Storage adapter backed by the remote HTTP service.
pub struct RemoteHttpAdapter {
    client: Client,
    config: RemoteConfig,
    /// Set by a successful health check, cleared by any failed request.
    available: RwLock<bool>,
}

impl RemoteHttpAdapter {
    pub fn new(config: RemoteConfig) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StorageError::connectivity(BackendKind::RemoteHttp, e))?;

        Ok(Self {
            client,
            config: RemoteConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            available: RwLock::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}{}/{}", self.config.base_url, self.config.storage_path, suffix)
    }

    fn key_url(&self, key: &str) -> String {
        self.endpoint(&urlencoding::encode(key))
    }

    fn transport_error(&self, err: reqwest::Error) -> StorageError {
        if err.is_timeout() {
            StorageError::connectivity(
                BackendKind::RemoteHttp,
                format!("request timeout after {}ms", self.config.timeout_ms),
            )
        } else {
            StorageError::connectivity(BackendKind::RemoteHttp, err)
        }
    }

    async fn mark_unavailable(&self) {
        *self.available.write().await = false;
    }

    /// Liveness probe against `GET /health`.
    pub async fn health(&self) -> StorageResult<()> {
        let url = format!("{}/health", self.config.base_url);
        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.mark_unavailable().await;
                return Err(self.transport_error(e));
            }
        };

        if !resp.status().is_success() {
            self.mark_unavailable().await;
            return Err(StorageError::connectivity(
                BackendKind::RemoteHttp,
                format!("health check returned {}", resp.status()),
            ));
        }

        *self.available.write().await = true;
        debug!("[STORAGE] Remote backend available at {}", self.config.base_url);
        Ok(())
    }

    async fn ensure_available(&self) -> StorageResult<()> {
        if *self.available.read().await {
            return Ok(());
        }
        self.health().await
    }

    /// Sends a request, checking availability first.
    async fn execute(&self, request: RequestBuilder) -> StorageResult<Response> {
        self.ensure_available().await?;
        match request.send().await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                self.mark_unavailable().await;
                Err(self.transport_error(e))
            }
        }
    }

    async fn error_for_status(&self, resp: Response) -> StorageResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.is_server_error() {
            self.mark_unavailable().await;
        }
        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(StorageError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        resp: Response,
    ) -> StorageResult<T> {
        resp.json().await.map_err(|e| {
            if e.is_decode() {
                StorageError::Validation {
                    key: what.to_string(),
                    reason: e.to_string(),
                }
            } else {
                self.transport_error(e)
            }
        })
    }

    /// Fetches the full remote key → value map.
    pub async fn export_all(&self) -> StorageResult<BTreeMap<String, Value>> {
        let resp = self.execute(self.client.get(self.endpoint("export"))).await?;
        let resp = self.error_for_status(resp).await?;
        self.read_json("export", resp).await
    }

    /// Bulk upsert; returns the number of keys the service imported.
    pub async fn import_all(&self, data: &BTreeMap<String, Value>) -> StorageResult<usize> {
        let resp = self
            .execute(self.client.post(self.endpoint("import")).json(data))
            .await?;
        let resp = self.error_for_status(resp).await?;
        let body: ImportResponse = self.read_json("import", resp).await?;
        Ok(body.imported)
    }

    pub async fn stats(&self) -> StorageResult<RemoteStats> {
        let resp = self.execute(self.client.get(self.endpoint("stats"))).await?;
        let resp = self.error_for_status(resp).await?;
        self.read_json("stats", resp).await
    }
}

#[async_trait]
impl StorageAdapter for RemoteHttpAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteHttp
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let resp = self.execute(self.client.get(self.key_url(key))).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = self.error_for_status(resp).await?;
        match self.read_json::<ValueEnvelope>(key, resp).await {
            Ok(envelope) => Ok(envelope.value),
            Err(StorageError::Validation { reason, .. }) => {
                warn!("[STORAGE] Remote value for {key} failed to parse: {reason}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let resp = self
            .execute(
                self.client
                    .put(self.key_url(key))
                    .json(&serde_json::json!({ "value": value })),
            )
            .await?;
        self.error_for_status(resp).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let resp = self.execute(self.client.delete(self.key_url(key))).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.error_for_status(resp).await?;
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let resp = self.execute(self.client.get(self.endpoint("keys"))).await?;
        let resp = self.error_for_status(resp).await?;
        let body: KeysResponse = self.read_json("keys", resp).await?;
        Ok(body.keys)
    }

    async fn clear(&self) -> StorageResult<()> {
        let resp = self.execute(self.client.post(self.endpoint("clear"))).await?;
        self.error_for_status(resp).await?;
        Ok(())
    }

    async fn probe(&self) -> StorageResult<()> {
        self.health().await?;
        self.get(HEALTH_CHECK_KEY).await.map(|_| ())
    }
}
