use async_trait::async_trait;
use codeforge_storage::{
    BackendKind, BackendSelector, FallbackAdapter, HostKv, MemoryHostKv, ObjectStoreAdapter, RemoteConfig,
    StorageAdapter, StorageConfig, StorageError, StoragePreferences, StorageResult,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Remote stand-in that fails on demand and counts every call.
#[derive(Default)]
struct FlakyRemote {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyRemote {
    fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Connectivity {
                backend: BackendKind::RemoteHttp,
                reason: "connection refused".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageAdapter for FlakyRemote {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteHttp
    }

    async fn get(&self, _key: &str) -> StorageResult<Option<Value>> {
        self.attempt().map(|_| None)
    }

    async fn set(&self, _key: &str, _value: &Value) -> StorageResult<()> {
        self.attempt()
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        self.attempt()
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.attempt().map(|_| Vec::new())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.attempt()
    }
}

// --- Fallback ---

#[tokio::test]
async fn failed_call_is_retried_on_fallback() {
    let remote = Arc::new(FlakyRemote::failing());
    let local = Arc::new(ObjectStoreAdapter::open_in_memory());
    let adapter = FallbackAdapter::new(remote.clone(), local.clone(), 3);

    adapter.set("files:a", &json!("v1")).await.unwrap();

    assert_eq!(local.get("files:a").await.unwrap(), Some(json!("v1")));
    assert_eq!(adapter.consecutive_failures(), 1);
    assert_eq!(adapter.kind(), BackendKind::RemoteHttp);
}

#[tokio::test]
async fn third_failure_demotes_remote_for_the_session() {
    let remote = Arc::new(FlakyRemote::failing());
    let local = Arc::new(ObjectStoreAdapter::open_in_memory());
    let adapter = FallbackAdapter::new(remote.clone(), local.clone(), 3);

    for _ in 0..3 {
        adapter.set("k", &json!("v1")).await.unwrap();
    }
    assert!(adapter.is_demoted());
    assert_eq!(adapter.consecutive_failures(), 0);
    assert_eq!(adapter.kind(), BackendKind::LocalEmbedded);
    assert_eq!(remote.calls(), 3);

    // The fourth call goes straight to the fallback.
    adapter.set("k", &json!("v2")).await.unwrap();
    assert_eq!(remote.calls(), 3);
    assert_eq!(local.get("k").await.unwrap(), Some(json!("v2")));
}

#[tokio::test]
async fn success_resets_failure_count() {
    let remote = Arc::new(FlakyRemote::failing());
    let local = Arc::new(ObjectStoreAdapter::open_in_memory());
    let adapter = FallbackAdapter::new(remote.clone(), local, 3);

    adapter.set("k", &json!(1)).await.unwrap();
    adapter.set("k", &json!(2)).await.unwrap();
    assert_eq!(adapter.consecutive_failures(), 2);

    remote.failing.store(false, Ordering::SeqCst);
    adapter.set("k", &json!(3)).await.unwrap();
    assert_eq!(adapter.consecutive_failures(), 0);
    assert!(!adapter.is_demoted());
}

// --- Selection order ---

#[tokio::test]
async fn local_store_is_default() {
    let dir = tempfile::tempdir().unwrap();
    let selector = BackendSelector::new(StorageConfig::in_dir(dir.path()), None);
    let adapter = selector.select(&StoragePreferences::default(), None).await.unwrap();
    assert_eq!(adapter.kind(), BackendKind::LocalEmbedded);
}

#[tokio::test]
async fn unreachable_remote_falls_through_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        remote: Some(RemoteConfig {
            timeout_ms: 500,
            ..RemoteConfig::with_base_url("http://127.0.0.1:9")
        }),
        ..StorageConfig::in_dir(dir.path())
    };
    let selector = BackendSelector::new(config, None);
    let adapter = selector.select(&StoragePreferences::default(), None).await.unwrap();
    assert_eq!(adapter.kind(), BackendKind::LocalEmbedded);
}

#[tokio::test]
async fn healthy_remote_wins_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/storage/_health_check"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        remote: Some(RemoteConfig::with_base_url(server.uri())),
        ..StorageConfig::in_dir(dir.path())
    };
    let selector = BackendSelector::new(config, None);
    let adapter = selector.select(&StoragePreferences::default(), None).await.unwrap();
    assert_eq!(adapter.kind(), BackendKind::RemoteHttp);
}

#[test]
fn preferred_remote_comes_first() {
    let selector = BackendSelector::new(StorageConfig::in_dir("/tmp/unused"), None);
    let prefs = StoragePreferences {
        prefer_remote: true,
        prefer_relational: true,
        remote_url: Some("http://example.test".into()),
    };
    assert_eq!(
        selector.candidates(&prefs),
        vec![
            BackendKind::RemoteHttp,
            BackendKind::LocalEmbedded,
            BackendKind::EmbeddedRelational,
        ]
    );
    assert_eq!(selector.remote_config(&prefs).base_url, "http://example.test");
}

#[tokio::test]
async fn relational_used_when_preferred_and_no_object_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        object_store_path: None,
        ..StorageConfig::in_dir(dir.path())
    };
    let prefs = StoragePreferences {
        prefer_relational: true,
        ..StoragePreferences::default()
    };
    let adapter = BackendSelector::new(config, None).select(&prefs, None).await.unwrap();
    assert_eq!(adapter.kind(), BackendKind::EmbeddedRelational);
}

#[tokio::test]
async fn host_kv_is_last_resort() {
    let host: Arc<dyn HostKv> = Arc::new(MemoryHostKv::new());
    let selector = BackendSelector::new(StorageConfig::default(), Some(host));
    let adapter = selector.select(&StoragePreferences::default(), None).await.unwrap();
    assert_eq!(adapter.kind(), BackendKind::HostKv);
}

#[tokio::test]
async fn nothing_available_is_an_error() {
    let selector = BackendSelector::new(StorageConfig::default(), None);
    let err = selector
        .select(&StoragePreferences::default(), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StorageError::NoBackendAvailable));
}

#[tokio::test]
async fn preferred_kind_is_attempted_first() {
    let dir = tempfile::tempdir().unwrap();
    let selector = BackendSelector::new(StorageConfig::in_dir(dir.path()), None);
    let adapter = selector
        .select(&StoragePreferences::default(), Some(BackendKind::EmbeddedRelational))
        .await
        .unwrap();
    assert_eq!(adapter.kind(), BackendKind::EmbeddedRelational);
}
