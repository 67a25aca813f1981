mod support;

use codeforge_storage::StorageAdapter;
use codeforge_sync::{Domain, PersistenceConfig, PersistenceQueue, StateChange};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{RecordingStore, entity, facade};

fn upsert(domain: Domain, id: &str, n: i64) -> StateChange {
    StateChange::Upsert {
        domain,
        item: entity(id, n),
    }
}

fn setup(mirror: Option<Arc<RecordingStore>>) -> (Arc<RecordingStore>, PersistenceQueue) {
    let store = RecordingStore::new();
    let mirror = mirror.map(|m| m as Arc<dyn StorageAdapter>);
    let queue = PersistenceQueue::new(facade(&store), mirror);
    (store, queue)
}

// --- Debounce ---

#[tokio::test(start_paused = true)]
async fn burst_of_edits_collapses_into_one_write() {
    let (store, queue) = setup(None);

    for n in 1..=3 {
        queue.observe(&upsert(Domain::Files, "a", n));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(store.writes().is_empty());
    assert_eq!(queue.pending_count(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    queue.wait_idle().await;

    assert_eq!(store.writes(), vec!["files:a"]);
    assert_eq!(store.entry("files:a").unwrap()["n"], 3);
    assert_eq!(queue.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_are_written_separately() {
    let (store, queue) = setup(None);
    queue.observe(&upsert(Domain::Files, "a", 1));
    queue.observe(&upsert(Domain::Models, "a", 1));

    tokio::time::sleep(Duration::from_millis(350)).await;
    queue.wait_idle().await;

    let mut writes = store.writes();
    writes.sort();
    assert_eq!(writes, vec!["files:a", "models:a"]);
}

#[tokio::test(start_paused = true)]
async fn custom_debounce_is_honoured() {
    let (store, queue) = setup(None);
    queue.configure_domain(
        Domain::Workflows,
        PersistenceConfig {
            debounce_ms: 1000,
            ..PersistenceConfig::default()
        },
    );
    queue.observe(&upsert(Domain::Workflows, "w", 1));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(store.writes().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    queue.wait_idle().await;
    assert_eq!(store.writes(), vec!["workflows:w"]);
}

// --- Flush ---

#[tokio::test(start_paused = true)]
async fn flush_skips_debounce_window() {
    let (store, queue) = setup(None);
    queue.observe(&StateChange::UpsertMany {
        domain: Domain::Components,
        items: vec![entity("c1", 1), entity("c2", 2)],
    });

    let summary = queue.flush().await;
    assert_eq!(summary.persisted, 2);
    assert!(summary.is_clean());
    assert_eq!(store.keys(), vec!["components:c1", "components:c2"]);
    assert_eq!(queue.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_write_does_not_block_others() {
    let (store, queue) = setup(None);
    queue.observe(&upsert(Domain::Files, "good", 1));
    queue.observe(&upsert(Domain::Files, "bad", 1));

    let summary = queue.flush().await;
    assert_eq!(summary.persisted, 1);
    assert_eq!(summary.failed, vec!["files:bad"]);
    assert!(store.entry("files:good").is_some());
}

#[tokio::test(start_paused = true)]
async fn delete_removes_entity() {
    let (store, queue) = setup(None);
    store.seed("lambdas:fn", json!({"id": "fn"}));

    queue.observe(&StateChange::Remove {
        domain: Domain::Lambdas,
        id: "fn".into(),
    });
    queue.flush().await;
    assert_eq!(store.entry("lambdas:fn"), None);
}

#[tokio::test(start_paused = true)]
async fn changes_queued_during_flush_are_drained() {
    let store = RecordingStore::slow(Duration::from_millis(100));
    let queue = PersistenceQueue::new(facade(&store), None);

    queue.observe(&upsert(Domain::Files, "a", 1));
    // The debounce fires at 300ms and the write completes at 400ms.
    tokio::time::sleep(Duration::from_millis(310)).await;
    assert_eq!(queue.pending_count(), 0);

    queue.observe(&upsert(Domain::Files, "b", 1));
    queue.flush().await;

    assert_eq!(store.writes(), vec!["files:a", "files:b"]);
    assert_eq!(queue.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn latest_value_wins_after_flush_started() {
    let store = RecordingStore::slow(Duration::from_millis(100));
    let queue = PersistenceQueue::new(facade(&store), None);

    queue.observe(&upsert(Domain::Files, "a", 1));
    tokio::time::sleep(Duration::from_millis(310)).await;
    queue.observe(&upsert(Domain::Files, "a", 2));
    queue.flush().await;

    assert_eq!(store.writes(), vec!["files:a", "files:a"]);
    assert_eq!(store.entry("files:a").unwrap()["n"], 2);
}

#[tokio::test(start_paused = true)]
async fn new_change_replaces_due_operation() {
    let store = RecordingStore::slow(Duration::from_millis(100));
    let queue = PersistenceQueue::new(facade(&store), None);

    // b starts writing at 300ms and finishes at 400ms.
    queue.observe(&upsert(Domain::Files, "b", 1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    // a becomes due at 350ms, behind the running flush.
    queue.observe(&upsert(Domain::Files, "a", 1));
    tokio::time::sleep(Duration::from_millis(310)).await;
    assert_eq!(queue.pending_count(), 1);

    queue.observe(&upsert(Domain::Files, "a", 2));
    assert_eq!(queue.pending_count(), 1);

    queue.flush().await;
    assert_eq!(store.writes(), vec!["files:b", "files:a"]);
    assert_eq!(store.entry("files:a").unwrap()["n"], 2);
    assert_eq!(queue.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn mirror_can_be_attached_later() {
    let (store, queue) = setup(None);
    let mirror = RecordingStore::new();
    queue.set_mirror(Some(mirror.clone() as Arc<dyn StorageAdapter>));

    queue.observe(&upsert(Domain::Files, "a", 1));
    let summary = queue.flush().await;

    assert_eq!(summary.mirrored, 1);
    assert_eq!(store.writes(), vec!["files:a"]);
    assert_eq!(mirror.writes(), vec!["files:a"]);
}

// --- Domain configuration ---

#[tokio::test(start_paused = true)]
async fn disabled_domain_is_ignored() {
    let (store, queue) = setup(None);
    queue.disable_domain(Domain::Models);

    assert_eq!(queue.observe(&upsert(Domain::Models, "m", 1)), 0);
    assert_eq!(queue.pending_count(), 0);

    queue.enable_domain(Domain::Models);
    assert_eq!(queue.observe(&upsert(Domain::Models, "m", 1)), 1);
    queue.flush().await;
    assert_eq!(store.writes(), vec!["models:m"]);
}

#[test]
fn settings_are_not_mirrored_by_default() {
    assert!(!PersistenceConfig::for_domain(Domain::Settings).mirror_remote);
    assert!(PersistenceConfig::for_domain(Domain::Theme).mirror_remote);
    assert_eq!(PersistenceConfig::default().debounce_ms, 300);
}

// --- Remote mirror ---

#[tokio::test(start_paused = true)]
async fn successful_writes_are_mirrored() {
    let mirror = RecordingStore::new();
    let (store, queue) = setup(Some(mirror.clone()));

    queue.observe(&upsert(Domain::Files, "a", 1));
    queue.observe(&StateChange::UpdateSettings(json!({"autoSync": true})));
    let summary = queue.flush().await;

    assert_eq!(summary.persisted, 2);
    assert_eq!(summary.mirrored, 1);
    assert_eq!(mirror.writes(), vec!["files:a"]);
    assert!(store.entry("settings:appSettings").is_some());
}

#[tokio::test(start_paused = true)]
async fn mirror_failure_keeps_local_write() {
    let mirror = RecordingStore::failing();
    let (store, queue) = setup(Some(mirror));

    queue.observe(&StateChange::SetTheme(json!({"mode": "light"})));
    let summary = queue.flush().await;

    assert!(summary.is_clean());
    assert_eq!(summary.mirror_failed, 1);
    assert_eq!(store.entry("theme:current"), Some(json!({"mode": "light"})));
}
