//! Tiered persistence store integration tests
//!
//! Covers whole-collection round-trips on each tier and runtime demotion
//! when the active backend starts failing mid-process.

use serde_json::json;
use storeboard_client::store::{file::FileStore, indexed::IndexedStore, memory::MemoryStore};
use storeboard_client::store::{Tier, TieredStore};
use storeboard_common::events::{BoardEvent, Collection};
use storeboard_common::models::Order;
use tokio::sync::broadcast;

fn order_rows() -> Vec<serde_json::Value> {
    vec![
        json!({
            "id": "o1",
            "order_number": "41",
            "customer_name": "Ana",
            "status": "READY",
            "updated_at": "2024-03-01T10:00:00Z",
        }),
        json!({
            "id": "o2",
            "order_number": "42",
            "customer_name": "Bruno",
            "status": "PREPARING",
            "updated_at": "2024-03-01T10:01:00Z",
        }),
    ]
}

fn sorted_ids(rows: &[serde_json::Value]) -> Vec<String> {
    let mut ids: Vec<String> = rows
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn indexed_tier_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = IndexedStore::open(&dir.path().join("snapshots.db"))
        .await
        .unwrap();

    let rows = order_rows();
    store.save("orders", &rows).await.unwrap();
    let loaded = store.load("orders").await.unwrap();
    assert_eq!(sorted_ids(&loaded), sorted_ids(&rows));

    // Save fully replaces the partition, never merges
    let replacement = vec![json!({"id": "o3", "status": "PENDING"})];
    store.save("orders", &replacement).await.unwrap();
    let loaded = store.load("orders").await.unwrap();
    assert_eq!(sorted_ids(&loaded), vec!["o3"]);
}

#[test]
fn keyvalue_tier_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().to_path_buf());

    let rows = order_rows();
    store.save("orders", &rows).unwrap();
    assert_eq!(sorted_ids(&store.load("orders").unwrap()), sorted_ids(&rows));
    assert!(store.load("products").unwrap().is_empty());
}

#[tokio::test]
async fn memory_tier_round_trip() {
    let store = MemoryStore::new();
    let rows = order_rows();
    store.save("orders", rows.clone()).await;
    assert_eq!(sorted_ids(&store.load("orders").await), sorted_ids(&rows));
    assert!(store.load("products").await.is_empty());
}

#[tokio::test]
async fn probe_selects_indexed_on_healthy_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, _rx) = broadcast::channel(16);
    let store = TieredStore::open(dir.path(), tx).await;
    assert_eq!(store.active_tier().await, Tier::Indexed);
}

#[tokio::test]
async fn probe_falls_through_when_data_dir_is_unwritable() {
    // Point the data dir at a path under an existing *file*: both the
    // sqlite and key-value backends fail their probes, leaving the
    // session tier in the temp dir.
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let (tx, _rx) = broadcast::channel(16);
    let store = TieredStore::open(&blocker, tx).await;
    assert_eq!(store.active_tier().await, Tier::Session);

    // The session tier still round-trips
    let rows = order_rows();
    store.save_rows(Collection::Orders, rows.clone()).await;
    let loaded = store.load(Collection::Orders).await;
    assert_eq!(sorted_ids(&loaded), sorted_ids(&rows));
}

#[tokio::test]
async fn save_survives_indexed_failure_by_demoting() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = broadcast::channel(16);
    let store = TieredStore::open(dir.path(), tx).await;
    assert_eq!(store.active_tier().await, Tier::Indexed);

    store.save_rows(Collection::Orders, order_rows()).await;

    // Break the active backend from under the store
    let db_url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("snapshots.db").display()
    );
    let pool = sqlx::SqlitePool::connect(&db_url).await.unwrap();
    sqlx::query("DROP TABLE snapshots").execute(&pool).await.unwrap();
    pool.close().await;

    // The save must not raise; it demotes and retries
    let replacement = vec![json!({"id": "o9", "status": "READY"})];
    store
        .save_rows(Collection::Orders, replacement.clone())
        .await;
    assert_eq!(store.active_tier().await, Tier::KeyValue);

    let loaded = store.load(Collection::Orders).await;
    assert_eq!(sorted_ids(&loaded), vec!["o9"]);

    // Demotion is observable, not silent
    let mut demoted = false;
    while let Ok(event) = rx.try_recv() {
        if let BoardEvent::StorageDemoted { from, to, .. } = event {
            assert_eq!(from, "indexed");
            assert_eq!(to, "keyvalue");
            demoted = true;
        }
    }
    assert!(demoted);
}

#[tokio::test]
async fn typed_load_skips_undecodable_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, _rx) = broadcast::channel(16);
    let store = TieredStore::open(dir.path(), tx).await;

    let rows = vec![
        json!({"id": "o1", "status": "READY"}),
        json!({"id": "bad", "status": "NOT_A_STATUS"}),
    ];
    store.save_rows(Collection::Orders, rows).await;

    let orders: Vec<Order> = store.load_as(Collection::Orders).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id, "o1");
}
