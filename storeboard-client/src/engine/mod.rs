//! Reconciliation engine
//!
//! Owns the authoritative in-memory collections, applies initial reads and
//! incremental feed events against them, derives display-ready projections,
//! and broadcasts board events on meaningful transitions. Collections are
//! mutated only through the engine; the presentation layer reads
//! projections and never touches entries in place.

pub mod commands;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use storeboard_common::events::{BoardEvent, ChangeEvent, Collection};
use storeboard_common::models::{
    BoardSettings, Device, Keyed, MediaItem, Order, OrderStatus, Product,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::feed::RemoteBackend;
use crate::store::TieredStore;

/// Heartbeats older than this are treated as offline even when the device
/// row still claims `is_online` (three missed 30 s heartbeats).
const HEARTBEAT_STALE_SECS: i64 = 90;

pub struct Engine {
    store: Arc<TieredStore>,
    remote: Arc<dyn RemoteBackend>,
    orders: RwLock<HashMap<String, Order>>,
    products: RwLock<HashMap<String, Product>>,
    media: RwLock<HashMap<String, MediaItem>>,
    devices: RwLock<HashMap<String, Device>>,
    settings: RwLock<HashMap<String, BoardSettings>>,
    event_tx: broadcast::Sender<BoardEvent>,
    /// Serializes snapshot saves per collection, in submission order, so an
    /// older in-flight save can never clobber a newer one. Saves for
    /// different collections overlap freely.
    save_locks: [Arc<Mutex<()>>; 5],
}

impl Engine {
    pub fn new(
        store: Arc<TieredStore>,
        remote: Arc<dyn RemoteBackend>,
        event_tx: broadcast::Sender<BoardEvent>,
    ) -> Engine {
        Engine {
            store,
            remote,
            orders: RwLock::new(HashMap::new()),
            products: RwLock::new(HashMap::new()),
            media: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            settings: RwLock::new(HashMap::new()),
            event_tx,
            save_locks: std::array::from_fn(|_| Arc::new(Mutex::new(()))),
        }
    }

    /// Subscribe to board events (ready notifications, change markers,
    /// storage demotions)
    pub fn subscribe_events(&self) -> broadcast::Receiver<BoardEvent> {
        self.event_tx.subscribe()
    }

    fn notify_changed(&self, collection: Collection) {
        // No receivers is fine
        let _ = self.event_tx.send(BoardEvent::CollectionChanged {
            collection,
            timestamp: Utc::now(),
        });
    }

    // ---------------------------------------------------------------
    // Event application
    // ---------------------------------------------------------------

    /// Apply one feed event against a collection.
    ///
    /// Upserts replace the whole record (no field-level merge), removes of
    /// absent ids are no-ops, and a resumed stream triggers a full re-read
    /// because events may have been lost while disconnected.
    pub async fn apply_event(&self, collection: Collection, event: ChangeEvent) {
        match event {
            ChangeEvent::Resumed => {
                info!("Change feed for {} resumed, re-reading", collection);
                self.sync(collection).await;
            }
            ChangeEvent::Upsert { row } => {
                let changed = match collection {
                    Collection::Orders => self.upsert_order(row).await,
                    Collection::Products => upsert_into(&self.products, collection, row).await,
                    Collection::Media => upsert_into(&self.media, collection, row).await,
                    Collection::Devices => upsert_into(&self.devices, collection, row).await,
                    Collection::Settings => upsert_into(&self.settings, collection, row).await,
                };
                if changed {
                    self.notify_changed(collection);
                    self.persist(collection).await;
                }
            }
            ChangeEvent::Remove { id } => {
                let changed = match collection {
                    Collection::Orders => self.orders.write().await.remove(&id).is_some(),
                    Collection::Products => self.products.write().await.remove(&id).is_some(),
                    Collection::Media => self.media.write().await.remove(&id).is_some(),
                    Collection::Devices => self.devices.write().await.remove(&id).is_some(),
                    Collection::Settings => self.settings.write().await.remove(&id).is_some(),
                };
                if changed {
                    self.notify_changed(collection);
                    self.persist(collection).await;
                }
            }
        }
    }

    /// Replace-or-insert an order, firing the ready notification at most
    /// once per transition into READY. A record re-delivered as READY while
    /// already READY (duplicate event, unrelated field update) must not
    /// re-fire.
    async fn upsert_order(&self, row: Value) -> bool {
        let incoming: Order = match serde_json::from_value(row) {
            Ok(order) => order,
            Err(e) => {
                warn!("Discarding malformed orders row: {}", e);
                return false;
            }
        };

        let ready_transition = {
            let mut orders = self.orders.write().await;
            let was_ready = orders
                .get(&incoming.id)
                .is_some_and(|existing| existing.status == OrderStatus::Ready);
            let fire = incoming.status == OrderStatus::Ready && !was_ready;
            orders.insert(incoming.id.clone(), incoming.clone());
            fire
        };

        if ready_transition {
            let _ = self.event_tx.send(BoardEvent::OrderReady {
                order: incoming,
                timestamp: Utc::now(),
            });
        }
        true
    }

    // ---------------------------------------------------------------
    // Synchronization and persistence
    // ---------------------------------------------------------------

    /// Bring one collection in line with the remote service; when the
    /// service is unreachable or not configured, seed from the persisted
    /// snapshot and continue offline. Never blocks indefinitely and never
    /// surfaces an error: an empty collection is an acceptable degraded
    /// state.
    pub async fn sync(&self, collection: Collection) {
        if self.remote.is_configured() {
            match self.remote.select(collection).await {
                Ok(rows) => {
                    let count = self.replace_collection(collection, rows).await;
                    info!("Synced {} {} records from remote", count, collection);
                    let _ = self.event_tx.send(BoardEvent::Resynced {
                        collection,
                        timestamp: Utc::now(),
                    });
                    self.notify_changed(collection);
                    self.persist(collection).await;
                    return;
                }
                Err(e) => warn!("Initial read for {} failed: {}", collection, e),
            }
        }

        let rows = self.store.load(collection).await;
        let count = self.replace_collection(collection, rows).await;
        info!(
            "Seeded {} {} records from local snapshot (offline)",
            count, collection
        );
        self.notify_changed(collection);
        let _ = self.event_tx.send(BoardEvent::RemoteOffline {
            collection,
            timestamp: Utc::now(),
        });
    }

    /// Sync all five collections
    pub async fn sync_all(&self) {
        for collection in Collection::ALL {
            self.sync(collection).await;
        }
    }

    async fn replace_collection(&self, collection: Collection, rows: Vec<Value>) -> usize {
        match collection {
            Collection::Orders => {
                let map = decode_map::<Order>(collection, rows);
                let count = map.len();
                *self.orders.write().await = map;
                count
            }
            Collection::Products => {
                let map = decode_map::<Product>(collection, rows);
                let count = map.len();
                *self.products.write().await = map;
                count
            }
            Collection::Media => {
                let map = decode_map::<MediaItem>(collection, rows);
                let count = map.len();
                *self.media.write().await = map;
                count
            }
            Collection::Devices => {
                let map = decode_map::<Device>(collection, rows);
                let count = map.len();
                *self.devices.write().await = map;
                count
            }
            Collection::Settings => {
                let map = decode_map::<BoardSettings>(collection, rows);
                let count = map.len();
                *self.settings.write().await = map;
                count
            }
        }
    }

    /// Snapshot one collection to the persistence store.
    ///
    /// Saves for the same collection are serialized through a fair async
    /// mutex; a fresh save simply supersedes earlier in-flight saves once
    /// it completes.
    pub async fn persist(&self, collection: Collection) {
        let lock = Arc::clone(&self.save_locks[lock_index(collection)]);
        let _guard = lock.lock().await;

        match collection {
            Collection::Orders => {
                let records: Vec<Order> = self.orders.read().await.values().cloned().collect();
                self.store.save(collection, &records).await;
            }
            Collection::Products => {
                let records: Vec<Product> = self.products.read().await.values().cloned().collect();
                self.store.save(collection, &records).await;
            }
            Collection::Media => {
                let records: Vec<MediaItem> = self.media.read().await.values().cloned().collect();
                self.store.save(collection, &records).await;
            }
            Collection::Devices => {
                let records: Vec<Device> = self.devices.read().await.values().cloned().collect();
                self.store.save(collection, &records).await;
            }
            Collection::Settings => {
                let records: Vec<BoardSettings> =
                    self.settings.read().await.values().cloned().collect();
                self.store.save(collection, &records).await;
            }
        }
    }

    /// Spawn one feed task per collection, each applying events in arrival
    /// order until its stream closes for good
    pub fn spawn_feeds(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        Collection::ALL
            .iter()
            .map(|&collection| {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    let mut rx = match engine.remote.subscribe(collection).await {
                        Ok(rx) => rx,
                        Err(e) => {
                            warn!("Cannot subscribe to {} feed: {}", collection, e);
                            return;
                        }
                    };
                    while let Some(event) = rx.recv().await {
                        engine.apply_event(collection, event).await;
                    }
                    info!("Change feed for {} closed", collection);
                })
            })
            .collect()
    }

    // ---------------------------------------------------------------
    // Projections (pure, recomputed per call)
    // ---------------------------------------------------------------

    /// The full board ordering: READY first, then PREPARING, then the
    /// rest, each bucket oldest-first (oldest waiting customers surface
    /// first). Consumers wanting a ready-only view use `ready_orders`.
    pub async fn display_orders(&self) -> Vec<Order> {
        let orders = self.orders.read().await;
        let mut ready = Vec::new();
        let mut preparing = Vec::new();
        let mut others = Vec::new();
        for order in orders.values() {
            match order.status {
                OrderStatus::Ready => ready.push(order.clone()),
                OrderStatus::Preparing => preparing.push(order.clone()),
                _ => others.push(order.clone()),
            }
        }
        drop(orders);

        sort_oldest_first(&mut ready);
        sort_oldest_first(&mut preparing);
        sort_oldest_first(&mut others);
        ready.extend(preparing);
        ready.extend(others);
        ready
    }

    /// READY orders only, oldest-first
    pub async fn ready_orders(&self) -> Vec<Order> {
        let mut ready: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.status == OrderStatus::Ready)
            .cloned()
            .collect();
        sort_oldest_first(&mut ready);
        ready
    }

    /// Orders still in the kitchen (PENDING or PREPARING), oldest-first
    pub async fn pending_orders(&self) -> Vec<Order> {
        let mut pending: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| {
                matches!(o.status, OrderStatus::Pending | OrderStatus::Preparing)
            })
            .cloned()
            .collect();
        sort_oldest_first(&mut pending);
        pending
    }

    /// Active products in carousel order
    pub async fn active_products(&self) -> Vec<Product> {
        let mut products: Vec<Product> = self
            .products
            .read()
            .await
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
        products
    }

    /// Active media entries in carousel order
    pub async fn active_media(&self) -> Vec<MediaItem> {
        let mut media: Vec<MediaItem> = self
            .media
            .read()
            .await
            .values()
            .filter(|m| m.active)
            .cloned()
            .collect();
        media.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
        media
    }

    /// Devices currently online: flagged online AND heartbeating recently
    pub async fn online_devices(&self) -> Vec<Device> {
        let now = Utc::now();
        let max_age = chrono::Duration::seconds(HEARTBEAT_STALE_SECS);
        let mut devices: Vec<Device> = self
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.is_online && d.heartbeat_fresh(now, max_age))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Settings row for a specific device, if one exists
    pub async fn settings_for_device(&self, device_id: &str) -> Option<BoardSettings> {
        self.settings
            .read()
            .await
            .values()
            .find(|s| s.device_id.as_deref() == Some(device_id))
            .cloned()
    }

    // Raw collection accessors (cloned; callers cannot mutate engine state)

    pub async fn orders(&self) -> HashMap<String, Order> {
        self.orders.read().await.clone()
    }

    pub async fn products(&self) -> HashMap<String, Product> {
        self.products.read().await.clone()
    }

    pub async fn media(&self) -> HashMap<String, MediaItem> {
        self.media.read().await.clone()
    }

    pub async fn devices(&self) -> HashMap<String, Device> {
        self.devices.read().await.clone()
    }

    pub async fn settings(&self) -> HashMap<String, BoardSettings> {
        self.settings.read().await.clone()
    }
}

fn lock_index(collection: Collection) -> usize {
    match collection {
        Collection::Orders => 0,
        Collection::Products => 1,
        Collection::Media => 2,
        Collection::Devices => 3,
        Collection::Settings => 4,
    }
}

/// Stable oldest-first ordering: last-update time (created-at fallback),
/// ties broken by id so repeated derivations are bit-identical
fn sort_oldest_first<T: Keyed>(records: &mut [T]) {
    records.sort_by(|a, b| {
        a.sort_timestamp()
            .cmp(&b.sort_timestamp())
            .then_with(|| a.key().cmp(b.key()))
    });
}

fn decode_map<T>(collection: Collection, rows: Vec<Value>) -> HashMap<String, T>
where
    T: Keyed + DeserializeOwned,
{
    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<T>(row) {
            Ok(record) => {
                map.insert(record.key().to_string(), record);
            }
            Err(e) => warn!("Discarding malformed {} row: {}", collection, e),
        }
    }
    map
}

async fn upsert_into<T>(
    map: &RwLock<HashMap<String, T>>,
    collection: Collection,
    row: Value,
) -> bool
where
    T: Keyed + DeserializeOwned,
{
    match serde_json::from_value::<T>(row) {
        Ok(record) => {
            map.write().await.insert(record.key().to_string(), record);
            true
        }
        Err(e) => {
            warn!("Discarding malformed {} row: {}", collection, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, status: OrderStatus, updated_at: &str) -> Order {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "status": status,
            "updated_at": updated_at,
        }))
        .unwrap()
    }

    #[test]
    fn test_sort_oldest_first() {
        let mut orders = vec![
            order("b", OrderStatus::Ready, "2024-03-01T10:05:00Z"),
            order("a", OrderStatus::Ready, "2024-03-01T10:00:00Z"),
            order("c", OrderStatus::Ready, "2024-03-01T10:05:00Z"),
        ];
        sort_oldest_first(&mut orders);
        let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        // Equal timestamps fall back to id order
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_decode_map_skips_malformed_rows() {
        let rows = vec![
            serde_json::json!({"id": "o1", "status": "READY"}),
            serde_json::json!({"id": "o2", "status": "NOT_A_STATUS"}),
            serde_json::json!({"status": "READY"}),
        ];
        let map = decode_map::<Order>(Collection::Orders, rows);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("o1"));
    }
}
