//! Tiered persistence store
//!
//! Saves and loads whole-collection snapshots through the strongest
//! backend that actually works, probed once at startup and demoted at
//! runtime when the active backend starts failing. A save never raises
//! past the caller as long as any tier functions; the in-memory tier
//! cannot fail.
//!
//! Tier ranking: Indexed (SQLite) > KeyValue (data dir files) >
//! Session (temp dir files) > Memory.

pub mod file;
pub mod indexed;
pub mod memory;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use storeboard_common::events::{BoardEvent, Collection};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use file::FileStore;
use indexed::IndexedStore;
use memory::MemoryStore;

/// Version tag written into every snapshot for future format evolution
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Ranked storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Indexed,
    KeyValue,
    Session,
    Memory,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Indexed => "indexed",
            Tier::KeyValue => "keyvalue",
            Tier::Session => "session",
            Tier::Memory => "memory",
        }
    }

    /// The next weaker tier to demote to
    fn fallback(self) -> Option<Tier> {
        match self {
            Tier::Indexed => Some(Tier::KeyValue),
            Tier::KeyValue => Some(Tier::Session),
            Tier::Session => Some(Tier::Memory),
            Tier::Memory => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct TieredStore {
    indexed: Option<IndexedStore>,
    keyvalue: FileStore,
    session: FileStore,
    memory: MemoryStore,
    active: RwLock<Tier>,
    event_tx: broadcast::Sender<BoardEvent>,
}

impl TieredStore {
    /// Probe the ranked backends once and open the store on the strongest
    /// one that works. Construction itself cannot fail: the memory tier is
    /// always available.
    pub async fn open(data_dir: &Path, event_tx: broadcast::Sender<BoardEvent>) -> TieredStore {
        let keyvalue = FileStore::new(data_dir.join("snapshots"));
        let session = FileStore::new(
            std::env::temp_dir().join(format!("storeboard-{}", Uuid::new_v4().simple())),
        );
        let memory = MemoryStore::new();

        let mut indexed = None;
        let active = match IndexedStore::open(&data_dir.join("snapshots.db")).await {
            Ok(store) => match store.probe().await {
                Ok(()) => {
                    indexed = Some(store);
                    Tier::Indexed
                }
                Err(e) => {
                    warn!("Indexed storage tier failed probe: {}", e);
                    Self::probe_fallback(&keyvalue, &session)
                }
            },
            Err(e) => {
                warn!("Indexed storage tier unavailable: {}", e);
                Self::probe_fallback(&keyvalue, &session)
            }
        };

        info!("Persistence store active tier: {}", active);

        TieredStore {
            indexed,
            keyvalue,
            session,
            memory,
            active: RwLock::new(active),
            event_tx,
        }
    }

    fn probe_fallback(keyvalue: &FileStore, session: &FileStore) -> Tier {
        match keyvalue.probe() {
            Ok(()) => return Tier::KeyValue,
            Err(e) => warn!("Key-value storage tier failed probe: {}", e),
        }
        match session.probe() {
            Ok(()) => return Tier::Session,
            Err(e) => warn!("Session storage tier failed probe: {}", e),
        }
        Tier::Memory
    }

    /// The tier currently serving saves and loads
    pub async fn active_tier(&self) -> Tier {
        *self.active.read().await
    }

    async fn demote(&self, from: Tier, to: Tier, cause: &storeboard_common::Error) {
        warn!(
            "Storage tier {} failed ({}), demoting to {} for the rest of the process",
            from, cause, to
        );
        *self.active.write().await = to;
        let _ = self.event_tx.send(BoardEvent::StorageDemoted {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Persist a whole collection, encoding records through JSON.
    ///
    /// A record that fails to encode is dropped with a warning rather than
    /// failing the collection write. Backend failures demote and retry; the
    /// save itself never fails.
    pub async fn save<T: Serialize>(&self, collection: Collection, records: &[T]) {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::to_value(record) {
                Ok(value) => rows.push(value),
                Err(e) => warn!("Dropping unencodable {} record: {}", collection, e),
            }
        }
        self.save_rows(collection, rows).await;
    }

    /// Persist pre-encoded rows for a collection
    pub async fn save_rows(&self, collection: Collection, mut rows: Vec<Value>) {
        let name = collection.as_str();
        let mut tier = *self.active.read().await;
        loop {
            let result = match tier {
                Tier::Indexed => match &self.indexed {
                    Some(indexed) => indexed.save(name, &rows).await,
                    None => Err(storeboard_common::Error::Config(
                        "indexed tier not open".to_string(),
                    )),
                },
                Tier::KeyValue => self.keyvalue.save(name, &rows),
                Tier::Session => self.session.save(name, &rows),
                Tier::Memory => {
                    self.memory.save(name, std::mem::take(&mut rows)).await;
                    return;
                }
            };

            match result {
                Ok(()) => return,
                Err(e) => {
                    let next = tier.fallback().unwrap_or(Tier::Memory);
                    self.demote(tier, next, &e).await;
                    tier = next;
                }
            }
        }
    }

    /// Load a collection's snapshot rows (empty when absent, on any tier)
    pub async fn load(&self, collection: Collection) -> Vec<Value> {
        let name = collection.as_str();
        let mut tier = *self.active.read().await;
        loop {
            let result = match tier {
                Tier::Indexed => match &self.indexed {
                    Some(indexed) => indexed.load(name).await,
                    None => Err(storeboard_common::Error::Config(
                        "indexed tier not open".to_string(),
                    )),
                },
                Tier::KeyValue => self.keyvalue.load(name),
                Tier::Session => self.session.load(name),
                Tier::Memory => return self.memory.load(name).await,
            };

            match result {
                Ok(rows) => return rows,
                Err(e) => {
                    let next = tier.fallback().unwrap_or(Tier::Memory);
                    self.demote(tier, next, &e).await;
                    tier = next;
                }
            }
        }
    }

    /// Load and decode a collection's snapshot, skipping rows that no
    /// longer decode as `T`
    pub async fn load_as<T: DeserializeOwned>(&self, collection: Collection) -> Vec<T> {
        let rows = self.load(collection).await;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping undecodable {} snapshot row: {}", collection, e),
            }
        }
        records
    }
}
