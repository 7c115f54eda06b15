//! In-memory snapshot storage (the tier of last resort)
//!
//! Data survives only for the process lifetime. This tier cannot fail,
//! which is what makes the tiered store's save/load infallible overall.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct MemoryStore {
    partitions: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            partitions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn save(&self, collection: &str, rows: Vec<Value>) {
        self.partitions
            .write()
            .await
            .insert(collection.to_string(), rows);
    }

    pub async fn load(&self, collection: &str) -> Vec<Value> {
        self.partitions
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
