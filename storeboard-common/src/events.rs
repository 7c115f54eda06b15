//! Event types for the board client
//!
//! `ChangeEvent` is what the remote feed delivers for a single collection;
//! `BoardEvent` is what the reconciliation engine broadcasts to presentation
//! consumers.

use crate::models::Order;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five record partitions the client keeps in sync.
///
/// The `as_str` names double as storage partition keys and (prefixed)
/// remote table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Orders,
    Products,
    Media,
    Devices,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Orders,
        Collection::Products,
        Collection::Media,
        Collection::Devices,
        Collection::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::Products => "products",
            Collection::Media => "media",
            Collection::Devices => "devices",
            Collection::Settings => "device_settings",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incremental change delivered by the feed, in arrival order.
///
/// An upsert carries the full replacement row; there is no field-level
/// merge. `Resumed` marks a reconnect after a silent stream stop; the
/// engine must re-run the initial read because events may have been lost
/// while disconnected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Upsert { row: serde_json::Value },
    Remove { id: String },
    Resumed,
}

/// Board event types broadcast by the reconciliation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BoardEvent {
    /// An order transitioned into READY (fired at most once per transition)
    OrderReady {
        order: Order,
        timestamp: DateTime<Utc>,
    },

    /// A collection's in-memory contents changed
    CollectionChanged {
        collection: Collection,
        timestamp: DateTime<Utc>,
    },

    /// The persistence store dropped to a weaker tier
    StorageDemoted {
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// A collection could not be read from the remote service and was
    /// seeded from the local snapshot instead
    RemoteOffline {
        collection: Collection,
        timestamp: DateTime<Utc>,
    },

    /// A collection was fully re-read from the remote service
    Resynced {
        collection: Collection,
        timestamp: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_event_wire_format() {
        let event: ChangeEvent = serde_json::from_str(
            r#"{"kind": "upsert", "row": {"id": "o1", "status": "READY"}}"#,
        )
        .unwrap();
        match event {
            ChangeEvent::Upsert { row } => assert_eq!(row["id"], "o1"),
            other => panic!("unexpected event: {:?}", other),
        }

        let event: ChangeEvent =
            serde_json::from_str(r#"{"kind": "remove", "id": "o2"}"#).unwrap();
        match event {
            ChangeEvent::Remove { id } => assert_eq!(id, "o2"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_collection_names_are_stable() {
        let names: Vec<&str> = Collection::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            names,
            vec!["orders", "products", "media", "devices", "device_settings"]
        );
    }
}
