//! Remote data service adapter
//!
//! The engine talks to the remote relational backend only through the
//! `RemoteBackend` trait: an initial full read, CRUD mutations, and a
//! per-collection change stream. Constructed once at startup and injected
//! by reference so tests can substitute a double.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use storeboard_common::events::{ChangeEvent, Collection};
use storeboard_common::{Error, Result};
use tokio::sync::mpsc;

pub use http::HttpBackend;

/// Abstract contract the reconciliation engine consumes
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Whether remote operations should be attempted at all
    fn is_configured(&self) -> bool;

    /// Initial full read of a collection
    async fn select(&self, collection: Collection) -> Result<Vec<Value>>;

    /// Insert a row; returns the stored row with service-assigned fields
    async fn insert(&self, collection: Collection, row: Value) -> Result<Value>;

    /// Patch a row by id; returns the full updated row
    async fn update(&self, collection: Collection, id: &str, patch: Value) -> Result<Value>;

    /// Delete a row by id (deleting an absent row is not an error)
    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;

    /// Subscribe to the collection's change stream.
    ///
    /// Events arrive in delivery order. The stream may silently stop on
    /// disconnect; the adapter reconnects on its own and emits
    /// `ChangeEvent::Resumed` so the engine re-runs the initial read.
    async fn subscribe(&self, collection: Collection) -> Result<mpsc::Receiver<ChangeEvent>>;
}

/// Backend used when the remote service is not configured.
///
/// Reads yield nothing, mutations fail with a remote error the caller can
/// surface, and subscriptions never produce events. The engine runs purely
/// from persisted seed data.
pub struct NullBackend;

#[async_trait]
impl RemoteBackend for NullBackend {
    fn is_configured(&self) -> bool {
        false
    }

    async fn select(&self, _collection: Collection) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn insert(&self, _collection: Collection, _row: Value) -> Result<Value> {
        Err(Error::Remote("remote service not configured".to_string()))
    }

    async fn update(&self, _collection: Collection, _id: &str, _patch: Value) -> Result<Value> {
        Err(Error::Remote("remote service not configured".to_string()))
    }

    async fn delete(&self, _collection: Collection, _id: &str) -> Result<()> {
        Err(Error::Remote("remote service not configured".to_string()))
    }

    async fn subscribe(&self, _collection: Collection) -> Result<mpsc::Receiver<ChangeEvent>> {
        // The sender is dropped immediately; the receiver reports a closed
        // stream and the engine's feed task exits.
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}
