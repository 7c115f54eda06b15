//! File-backed key-value snapshot storage
//!
//! One JSON envelope file per collection under a root directory. Used for
//! both the persistent key-value tier (data directory) and the
//! session-scoped tier (per-process directory under the OS temp dir).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use storeboard_common::Result;
use tracing::warn;

use super::SNAPSHOT_SCHEMA_VERSION;

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    schema_version: u32,
    records: Vec<Value>,
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> FileStore {
        FileStore { root }
    }

    /// Write-then-read-then-clean side-effect test
    pub fn probe(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join("__probe__");
        std::fs::write(&path, b"probe")?;
        let contents = std::fs::read(&path)?;
        std::fs::remove_file(&path)?;
        if contents != b"probe" {
            return Err(storeboard_common::Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "probe read back different contents",
            )));
        }
        Ok(())
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.json", collection))
    }

    /// Replace a collection's snapshot file with the given rows.
    ///
    /// Written to a temporary sibling and renamed so readers never observe
    /// a half-written snapshot.
    pub fn save(&self, collection: &str, rows: &[Value]) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let envelope = SnapshotEnvelope {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            records: rows.to_vec(),
        };
        let encoded = serde_json::to_vec(&envelope)?;

        let path = self.path_for(collection);
        let tmp = self.root.join(format!("{}.json.tmp", collection));
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load a collection's snapshot (empty when the file is absent)
    pub fn load(&self, collection: &str) -> Result<Vec<Value>> {
        let path = self.path_for(collection);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let envelope: SnapshotEnvelope = serde_json::from_slice(&contents)?;
        if envelope.schema_version != SNAPSHOT_SCHEMA_VERSION {
            warn!(
                "Ignoring {} snapshot with schema version {} (expected {})",
                collection, envelope.schema_version, SNAPSHOT_SCHEMA_VERSION
            );
            return Ok(Vec::new());
        }
        Ok(envelope.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        assert!(store.load("orders").unwrap().is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        let rows = vec![json!({"id": "a", "n": 1}), json!({"id": "b", "n": 2})];
        store.save("orders", &rows).unwrap();
        assert_eq!(store.load("orders").unwrap(), rows);
    }

    #[test]
    fn test_unknown_schema_version_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        std::fs::write(
            dir.path().join("orders.json"),
            r#"{"schema_version": 99, "records": [{"id": "a"}]}"#,
        )
        .unwrap();
        assert!(store.load("orders").unwrap().is_empty());
    }
}
