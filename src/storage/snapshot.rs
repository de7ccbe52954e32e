//! Durable copy of the enumerated candidate sequence
//!
//! The catalog listing can change between runs. Resumed runs read the
//! sequence from this file so the checkpoint's enumerator index keeps
//! pointing at the same candidates.

use crate::storage::checkpoint::{archive, persist, stage_bytes};
use crate::storage::traits::{CheckpointError, CheckpointResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A saved listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingSnapshot {
    /// Where the listing was fetched from
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub ids: Vec<u64>,
}

impl ListingSnapshot {
    pub fn new(source: impl Into<String>, ids: Vec<u64>) -> Self {
        Self {
            source: source.into(),
            fetched_at: Utc::now(),
            ids,
        }
    }
}

/// Reads and writes a [`ListingSnapshot`] file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot; `Ok(None)` if there is none
    ///
    /// A snapshot that fails to parse or is empty is reported as an error so
    /// the caller can decide to re-fetch.
    pub fn load(&self) -> CheckpointResult<Option<ListingSnapshot>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: ListingSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        if snapshot.ids.is_empty() {
            return Err(CheckpointError::Serialization(
                "listing snapshot is empty".to_string(),
            ));
        }
        Ok(Some(snapshot))
    }

    /// Atomically writes the snapshot
    pub fn save(&self, snapshot: &ListingSnapshot) -> CheckpointResult<()> {
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let temp = stage_bytes(&self.path, &json)?;
        persist(temp, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            candidates = snapshot.ids.len(),
            "Listing snapshot saved"
        );
        Ok(())
    }

    /// Sets the current snapshot aside so the next run re-fetches
    pub fn reset(&self) -> CheckpointResult<()> {
        archive(&self.path, Utc::now().timestamp())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("listing.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_preserves_order() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("listing.json"));

        store
            .save(&ListingSnapshot::new("http://catalog", vec![30, 10, 20]))
            .unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.ids, vec![30, 10, 20]);
        assert_eq!(loaded.source, "http://catalog");
    }

    #[test]
    fn test_corrupt_snapshot_is_error() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("listing.json"));
        std::fs::write(store.path(), b"[1, 2,").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn test_reset_moves_snapshot_aside() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("listing.json"));
        store.save(&ListingSnapshot::new("x", vec![1])).unwrap();

        store.reset().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
