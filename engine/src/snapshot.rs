//! Snapshots of cached rows and unsent changes.
//!
//! A host persists a snapshot so that pending changes survive a restart.
//! Uses BTreeMap throughout for deterministic serialization order. The
//! schema registry is not part of a snapshot; it is re-fetched on startup.

use crate::{
    error::Result, mutation::MutationLog, state::SyncState, CollectionName, Error, RecordId, Row,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of the row cache and the pending-change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub format_version: u32,
    /// Cached rows by collection, then by id
    pub collections: BTreeMap<CollectionName, BTreeMap<RecordId, Row>>,
    /// Unsent changes
    pub log: MutationLog,
}

impl SessionSnapshot {
    /// Capture the current rows and pending changes.
    pub fn capture(state: &SyncState) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            collections: state.store.export_rows(),
            log: state.log.clone(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Check that every pending create still has its cached row.
    pub fn validate(&self) -> Result<()> {
        for (collection, creates) in self.log.creates() {
            for temp_id in creates.keys() {
                let cached = self
                    .collections
                    .get(collection)
                    .is_some_and(|rows| rows.contains_key(temp_id));
                if !cached {
                    return Err(Error::InvalidSnapshot(format!(
                        "pending create {}/{} has no cached row",
                        collection, temp_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Summary of a snapshot without the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub row_count: usize,
    pub pending_count: usize,
}

impl From<&SessionSnapshot> for SnapshotMetadata {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            row_count: snapshot.row_count(),
            pending_count: snapshot.log.pending_count(),
        }
    }
}

impl SyncState {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(self)
    }

    /// Replace rows and pending changes with a snapshot's.
    ///
    /// The registry and store observers are kept.
    pub fn restore(&mut self, snapshot: SessionSnapshot) -> Result<()> {
        snapshot.validate()?;
        self.store.import_rows(snapshot.collections);
        self.log = snapshot.log;
        Ok(())
    }
}
