//! The pending-change log.
//!
//! Local edits accumulate here until they are submitted. The log keeps three
//! buckets per collection, and a given `(collection, id)` is in at most one
//! of them at any time:
//!
//! - creates: temp id to full payload
//! - updates: id to partial payload
//! - deletes: set of ids
//!
//! [`MutationLog::record`] enforces the merge rules that keep the buckets
//! disjoint. Entries leave the log only when the server acknowledges them
//! (the `ack_*` methods) or when they are discarded with [`MutationLog::clear`].

use crate::{
    error::Result, schema::SchemaRegistry, CollectionName, EntityRef, Error, RecordId, Row,
    TempId, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Default first temp id when none is injected.
///
/// Large enough that it does not collide with typical auto-increment ids.
pub const DEFAULT_TEMP_ID_SEED: TempId = 1_000_000_000_000;

/// The three kinds of change, which are also the submission phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    /// All kinds in submission order.
    pub const ALL: [MutationKind; 3] = [
        MutationKind::Create,
        MutationKind::Update,
        MutationKind::Delete,
    ];
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "Create"),
            MutationKind::Update => write!(f, "Update"),
            MutationKind::Delete => write!(f, "Delete"),
        }
    }
}

/// A change to record.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Row),
    Update(Row),
    Delete,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create(_) => MutationKind::Create,
            Mutation::Update(_) => MutationKind::Update,
            Mutation::Delete => MutationKind::Delete,
        }
    }
}

/// What [`MutationLog::record`] did with a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// A create was queued under this temp id
    Created(TempId),
    /// A new update or delete entry was queued
    Queued,
    /// The payload was merged into an existing create or update entry
    Merged,
    /// A delete cancelled a pending create; nothing needs to reach the server
    Cancelled,
    /// The id was already queued for deletion
    Unchanged,
}

/// Outcome of acknowledging a create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateAck {
    /// The entry matched what was sent and is gone
    Settled,
    /// The entry changed while in flight; the changes now sit in the update
    /// bucket under the server id
    Amended,
    /// The entry was deleted while in flight; the server id is now queued
    /// for deletion
    Orphaned,
}

/// The pending-change ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationLog {
    creates: BTreeMap<CollectionName, BTreeMap<RecordId, Row>>,
    updates: BTreeMap<CollectionName, BTreeMap<RecordId, Row>>,
    deletes: BTreeMap<CollectionName, BTreeSet<RecordId>>,
    last_temp_id: TempId,
}

impl Default for MutationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationLog {
    /// Create an empty log with the default temp id seed.
    pub fn new() -> Self {
        Self::with_temp_id_seed(DEFAULT_TEMP_ID_SEED)
    }

    /// Create an empty log whose first temp id is `seed`.
    pub fn with_temp_id_seed(seed: TempId) -> Self {
        Self {
            creates: BTreeMap::new(),
            updates: BTreeMap::new(),
            deletes: BTreeMap::new(),
            last_temp_id: seed.saturating_sub(1),
        }
    }

    /// Allocate the next temp id. Strictly increasing within a log.
    pub fn next_temp_id(&mut self) -> TempId {
        self.last_temp_id += 1;
        self.last_temp_id
    }

    /// Record a mutation against `target`.
    ///
    /// Merge rules:
    /// - Create always allocates a fresh temp id and stamps it into the
    ///   payload's primary-key field.
    /// - Update on an id pending deletion is rejected.
    /// - Update on a pending create or update merges field-wise into it.
    /// - Delete drops any pending update; on a pending create it drops the
    ///   create and reports [`Recorded::Cancelled`].
    /// - Delete is idempotent.
    pub fn record(
        &mut self,
        registry: &SchemaRegistry,
        target: &EntityRef,
        mutation: Mutation,
    ) -> Result<Recorded> {
        let collection = target.require_collection()?.to_string();

        match mutation {
            Mutation::Create(mut payload) => {
                if payload.is_empty() {
                    return Err(Error::EmptyPayload(target.raw_path.clone()));
                }
                let primary_key = registry
                    .primary_key(&collection)
                    .ok_or_else(|| Error::UnknownPrimaryKey(collection.clone()))?
                    .to_string();

                let temp_id = self.next_temp_id();
                payload.insert(primary_key, Value::Int(temp_id as i64));
                self.creates
                    .entry(collection)
                    .or_default()
                    .insert(temp_id.to_string(), payload);
                Ok(Recorded::Created(temp_id))
            }

            Mutation::Update(payload) => {
                let id = target.require_id()?.to_string();
                if payload.is_empty() {
                    return Err(Error::EmptyPayload(target.raw_path.clone()));
                }
                if self.is_pending_delete(&collection, &id) {
                    return Err(Error::PendingDelete { collection, id });
                }
                if let Some(entry) = self
                    .creates
                    .get_mut(&collection)
                    .and_then(|c| c.get_mut(&id))
                {
                    entry.extend(payload);
                    return Ok(Recorded::Merged);
                }
                let bucket = self.updates.entry(collection).or_default();
                match bucket.get_mut(&id) {
                    Some(entry) => {
                        entry.extend(payload);
                        Ok(Recorded::Merged)
                    }
                    None => {
                        bucket.insert(id, payload);
                        Ok(Recorded::Queued)
                    }
                }
            }

            Mutation::Delete => {
                let id = target.require_id()?.to_string();
                remove_entry(&mut self.updates, &collection, &id);
                if remove_entry(&mut self.creates, &collection, &id).is_some() {
                    return Ok(Recorded::Cancelled);
                }
                if self.deletes.entry(collection).or_default().insert(id) {
                    Ok(Recorded::Queued)
                } else {
                    Ok(Recorded::Unchanged)
                }
            }
        }
    }

    /// True iff any bucket holds an entry.
    pub fn has_pending_changes(&self) -> bool {
        self.pending_count() > 0
    }

    /// Total number of pending entries across all buckets.
    pub fn pending_count(&self) -> usize {
        self.creates.values().map(|c| c.len()).sum::<usize>()
            + self.updates.values().map(|c| c.len()).sum::<usize>()
            + self.deletes.values().map(|c| c.len()).sum::<usize>()
    }

    /// Number of pending entries of one kind.
    pub fn pending(&self, kind: MutationKind) -> usize {
        match kind {
            MutationKind::Create => self.creates.values().map(|c| c.len()).sum(),
            MutationKind::Update => self.updates.values().map(|c| c.len()).sum(),
            MutationKind::Delete => self.deletes.values().map(|c| c.len()).sum(),
        }
    }

    /// Drop one bucket, or all three when `kind` is `None`.
    pub fn clear(&mut self, kind: Option<MutationKind>) {
        match kind {
            Some(MutationKind::Create) => self.creates.clear(),
            Some(MutationKind::Update) => self.updates.clear(),
            Some(MutationKind::Delete) => self.deletes.clear(),
            None => {
                self.creates.clear();
                self.updates.clear();
                self.deletes.clear();
            }
        }
    }

    pub fn creates(&self) -> &BTreeMap<CollectionName, BTreeMap<RecordId, Row>> {
        &self.creates
    }

    pub fn updates(&self) -> &BTreeMap<CollectionName, BTreeMap<RecordId, Row>> {
        &self.updates
    }

    pub fn deletes(&self) -> &BTreeMap<CollectionName, BTreeSet<RecordId>> {
        &self.deletes
    }

    pub fn creates_for(&self, collection: &str) -> Option<&BTreeMap<RecordId, Row>> {
        self.creates.get(collection).filter(|c| !c.is_empty())
    }

    pub fn updates_for(&self, collection: &str) -> Option<&BTreeMap<RecordId, Row>> {
        self.updates.get(collection).filter(|c| !c.is_empty())
    }

    pub fn is_pending_create(&self, collection: &str, id: &str) -> bool {
        self.creates
            .get(collection)
            .is_some_and(|c| c.contains_key(id))
    }

    pub fn is_pending_delete(&self, collection: &str, id: &str) -> bool {
        self.deletes.get(collection).is_some_and(|c| c.contains(id))
    }

    /// Settle a create the server accepted under `server_id`.
    ///
    /// `sent` is the payload as it was when the request was built. Edits made
    /// while the request was in flight are carried over as an update of the
    /// server row rather than lost.
    pub fn ack_create(
        &mut self,
        collection: &str,
        temp_id: &str,
        sent: &Row,
        server_id: &str,
        primary_key: &str,
    ) -> CreateAck {
        match remove_entry(&mut self.creates, collection, temp_id) {
            None => {
                self.deletes
                    .entry(collection.to_string())
                    .or_default()
                    .insert(server_id.to_string());
                CreateAck::Orphaned
            }
            Some(current) if &current == sent => CreateAck::Settled,
            Some(current) => {
                let changed = diff(&current, sent, primary_key);
                if changed.is_empty() {
                    return CreateAck::Settled;
                }
                self.updates
                    .entry(collection.to_string())
                    .or_default()
                    .insert(server_id.to_string(), changed);
                CreateAck::Amended
            }
        }
    }

    /// Settle an update the server accepted.
    ///
    /// Fields changed again since `sent` was built stay pending.
    pub fn ack_update(&mut self, collection: &str, id: &str, sent: &Row) {
        let Some(bucket) = self.updates.get_mut(collection) else {
            return;
        };
        if let Some(current) = bucket.get_mut(id) {
            current.retain(|k, v| sent.get(k) != Some(v));
            if current.is_empty() {
                bucket.remove(id);
            }
        }
        if bucket.is_empty() {
            self.updates.remove(collection);
        }
    }

    /// Settle a delete the server confirmed.
    pub fn ack_delete(&mut self, collection: &str, id: &str) -> bool {
        let Some(bucket) = self.deletes.get_mut(collection) else {
            return false;
        };
        let removed = bucket.remove(id);
        if bucket.is_empty() {
            self.deletes.remove(collection);
        }
        removed
    }
}

fn remove_entry(
    buckets: &mut BTreeMap<CollectionName, BTreeMap<RecordId, Row>>,
    collection: &str,
    id: &str,
) -> Option<Row> {
    let bucket = buckets.get_mut(collection)?;
    let removed = bucket.remove(id);
    if bucket.is_empty() {
        buckets.remove(collection);
    }
    removed
}

fn diff(current: &Row, sent: &Row, primary_key: &str) -> Row {
    current
        .iter()
        .filter(|(k, v)| k.as_str() != primary_key && sent.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
