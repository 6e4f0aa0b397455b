//! The phased submission protocol, minus the IO.
//!
//! Submission walks a fixed state machine:
//!
//! ```text
//! Idle -> SubmittingCreates -> SubmittingUpdates -> SubmittingDeletes -> Done
//! ```
//!
//! For each phase the caller asks [`plan`] for one [`BatchRequest`] per
//! collection, sends them all concurrently, and feeds every response back
//! through [`settle`]. Only after all requests of a phase have settled may
//! the next phase be planned, since updates and deletes can target rows whose
//! ids are only known once the create phase has been acknowledged.

use crate::coerce::row_to_wire;
use crate::mutation::{CreateAck, MutationKind};
use crate::state::SyncState;
use crate::{CollectionName, RecordId, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// HTTP method of a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

impl From<MutationKind> for Method {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Create => Method::Post,
            MutationKind::Update => Method::Put,
            MutationKind::Delete => Method::Delete,
        }
    }
}

/// Submission state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitState {
    #[default]
    Idle,
    SubmittingCreates,
    SubmittingUpdates,
    SubmittingDeletes,
    Done,
}

impl SubmitState {
    /// The next state. `Done` is terminal.
    pub fn advance(self) -> Self {
        match self {
            SubmitState::Idle => SubmitState::SubmittingCreates,
            SubmitState::SubmittingCreates => SubmitState::SubmittingUpdates,
            SubmitState::SubmittingUpdates => SubmitState::SubmittingDeletes,
            SubmitState::SubmittingDeletes | SubmitState::Done => SubmitState::Done,
        }
    }

    /// The phase being submitted in this state, if any.
    pub fn phase(self) -> Option<MutationKind> {
        match self {
            SubmitState::SubmittingCreates => Some(MutationKind::Create),
            SubmitState::SubmittingUpdates => Some(MutationKind::Update),
            SubmitState::SubmittingDeletes => Some(MutationKind::Delete),
            SubmitState::Idle | SubmitState::Done => None,
        }
    }
}

/// One per-collection request of a phase.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub phase: MutationKind,
    pub collection: CollectionName,
    /// Ids in request order: temp ids for creates, row ids otherwise
    pub ids: Vec<RecordId>,
    /// Log entries as they were when the request was built, aligned with `ids`
    pub sent: Vec<Row>,
    /// Wire body; `None` for deletes
    pub body: Option<serde_json::Value>,
}

impl BatchRequest {
    pub fn method(&self) -> Method {
        self.phase.into()
    }

    /// Resource path relative to the service root.
    ///
    /// Creates go to `coll`; updates and deletes to `coll/id1,id2,...`.
    pub fn path(&self) -> String {
        match self.phase {
            MutationKind::Create => self.collection.clone(),
            _ => format!("{}/{}", self.collection, self.ids.join(",")),
        }
    }
}

/// Build the requests for one phase, one per collection with entries.
///
/// Creates of a collection with no known primary key are left out; see
/// [`unkeyed_creates`].
pub fn plan(state: &SyncState, phase: MutationKind) -> Vec<BatchRequest> {
    match phase {
        MutationKind::Create => plan_rows(state, phase, state.log.creates())
            .into_iter()
            .filter(|request| state.registry.primary_key(&request.collection).is_some())
            .collect(),
        MutationKind::Update => plan_rows(state, phase, state.log.updates()),
        MutationKind::Delete => state
            .log
            .deletes()
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(collection, ids)| BatchRequest {
                phase,
                collection: collection.clone(),
                ids: ids.iter().cloned().collect(),
                sent: Vec::new(),
                body: None,
            })
            .collect(),
    }
}

/// Collections with pending creates that cannot be sent because the schema
/// has no primary key for them, e.g. after a metadata reload dropped them.
pub fn unkeyed_creates(state: &SyncState) -> Vec<CollectionName> {
    state
        .log
        .creates()
        .iter()
        .filter(|(collection, entries)| {
            !entries.is_empty() && state.registry.primary_key(collection).is_none()
        })
        .map(|(collection, _)| collection.clone())
        .collect()
}

fn plan_rows(
    state: &SyncState,
    phase: MutationKind,
    buckets: &BTreeMap<CollectionName, BTreeMap<RecordId, Row>>,
) -> Vec<BatchRequest> {
    buckets
        .iter()
        .filter(|(_, entries)| !entries.is_empty())
        .map(|(collection, entries)| {
            let primary_key = state.registry.primary_key(collection);
            let body = entries
                .values()
                .map(|row| {
                    let mut row = row.clone();
                    if let Some(pk) = primary_key {
                        row.remove(pk);
                    }
                    row_to_wire(&state.registry, collection, &row)
                })
                .collect();
            BatchRequest {
                phase,
                collection: collection.clone(),
                ids: entries.keys().cloned().collect(),
                sent: entries.values().cloned().collect(),
                body: Some(serde_json::Value::Array(body)),
            }
        })
        .collect()
}

/// What a successful response confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settlement {
    /// Ids the server confirmed (server ids for creates)
    pub acknowledged: Vec<RecordId>,
    /// Ids the server did not confirm; their entries stay pending
    pub rejected: Vec<RecordId>,
}

impl Settlement {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Apply a successful response to the log and the cache.
///
/// - Create: returned ids are zipped with the temp ids in request order;
///   each row moves to its server id in the cache and its create entry is
///   acknowledged. Temp ids without a returned id stay pending.
/// - Update: a scalar success flag confirms every id, an array confirms ids
///   positionally.
/// - Delete: the scalar `1` confirms every id, an array confirms ids
///   positionally; unconfirmed ids stay pending.
pub fn settle(
    state: &mut SyncState,
    request: &BatchRequest,
    response: &serde_json::Value,
) -> Settlement {
    match request.phase {
        MutationKind::Create => settle_creates(state, request, response),
        MutationKind::Update => settle_flags(request, response, |id, i| {
            if let Some(sent) = request.sent.get(i) {
                state.log.ack_update(&request.collection, id, sent);
            }
        }),
        MutationKind::Delete => settle_flags(request, response, |id, _| {
            state.log.ack_delete(&request.collection, id);
        }),
    }
}

fn settle_creates(
    state: &mut SyncState,
    request: &BatchRequest,
    response: &serde_json::Value,
) -> Settlement {
    let server_ids: Vec<Option<RecordId>> = match response {
        serde_json::Value::Array(ids) => ids
            .iter()
            .map(|v| Value::from_json(v.clone()).as_id())
            .collect(),
        other => vec![Value::from_json(other.clone()).as_id()],
    };
    let mut settlement = Settlement::default();
    let Some(primary_key) = state
        .registry
        .primary_key(&request.collection)
        .map(str::to_string)
    else {
        settlement.rejected = request.ids.clone();
        return settlement;
    };

    for (i, (temp_id, sent)) in request.ids.iter().zip(&request.sent).enumerate() {
        let Some(server_id) = server_ids.get(i).cloned().flatten() else {
            settlement.rejected.push(temp_id.clone());
            continue;
        };
        state
            .store
            .rekey_row(&request.collection, temp_id, &server_id, &primary_key);
        if state
            .log
            .ack_create(&request.collection, temp_id, sent, &server_id, &primary_key)
            == CreateAck::Orphaned
        {
            state.store.remove_row(&request.collection, &server_id);
        }
        settlement.acknowledged.push(server_id);
    }
    settlement
}

fn settle_flags(
    request: &BatchRequest,
    response: &serde_json::Value,
    mut ack: impl FnMut(&str, usize),
) -> Settlement {
    let flags: Vec<bool> = match response {
        serde_json::Value::Array(flags) => flags.iter().map(is_success).collect(),
        scalar => vec![is_success(scalar); request.ids.len()],
    };

    let mut settlement = Settlement::default();
    for (i, id) in request.ids.iter().enumerate() {
        if flags.get(i).copied().unwrap_or(false) {
            ack(id, i);
            settlement.acknowledged.push(id.clone());
        } else {
            settlement.rejected.push(id.clone());
        }
    }
    settlement
}

/// Backend success flag: `true`, a non-zero number, or `"1"`.
pub fn is_success(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => s == "1" || s == "true",
        _ => false,
    }
}

/// Entries still pending for a failed phase.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingEntries {
    Rows(BTreeMap<CollectionName, BTreeMap<RecordId, Row>>),
    Ids(BTreeMap<CollectionName, BTreeSet<RecordId>>),
}

impl PendingEntries {
    pub fn len(&self) -> usize {
        match self {
            PendingEntries::Rows(c) => c.values().map(|r| r.len()).sum(),
            PendingEntries::Ids(c) => c.values().map(|r| r.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Failure of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFailure {
    /// Why each failing collection failed
    pub reasons: BTreeMap<CollectionName, String>,
    /// What remains pending for this phase after submission
    pub pending: PendingEntries,
}

/// Aggregated submission errors, keyed by phase.
#[derive(Debug, Clone, Default, PartialEq, Error)]
#[error("submission failed in {} phase(s){}", .phases.len(), expiry_note(.session_expired))]
pub struct SubmitErrors {
    pub phases: BTreeMap<MutationKind, PhaseFailure>,
    /// True when an authentication failure cut the submission short
    pub session_expired: bool,
}

fn expiry_note(expired: &bool) -> &'static str {
    if *expired {
        ", session expired"
    } else {
        ""
    }
}

impl SubmitErrors {
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty() && !self.session_expired
    }

    pub fn get(&self, phase: MutationKind) -> Option<&PhaseFailure> {
        self.phases.get(&phase)
    }

    /// Record a failed collection in a phase.
    ///
    /// The pending snapshot is filled in by [`SubmitErrors::finish`].
    pub fn record(&mut self, phase: MutationKind, collection: &str, reason: impl Into<String>) {
        self.phases
            .entry(phase)
            .or_insert_with(|| PhaseFailure {
                reasons: BTreeMap::new(),
                pending: PendingEntries::Ids(BTreeMap::new()),
            })
            .reasons
            .insert(collection.to_string(), reason.into());
    }

    /// Record every collection of a phase that was never sent, e.g. because
    /// the session expired in an earlier phase.
    pub fn record_skipped(&mut self, phase: MutationKind, state: &SyncState) {
        let collections: Vec<CollectionName> = match phase {
            MutationKind::Create => state.log.creates().keys().cloned().collect(),
            MutationKind::Update => state.log.updates().keys().cloned().collect(),
            MutationKind::Delete => state.log.deletes().keys().cloned().collect(),
        };
        for collection in collections {
            self.record(phase, &collection, "not sent");
        }
    }

    /// Capture what is still pending for each failed phase and turn the
    /// aggregate into a result.
    pub fn finish(mut self, state: &SyncState) -> std::result::Result<(), SubmitErrors> {
        for (phase, failure) in self.phases.iter_mut() {
            failure.pending = match phase {
                MutationKind::Create => PendingEntries::Rows(state.log.creates().clone()),
                MutationKind::Update => PendingEntries::Rows(state.log.updates().clone()),
                MutationKind::Delete => PendingEntries::Ids(state.log.deletes().clone()),
            };
        }
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}
