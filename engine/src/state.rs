//! Local state of a sync session and the staged-mutation operations.
//!
//! [`SyncState`] ties the schema, the pending-change log, and the row cache
//! together so that every local mutation updates the log and the cache in
//! one step.

use crate::coerce::{canonicalize_row, materialize_defaults, row_from_wire};
use crate::mutation::{Mutation, MutationLog, Recorded};
use crate::{
    error::Result, schema::SchemaRegistry, store::LocalStore, EntityRef, Error, RecordId, Row,
    TempId, Value,
};

/// Schema, pending changes, and cached rows of one session.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub registry: SchemaRegistry,
    pub log: MutationLog,
    pub store: LocalStore,
}

impl SyncState {
    /// Create empty state whose first temp id is `seed`.
    pub fn new(temp_id_seed: TempId) -> Self {
        Self {
            registry: SchemaRegistry::new(),
            log: MutationLog::with_temp_id_seed(temp_id_seed),
            store: LocalStore::new(),
        }
    }

    /// Swap in a freshly ingested registry.
    pub fn replace_registry(&mut self, registry: SchemaRegistry) {
        self.registry = registry;
    }

    /// Queue a create and cache the new row under its temp id.
    ///
    /// The payload is expanded to every known column first, so the cached
    /// row has its full typed shape before the server answers.
    pub fn stage_create(&mut self, target: &EntityRef, payload: Row) -> Result<TempId> {
        let collection = target.require_collection()?.to_string();
        if payload.is_empty() {
            return Err(Error::EmptyPayload(target.raw_path.clone()));
        }
        let primary_key = self
            .registry
            .primary_key(&collection)
            .ok_or_else(|| Error::UnknownPrimaryKey(collection.clone()))?
            .to_string();

        let mut full = materialize_defaults(&self.registry, &collection, &payload);
        full.remove(&primary_key);
        if full.is_empty() {
            return Err(Error::EmptyPayload(target.raw_path.clone()));
        }

        let recorded = self
            .log
            .record(&self.registry, target, Mutation::Create(full.clone()))?;
        let Recorded::Created(temp_id) = recorded else {
            return Err(Error::EmptyPayload(target.raw_path.clone()));
        };

        full.insert(primary_key, Value::Int(temp_id as i64));
        self.store.put_row(&collection, &temp_id.to_string(), full);
        Ok(temp_id)
    }

    /// Queue an update and apply it to the cached row.
    ///
    /// A rejected update leaves the cache untouched.
    pub fn stage_update(&mut self, target: &EntityRef, partial: Row) -> Result<Recorded> {
        let collection = target.require_collection()?.to_string();
        let id = target.require_id()?.to_string();
        let mut partial = canonicalize_row(&self.registry, &collection, partial);
        if let Some(primary_key) = self.registry.primary_key(&collection) {
            partial.remove(primary_key);
        }

        let recorded = self
            .log
            .record(&self.registry, target, Mutation::Update(partial.clone()))?;
        self.store.merge_row(&collection, &id, partial);
        Ok(recorded)
    }

    /// Queue a delete and drop the cached row.
    pub fn stage_delete(&mut self, target: &EntityRef) -> Result<Recorded> {
        let collection = target.require_collection()?.to_string();
        let id = target.require_id()?.to_string();

        let recorded = self.log.record(&self.registry, target, Mutation::Delete)?;
        self.store.remove_row(&collection, &id);
        Ok(recorded)
    }

    /// Write through a row or field path, capturing the write as an update.
    ///
    /// A field path takes any value; a row path takes a JSON object whose
    /// fields are merged into the row.
    pub fn set(&mut self, target: &EntityRef, value: Value) -> Result<Recorded> {
        let collection = target.require_collection()?.to_string();
        target.require_id()?;

        let partial = match (&target.field, value) {
            (Some(field), value) => Row::from([(field.clone(), value)]),
            (None, Value::Json(object)) if object.is_object() => {
                row_from_wire(&self.registry, &collection, &object)
            }
            (None, _) => return Err(Error::EmptyPayload(target.to_string())),
        };
        self.stage_update(target, partial)
    }

    /// Ids of cached rows of a collection that are not yet known to the server.
    pub fn unsent_ids(&self, collection: &str) -> Vec<RecordId> {
        self.log
            .creates_for(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationKind;
    use crate::path::parse;
    use crate::schema::{ColumnSchema, ColumnType, TableSchema};
    use crate::store::Entry;
    use serde_json::json;

    fn state() -> SyncState {
        let mut state = SyncState::new(500);
        state.replace_registry(SchemaRegistry::new().with_table(
            "student",
            TableSchema::new(
                "id",
                vec![
                    ColumnSchema::new("name", ColumnType::String),
                    ColumnSchema::new("birthday", ColumnType::Date),
                ],
            ),
        ));
        state
    }

    #[test]
    fn create_caches_full_row_under_temp_id() {
        let mut state = state();
        let temp = state
            .stage_create(&parse("/student"), Row::from([("name".to_string(), Value::from("Ann"))]))
            .unwrap();

        assert_eq!(temp, 500);
        let cached = state.store.get_row("student", "500").unwrap();
        assert_eq!(cached["id"], Value::Int(500));
        assert_eq!(cached["name"], Value::from("Ann"));
        assert_eq!(cached["birthday"], Value::from(""));
        assert_eq!(
            state.log.creates()["student"]["500"],
            Row::from([
                ("birthday".to_string(), Value::from("")),
                ("id".to_string(), Value::Int(500)),
                ("name".to_string(), Value::from("Ann")),
            ])
        );
    }

    #[test]
    fn create_without_primary_key_leaves_state_alone() {
        let mut state = state();
        let result = state.stage_create(
            &parse("/guardian"),
            Row::from([("name".to_string(), Value::from("X"))]),
        );
        assert!(matches!(result, Err(Error::UnknownPrimaryKey(_))));
        assert_eq!(state.store.row_count(), 0);
        assert!(!state.log.has_pending_changes());
    }

    #[test]
    fn update_coerces_and_merges_locally() {
        let mut state = state();
        state.store.put_row(
            "student",
            "3",
            Row::from([("name".to_string(), Value::from("Old"))]),
        );

        state
            .stage_update(
                &parse("/student/3"),
                Row::from([("birthday".to_string(), Value::from("2000-01-02"))]),
            )
            .unwrap();

        let cached = state.store.get_row("student", "3").unwrap();
        assert_eq!(cached["name"], Value::from("Old"));
        assert!(matches!(cached["birthday"], Value::Date(_)));
        assert_eq!(state.log.pending(MutationKind::Update), 1);
    }

    #[test]
    fn rejected_update_leaves_cache_alone() {
        let mut state = state();
        state
            .store
            .put_row("student", "3", Row::from([("name".to_string(), Value::from("A"))]));
        state.log.record(&state.registry, &parse("/student/3"), Mutation::Delete).unwrap();

        let result = state.stage_update(
            &parse("/student/3"),
            Row::from([("name".to_string(), Value::from("B"))]),
        );
        assert!(result.is_err());
        assert_eq!(state.store.get_row("student", "3").unwrap()["name"], Value::from("A"));
    }

    #[test]
    fn delete_of_unsent_row_needs_no_server() {
        let mut state = state();
        let temp = state
            .stage_create(&parse("/student"), Row::from([("name".to_string(), Value::from("A"))]))
            .unwrap();
        let target = EntityRef::row("student", temp.to_string());

        assert_eq!(state.stage_delete(&target).unwrap(), Recorded::Cancelled);
        assert!(!state.log.has_pending_changes());
        assert!(state.store.lookup(&target).is_none());
    }

    #[test]
    fn set_field_and_row() {
        let mut state = state();
        state.store.put_row("student", "1", Row::new());

        state.set(&parse("/student/1/name"), Value::from("Zed")).unwrap();
        assert_eq!(
            state.store.lookup(&parse("/student/1/name")),
            Some(Entry::Field(&Value::from("Zed")))
        );

        state
            .set(&parse("/student/1"), Value::Json(json!({"birthday": "1990-09-09"})))
            .unwrap();
        assert!(matches!(
            state.store.get_row("student", "1").unwrap()["birthday"],
            Value::Date(_)
        ));
        assert_eq!(state.log.pending_count(), 1);

        assert!(matches!(
            state.set(&parse("/student"), Value::from("x")),
            Err(Error::MissingId(_))
        ));
        assert!(matches!(
            state.set(&parse("/student/1"), Value::from("x")),
            Err(Error::EmptyPayload(_))
        ));
    }
}
