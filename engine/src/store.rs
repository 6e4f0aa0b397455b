//! LocalStore - the client-side row cache.
//!
//! Holds `collection -> id -> row` with canonical values. The UI layer reads
//! it; local mutations and server acknowledgements write it. Every write is
//! announced to the registered [`StoreObserver`]s.

use crate::{path::EntityRef, CollectionName, RecordId, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    RowChanged {
        collection: CollectionName,
        id: RecordId,
    },
    RowRemoved {
        collection: CollectionName,
        id: RecordId,
    },
    RowRekeyed {
        collection: CollectionName,
        from: RecordId,
        to: RecordId,
    },
    CollectionReplaced {
        collection: CollectionName,
    },
}

/// Receives store change notifications.
pub trait StoreObserver: Send + Sync {
    fn on_change(&self, change: &StoreChange);
}

/// Rows of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collection {
    rows: BTreeMap<RecordId, Row>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Rows in id order.
    pub fn rows(&self) -> impl Iterator<Item = (&RecordId, &Row)> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of resolving a path against the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entry<'a> {
    Collection(&'a Collection),
    Row(&'a Row),
    Field(&'a Value),
}

/// The row cache.
#[derive(Clone, Default)]
pub struct LocalStore {
    collections: BTreeMap<CollectionName, Collection>,
    observers: Vec<Arc<dyn StoreObserver>>,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("collections", &self.collections)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for all future changes.
    pub fn subscribe(&mut self, observer: Arc<dyn StoreObserver>) {
        self.observers.push(observer);
    }

    pub fn get_row(&self, collection: &str, id: &str) -> Option<&Row> {
        self.collections.get(collection)?.get(id)
    }

    pub fn get_collection(&self, collection: &str) -> Option<&Collection> {
        self.collections.get(collection)
    }

    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.get_row(collection, id).is_some()
    }

    /// Resolve a reference to a collection, a row, or a single field.
    pub fn lookup(&self, target: &EntityRef) -> Option<Entry<'_>> {
        if target.is_empty() {
            return None;
        }
        let collection = self.collections.get(&target.collection)?;
        let Some(id) = &target.id else {
            return Some(Entry::Collection(collection));
        };
        let row = collection.get(id)?;
        match &target.field {
            Some(field) => row.get(field).map(Entry::Field),
            None => Some(Entry::Row(row)),
        }
    }

    /// Insert or replace a row.
    pub fn put_row(&mut self, collection: &str, id: &str, row: Row) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .rows
            .insert(id.to_string(), row);
        self.notify(StoreChange::RowChanged {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    /// Overwrite the given fields of a row, creating the row if absent.
    pub fn merge_row(&mut self, collection: &str, id: &str, fields: Row) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .rows
            .entry(id.to_string())
            .or_default()
            .extend(fields);
        self.notify(StoreChange::RowChanged {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    pub fn remove_row(&mut self, collection: &str, id: &str) -> Option<Row> {
        let removed = self.collections.get_mut(collection)?.rows.remove(id)?;
        self.notify(StoreChange::RowRemoved {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        Some(removed)
    }

    /// Move a row from `from` to `to` and set its primary-key field to `to`.
    ///
    /// Any row already cached under `to` is replaced. Returns false if there
    /// is no row under `from`.
    pub fn rekey_row(&mut self, collection: &str, from: &str, to: &str, primary_key: &str) -> bool {
        let Some(rows) = self.collections.get_mut(collection).map(|c| &mut c.rows) else {
            return false;
        };
        let Some(mut row) = rows.remove(from) else {
            return false;
        };
        row.insert(primary_key.to_string(), Value::from_id(to));
        rows.insert(to.to_string(), row);
        self.notify(StoreChange::RowRekeyed {
            collection: collection.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        true
    }

    /// Merge fetched rows into a collection.
    ///
    /// With `prefer_local`, fields already cached win over fetched ones, so
    /// unsent local edits survive a refresh. Cached rows missing from
    /// `rows` are kept either way.
    pub fn merge_collection(
        &mut self,
        collection: &str,
        rows: impl IntoIterator<Item = (RecordId, Row)>,
        prefer_local: bool,
    ) {
        let target = &mut self
            .collections
            .entry(collection.to_string())
            .or_default()
            .rows;
        for (id, fetched) in rows {
            match target.get_mut(&id) {
                Some(cached) if prefer_local => {
                    for (field, value) in fetched {
                        cached.entry(field).or_insert(value);
                    }
                }
                Some(cached) => cached.extend(fetched),
                None => {
                    target.insert(id, fetched);
                }
            }
        }
        self.notify(StoreChange::CollectionReplaced {
            collection: collection.to_string(),
        });
    }

    /// Replace a collection's rows wholesale.
    pub fn replace_collection(
        &mut self,
        collection: &str,
        rows: impl IntoIterator<Item = (RecordId, Row)>,
    ) {
        self.collections.insert(
            collection.to_string(),
            Collection {
                rows: rows.into_iter().collect(),
            },
        );
        self.notify(StoreChange::CollectionReplaced {
            collection: collection.to_string(),
        });
    }

    /// Drop every cached row. Observers stay registered.
    pub fn clear(&mut self) {
        let names: Vec<_> = self.collections.keys().cloned().collect();
        self.collections.clear();
        for collection in names {
            self.notify(StoreChange::CollectionReplaced { collection });
        }
    }

    /// Total number of cached rows.
    pub fn row_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Copy of all rows, in deterministic order.
    pub fn export_rows(&self) -> BTreeMap<CollectionName, BTreeMap<RecordId, Row>> {
        self.collections
            .iter()
            .map(|(name, c)| (name.clone(), c.rows.clone()))
            .collect()
    }

    /// Replace all rows from an export. Observers stay registered.
    pub fn import_rows(&mut self, rows: BTreeMap<CollectionName, BTreeMap<RecordId, Row>>) {
        self.clear();
        for (collection, rows) in rows {
            self.replace_collection(&collection, rows);
        }
    }

    fn notify(&self, change: StoreChange) {
        for observer in &self.observers {
            observer.on_change(&change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parse;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<StoreChange>>);

    impl StoreObserver for Recorder {
        fn on_change(&self, change: &StoreChange) {
            self.0.lock().unwrap().push(change.clone());
        }
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn put_and_lookup() {
        let mut store = LocalStore::new();
        store.put_row("student", "1", row(&[("id", Value::Int(1)), ("name", "Ann".into())]));

        assert!(matches!(store.lookup(&parse("/student")), Some(Entry::Collection(c)) if c.len() == 1));
        assert!(matches!(store.lookup(&parse("/student(1)")), Some(Entry::Row(_))));
        assert_eq!(
            store.lookup(&parse("/student/1/name")),
            Some(Entry::Field(&Value::from("Ann")))
        );
        assert!(store.lookup(&parse("/student/2")).is_none());
        assert!(store.lookup(&parse("")).is_none());
    }

    #[test]
    fn merge_row_overwrites_fields() {
        let mut store = LocalStore::new();
        store.put_row("student", "1", row(&[("name", "Ann".into()), ("age", Value::Int(3))]));
        store.merge_row("student", "1", row(&[("name", "Bo".into())]));

        assert_eq!(
            store.get_row("student", "1"),
            Some(&row(&[("name", "Bo".into()), ("age", Value::Int(3))]))
        );
    }

    #[test]
    fn rekey_moves_row_and_stamps_primary_key() {
        let mut store = LocalStore::new();
        store.put_row("orders", "1000", row(&[("id", Value::Int(1000)), ("qty", Value::Int(2))]));

        assert!(store.rekey_row("orders", "1000", "55", "id"));
        assert!(!store.contains("orders", "1000"));
        assert_eq!(store.get_row("orders", "55").unwrap()["id"], Value::Int(55));
        assert_eq!(store.get_row("orders", "55").unwrap()["qty"], Value::Int(2));

        assert!(!store.rekey_row("orders", "1000", "56", "id"));
    }

    #[test]
    fn merge_collection_prefers_local() {
        let mut store = LocalStore::new();
        store.put_row("student", "1", row(&[("name", "Edited".into())]));
        store.put_row("student", "9", row(&[("name", "Unsent".into())]));

        store.merge_collection(
            "student",
            vec![
                ("1".to_string(), row(&[("name", "Server".into()), ("age", Value::Int(20))])),
                ("2".to_string(), row(&[("name", "New".into())])),
            ],
            true,
        );

        assert_eq!(
            store.get_row("student", "1"),
            Some(&row(&[("name", "Edited".into()), ("age", Value::Int(20))]))
        );
        assert!(store.contains("student", "2"));
        assert!(store.contains("student", "9"));

        store.merge_collection(
            "student",
            vec![("1".to_string(), row(&[("name", "Server".into())]))],
            false,
        );
        assert_eq!(store.get_row("student", "1").unwrap()["name"], Value::from("Server"));
    }

    #[test]
    fn observers_see_every_change() {
        let mut store = LocalStore::new();
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());

        store.put_row("t", "1", Row::new());
        store.rekey_row("t", "1", "2", "id");
        store.remove_row("t", "2");
        store.remove_row("t", "2");
        store.replace_collection("t", Vec::new());

        let changes = recorder.0.lock().unwrap();
        assert_eq!(
            *changes,
            vec![
                StoreChange::RowChanged {
                    collection: "t".into(),
                    id: "1".into()
                },
                StoreChange::RowRekeyed {
                    collection: "t".into(),
                    from: "1".into(),
                    to: "2".into()
                },
                StoreChange::RowRemoved {
                    collection: "t".into(),
                    id: "2".into()
                },
                StoreChange::CollectionReplaced {
                    collection: "t".into()
                },
            ]
        );
    }

    #[test]
    fn export_import_roundtrip() {
        let mut store = LocalStore::new();
        store.put_row("a", "1", row(&[("x", Value::Int(1))]));
        store.put_row("b", "k", row(&[("y", "z".into())]));

        let exported = store.export_rows();
        let mut other = LocalStore::new();
        other.put_row("stale", "0", Row::new());
        other.import_rows(exported.clone());

        assert_eq!(other.export_rows(), exported);
        assert_eq!(other.row_count(), 2);
        assert!(other.get_collection("stale").is_none());
    }
}
