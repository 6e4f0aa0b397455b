//! Schema registry built from the backend's metadata document.
//!
//! The registry knows, per collection, which column is the primary key and
//! the semantic type of every column. It is built once by [`SchemaRegistry::ingest`]
//! and never patched afterwards: a re-fetch produces a new registry that
//! replaces the old one wholesale.

use crate::{error::Result, path, CollectionName, Error};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Property flag marking the primary-key column in the metadata document.
pub const PRIMARY_KEY_MARKER: &str = "x-primary-key";

/// Semantic column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Date,
    DateTime,
    Timestamp,
}

impl ColumnType {
    /// True for the date-like types that need coercion.
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::DateTime | ColumnType::Timestamp
        )
    }

    /// Classify a metadata property object.
    ///
    /// `format` takes precedence over `type`.
    pub fn from_property(property: &serde_json::Value) -> Self {
        let format = property.get("format").and_then(|f| f.as_str());
        match format {
            Some("date") => return ColumnType::Date,
            Some("date-time") | Some("datetime") => return ColumnType::DateTime,
            Some("timestamp") => return ColumnType::Timestamp,
            _ => {}
        }
        match property.get("type").and_then(|t| t.as_str()) {
            Some("integer") | Some("int") | Some("number") => ColumnType::Int,
            _ => ColumnType::String,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::String => write!(f, "string"),
            ColumnType::Int => write!(f, "int"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::DateTime => write!(f, "datetime"),
            ColumnType::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// Definition of a column in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Schema for a single collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Name of the primary-key column
    pub primary_key: String,
    /// All known columns, primary key included
    pub columns: BTreeMap<String, ColumnSchema>,
}

impl TableSchema {
    /// Create a table schema. The primary key is added as an int column if
    /// `columns` does not list it.
    pub fn new(primary_key: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        let primary_key = primary_key.into();
        let mut map: BTreeMap<_, _> = columns.into_iter().map(|c| (c.name.clone(), c)).collect();
        map.entry(primary_key.clone())
            .or_insert_with(|| ColumnSchema::new(primary_key.clone(), ColumnType::Int));
        Self {
            primary_key,
            columns: map,
        }
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).map(|c| c.column_type)
    }

    /// Columns other than the primary key, in name order.
    pub fn data_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns
            .values()
            .filter(move |c| c.name != self.primary_key)
    }
}

/// Per-collection schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRegistry {
    tables: HashMap<CollectionName, TableSchema>,
    /// Collections seen in metadata but dropped for lack of a primary key
    #[serde(default)]
    dropped: Vec<CollectionName>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, collection: impl Into<CollectionName>, table: TableSchema) -> Self {
        self.tables.insert(collection.into(), table);
        self
    }

    /// Build a registry from a metadata document.
    ///
    /// Every collection-level route with a create operation contributes the
    /// properties of its create parameter schema and of its read response
    /// schema (the latter override column types and may supply the
    /// primary-key flag). Routes without a create operation are skipped. When no property
    /// carries [`PRIMARY_KEY_MARKER`], `fallback_primary_key` is used if the
    /// collection has a column of that name. Collections whose primary key
    /// stays unknown are dropped and listed in [`SchemaRegistry::dropped`].
    pub fn ingest(document: &serde_json::Value, fallback_primary_key: Option<&str>) -> Result<Self> {
        let paths = document
            .get("paths")
            .and_then(|p| p.as_object())
            .ok_or_else(|| Error::InvalidMetadata("document has no paths object".into()))?;

        let mut registry = Self::new();

        for (route, item) in paths {
            let entity = path::parse(route);
            if !entity.is_collection() {
                continue;
            }

            let mut columns: BTreeMap<String, ColumnSchema> = BTreeMap::new();
            let mut primary_key: Option<String> = None;

            let create_props = item
                .pointer("/post/parameters/0/schema/properties")
                .and_then(|p| p.as_object());
            let read_props = item
                .pointer("/get/responses/200/schema")
                .and_then(|s| s.get("properties").or_else(|| s.pointer("/items/properties")))
                .and_then(|p| p.as_object());

            // read-only collections cannot take creates
            if create_props.is_none() {
                continue;
            }

            for props in [create_props, read_props].into_iter().flatten() {
                for (name, property) in props {
                    columns.insert(
                        name.clone(),
                        ColumnSchema::new(name.clone(), ColumnType::from_property(property)),
                    );
                    let flagged = property
                        .get(PRIMARY_KEY_MARKER)
                        .and_then(|f| f.as_bool())
                        .unwrap_or(false);
                    if flagged && primary_key.is_none() {
                        primary_key = Some(name.clone());
                    }
                }
            }

            let primary_key = primary_key.or_else(|| {
                fallback_primary_key
                    .filter(|pk| columns.contains_key(*pk))
                    .map(str::to_string)
            });

            match primary_key {
                Some(primary_key) => {
                    registry.tables.insert(
                        entity.collection,
                        TableSchema {
                            primary_key,
                            columns,
                        },
                    );
                }
                None => registry.dropped.push(entity.collection),
            }
        }

        registry.dropped.sort();
        Ok(registry)
    }

    /// Get a table schema by collection name.
    pub fn get(&self, collection: &str) -> Option<&TableSchema> {
        self.tables.get(collection)
    }

    /// Primary-key column of a collection.
    pub fn primary_key(&self, collection: &str) -> Option<&str> {
        self.tables.get(collection).map(|t| t.primary_key.as_str())
    }

    /// Type of a column, if both collection and column are known.
    pub fn column_type(&self, collection: &str, column: &str) -> Option<ColumnType> {
        self.tables.get(collection)?.column_type(column)
    }

    /// Known collection names, sorted.
    pub fn collections(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Collections dropped during ingestion because no primary key was found.
    pub fn dropped(&self) -> &[CollectionName] {
        &self.dropped
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
