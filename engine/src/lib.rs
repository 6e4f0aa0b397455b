//! # CrudSync Engine
//!
//! The pure core of an optimistic-write cache for REST-style CRUD backends.
//!
//! Callers mutate locally cached rows immediately. Mutations accumulate in a
//! pending-change log and are later submitted to the server in a fixed order
//! (creates, then updates, then deletes), with client-generated temp ids
//! remapped to the ids the server assigns.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine plans requests and applies responses; sending
//!   them is the caller's job (see the `crudsync-client` crate)
//! - **Deterministic**: temp ids come from an injected seed, maps iterate in
//!   key order
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Paths
//!
//! [`path::parse`] turns `/student/1`, `/student(1)`, `/student('1')` and
//! `/student("1")` into the same [`EntityRef`].
//!
//! ### Schema
//!
//! The [`SchemaRegistry`] is built from the backend's metadata document and
//! knows each collection's primary key and column types. [`coerce`] uses it
//! to convert date columns between wire strings and real date values.
//!
//! ### Pending changes
//!
//! The [`MutationLog`] holds creates, updates and deletes per collection.
//! Its merge rules keep a row in at most one bucket: updates fold into
//! pending creates, deletes cancel pending creates, and updates to rows
//! pending deletion are rejected.
//!
//! ### Submission
//!
//! [`batch::plan`] builds one request per collection for a phase and
//! [`batch::settle`] applies the server's answer to the [`LocalStore`] and
//! the log.
//!
//! ## Quick Start
//!
//! ```rust
//! use crudsync_engine::{
//!     batch, path, ColumnSchema, ColumnType, MutationKind, Row, SchemaRegistry,
//!     SyncState, TableSchema, Value,
//! };
//! use serde_json::json;
//!
//! // 1. Describe the schema
//! let registry = SchemaRegistry::new().with_table(
//!     "student",
//!     TableSchema::new("id", vec![ColumnSchema::new("name", ColumnType::String)]),
//! );
//!
//! // 2. Stage a create
//! let mut state = SyncState::new(1000);
//! state.replace_registry(registry);
//! let payload = Row::from([("name".to_string(), Value::from("Ann"))]);
//! let temp_id = state.stage_create(&path::parse("/student"), payload).unwrap();
//! assert_eq!(temp_id, 1000);
//!
//! // 3. Plan the create phase and apply the server's answer
//! let request = batch::plan(&state, MutationKind::Create).remove(0);
//! assert_eq!(request.path(), "student");
//! batch::settle(&mut state, &request, &json!([42]));
//!
//! assert!(state.store.contains("student", "42"));
//! assert!(!state.log.has_pending_changes());
//! ```
//!
//! ## Persistence
//!
//! Use [`SyncState::snapshot`] and [`SyncState::restore`] with
//! [`SessionSnapshot`] to keep unsent changes across restarts.

pub mod batch;
pub mod coerce;
pub mod error;
pub mod filter;
pub mod list;
pub mod mutation;
pub mod path;
pub mod schema;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod value;

// Re-export main types at crate root
pub use batch::{
    BatchRequest, Method, PendingEntries, PhaseFailure, Settlement, SubmitErrors, SubmitState,
};
pub use error::Error;
pub use filter::{Combinator, Filter, Operator, Predicate};
pub use mutation::{CreateAck, Mutation, MutationKind, MutationLog, Recorded};
pub use path::EntityRef;
pub use schema::{ColumnSchema, ColumnType, SchemaRegistry, TableSchema};
pub use snapshot::{SessionSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};
pub use state::SyncState;
pub use store::{Collection, Entry, LocalStore, StoreChange, StoreObserver};
pub use value::{Row, Value};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type TempId = u64;
