//! Error types for the crudsync engine.

use crate::{CollectionName, RecordId};
use thiserror::Error;

/// All possible errors from the crudsync engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Path errors
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("path does not address a row: {0}")]
    MissingId(String),

    // Schema errors
    #[error("no primary key known for collection: {0}")]
    UnknownPrimaryKey(CollectionName),

    #[error("invalid metadata document: {0}")]
    InvalidMetadata(String),

    // Validation errors
    #[error("empty payload for {0}")]
    EmptyPayload(String),

    #[error("row {id} in {collection} is pending deletion")]
    PendingDelete {
        collection: CollectionName,
        id: RecordId,
    },

    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
