//! Error types for the client.

use crate::config::ConfigError;
use crudsync_engine::Method;
use thiserror::Error;

/// Failure of a single backend request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend answered 401; the session is no longer valid.
    #[error("Unauthorized")]
    Unauthorized,

    /// The request was aborted because another request hit `Unauthorized`.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether this failure means the session has expired.
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Unauthorized | TransportError::Cancelled)
    }
}

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Engine error: {0}")]
    Engine(#[from] crudsync_engine::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Binding is read-only")]
    ReadOnly,

    #[error("Backend rejected {method} {path}")]
    Rejected { method: Method, path: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
