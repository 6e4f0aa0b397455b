//! The seam between the session and the backend.

use crate::error::TransportError;
use async_trait::async_trait;
use crudsync_engine::{BatchRequest, Method};
use serde_json::Value;

/// A backend request, relative to the service root.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// `""` for the metadata document, `coll` or `coll/ids` otherwise
    pub path: String,
    /// Extra query string appended after the service parameters
    pub query: String,
    pub body: Option<Value>,
}

impl Request {
    pub fn get(path: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: query.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: String::new(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            query: String::new(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            query: String::new(),
            body: None,
        }
    }

    /// The collection segment of the path, empty for the metadata call.
    pub fn collection(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }
}

impl From<&BatchRequest> for Request {
    fn from(batch: &BatchRequest) -> Self {
        Self {
            method: batch.method(),
            path: batch.path(),
            query: String::new(),
            body: batch.body.clone(),
        }
    }
}

/// Sends requests to a CRUD backend.
///
/// Implementations report a 401 as [`TransportError::Unauthorized`]; the
/// session relies on it to cancel sibling requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the decoded JSON body.
    async fn send(&self, request: Request) -> Result<Value, TransportError>;

    /// Open a backend session.
    async fn login(&self, user: &str, password: &str) -> Result<(), TransportError>;

    /// Close the backend session.
    async fn logout(&self) -> Result<(), TransportError>;
}
