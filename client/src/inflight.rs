//! Registry of requests currently on the wire.
//!
//! When any request comes back `Unauthorized`, every other registered
//! request is aborted and resolves to [`TransportError::Cancelled`].

use crate::error::TransportError;
use dashmap::DashMap;
use futures::future::{AbortHandle, Abortable, Aborted};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Tracks abort handles of in-flight requests.
#[derive(Debug, Default)]
pub struct InFlight {
    next_id: AtomicU64,
    handles: DashMap<u64, AbortHandle>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and wrap it so it can be aborted.
    ///
    /// Registration happens here, not on first poll, so a request that has
    /// not started yet is still cancelled by an `Unauthorized` sibling.
    pub fn track<'a, F>(&'a self, request: F) -> impl Future<Output = Result<Value, TransportError>> + 'a
    where
        F: Future<Output = Result<Value, TransportError>> + 'a,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, registration) = AbortHandle::new_pair();
        self.handles.insert(id, handle);
        let guard = Registration { inflight: self, id };

        async move {
            let _guard = guard;
            match Abortable::new(request, registration).await {
                Ok(Err(TransportError::Unauthorized)) => {
                    self.abort_all();
                    Err(TransportError::Unauthorized)
                }
                Ok(result) => result,
                Err(Aborted) => Err(TransportError::Cancelled),
            }
        }
    }

    /// Abort every registered request.
    pub fn abort_all(&self) {
        let count = self.handles.len();
        if count > 0 {
            warn!(count, "Aborting in-flight requests");
        }
        for entry in self.handles.iter() {
            entry.value().abort();
        }
    }

    /// Number of registered requests.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Removes a request from the registry once it settles or is dropped.
struct Registration<'a> {
    inflight: &'a InFlight,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.inflight.handles.remove(&self.id).is_some() {
            debug!(request_id = self.id, "Request settled");
        }
    }
}
