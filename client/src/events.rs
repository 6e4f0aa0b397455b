//! Session lifecycle events.

use crudsync_engine::{CollectionName, Method, MutationKind};
use tokio::sync::broadcast;
use tracing::debug;

/// Events emitted by a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The metadata document was loaded and the schema replaced
    MetadataLoaded { collections: Vec<CollectionName> },
    MetadataFailed { reason: String },
    /// Bindings are about to be re-read; `None` means all of them
    Reload { collection: Option<CollectionName> },
    /// A backend request finished, successfully or not
    RequestCompleted {
        collection: CollectionName,
        method: Method,
        success: bool,
    },
    Login,
    Logout,
    /// A request came back unauthorized and in-flight requests were aborted
    SessionExpired,
    PhaseStarted(MutationKind),
    SubmitFinished { ok: bool },
}

/// Broadcasts session events to any number of subscribers.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: SessionEvent) {
        debug!(event = ?event, "Session event");
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
