//! Scripted transport shared by the session tests.

#![allow(dead_code)]

use async_trait::async_trait;
use crudsync_client::{Config, Request, Session, SessionEvent, Transport, TransportError};
use crudsync_engine::Method;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};

/// What a scripted route answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    Err(TransportError),
    /// Never answers; only an abort ends the request
    Hang,
}

/// A transport answering from per-route reply queues.
///
/// Routes are keyed by method and path; the query string is recorded but
/// not matched. The last reply of a queue is reused.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<Request>>,
    logins: Mutex<Vec<(String, String)>>,
    login_error: Mutex<Option<TransportError>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: Method, path: &str, reply: Reply) -> Self {
        self.push(method, path, reply);
        self
    }

    pub fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn fail_login(&self, error: TransportError) {
        *self.login_error.lock() = Some(error);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// `METHOD path` of every request, in send order.
    pub fn calls(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    pub fn logins(&self) -> Vec<(String, String)> {
        self.logins.lock().clone()
    }

    fn next_reply(&self, request: &Request) -> Reply {
        let mut routes = self.routes.lock();
        match routes.get_mut(&(request.method, request.path.clone())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Hang),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Hang),
            None => Reply::Err(TransportError::Status {
                status: 404,
                body: format!("no route for {} {}", request.method, request.path),
            }),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        let reply = self.next_reply(&request);
        self.requests.lock().push(request);
        tokio::task::yield_now().await;
        match reply {
            Reply::Ok(value) => Ok(value),
            Reply::Err(error) => Err(error),
            Reply::Hang => futures::future::pending().await,
        }
    }

    async fn login(&self, user: &str, password: &str) -> Result<(), TransportError> {
        self.logins.lock().push((user.to_string(), password.to_string()));
        match self.login_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn logout(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Metadata for `student` (flagged key, date column) and `course`
/// (key from the configured default).
pub fn metadata() -> Value {
    json!({
        "paths": {
            "/student": {
                "post": {"parameters": [{"schema": {"properties": {
                    "id": {"type": "integer", "x-primary-key": true},
                    "name": {"type": "string"},
                    "birthday": {"type": "string", "format": "date"}
                }}}]}
            },
            "/student/{id}": {
                "get": {"responses": {"200": {"schema": {"properties": {
                    "id": {"type": "integer"}
                }}}}}
            },
            "/course": {
                "post": {"parameters": [{"schema": {"properties": {
                    "id": {"type": "integer"},
                    "title": {"type": "string"}
                }}}]}
            }
        }
    })
}

pub fn config(use_batch: bool) -> Config {
    Config::new("http://backend.test/api.php")
        .expect("valid url")
        .with_batch(use_batch)
}

/// A session with metadata already loaded and temp ids starting at 1000.
pub async fn session(use_batch: bool, transport: MockTransport) -> Session<MockTransport> {
    session_with(config(use_batch), transport).await
}

pub async fn session_with(config: Config, transport: MockTransport) -> Session<MockTransport> {
    let transport = transport.on(Method::Get, "", Reply::Ok(metadata()));
    let session = Session::new(config, transport).with_temp_id_seed(1000);
    session.load_metadata().await.expect("metadata loads");
    session.transport().clear_requests();
    session
}

/// A collection read response in the backend's columnar format.
pub fn list(collection: &str, columns: &[&str], records: Value) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(
        collection.to_string(),
        json!({"columns": columns, "records": records}),
    );
    Value::Object(body)
}

/// Every event received so far.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
