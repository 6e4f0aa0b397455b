//! The client session: schema, cached rows and pending changes bound to one
//! backend.
//!
//! All local state lives behind a single mutex. The lock is taken to plan or
//! apply work and released before any request is awaited.

use crate::config::{BindingMode, Config};
use crate::error::{ClientError, Result, TransportError};
use crate::events::{EventBus, SessionEvent};
use crate::inflight::InFlight;
use crate::transport::{Request, Transport};
use crudsync_engine::coerce::{canonicalize_row, materialize_defaults, row_to_wire};
use crudsync_engine::{
    batch, filter, list, path, CollectionName, EntityRef, Entry, Filter, Method, Predicate,
    RecordId, Recorded, Row, SchemaRegistry, SessionSnapshot, StoreObserver, SyncState, TempId,
    Value,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Result of a backend read.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// Collection read, in response order
    Rows(Vec<(RecordId, Row)>),
    /// Single-row read
    Row(Option<Row>),
}

impl Fetched {
    pub fn len(&self) -> usize {
        match self {
            Fetched::Rows(rows) => rows.len(),
            Fetched::Row(row) => usize::from(row.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An owned copy of whatever a path points at in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached {
    Collection(Vec<(RecordId, Row)>),
    Row(Row),
    Field(Value),
}

/// A remembered read, re-run on reload and after login.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Binding {
    pub(crate) target: EntityRef,
    pub(crate) filters: Vec<Filter>,
}

/// A sync session against one CRUD backend.
pub struct Session<T: Transport> {
    pub(crate) config: Config,
    pub(crate) transport: T,
    pub(crate) state: Mutex<SyncState>,
    pub(crate) bindings: Mutex<Vec<Binding>>,
    pub(crate) inflight: InFlight,
    pub(crate) events: EventBus,
    /// Held for the whole of `submit_changes`
    pub(crate) submitting: tokio::sync::Mutex<()>,
    metadata_retry: AtomicBool,
}

impl<T: Transport> Session<T> {
    /// Create a session. Temp ids are seeded from the wall clock.
    pub fn new(config: Config, transport: T) -> Self {
        let seed = chrono::Utc::now().timestamp_millis().max(1) as TempId;
        Self {
            config,
            transport,
            state: Mutex::new(SyncState::new(seed)),
            bindings: Mutex::new(Vec::new()),
            inflight: InFlight::new(),
            events: EventBus::default(),
            submitting: tokio::sync::Mutex::new(()),
            metadata_retry: AtomicBool::new(false),
        }
    }

    /// Restart temp ids at `seed`. Only meaningful before anything is staged.
    pub fn with_temp_id_seed(self, seed: TempId) -> Self {
        {
            let mut state = self.state.lock();
            let registry = std::mem::take(&mut state.registry);
            *state = SyncState::new(seed);
            state.replace_registry(registry);
        }
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Log in when credentials are configured, then load the metadata.
    pub async fn connect(&self) -> Result<Vec<CollectionName>> {
        if let (Some(user), Some(password)) = (&self.config.user, &self.config.password) {
            self.login(user, password).await?;
        }
        self.load_metadata().await
    }

    /// Fetch the metadata document and replace the schema with it.
    ///
    /// An unauthorized failure is retried after the next successful login.
    pub async fn load_metadata(&self) -> Result<Vec<CollectionName>> {
        let document = match self.call(Request::get("", "")).await {
            Ok(document) => document,
            Err(e) => {
                if e.is_auth() {
                    self.metadata_retry.store(true, Ordering::SeqCst);
                    info!("Metadata load deferred until login");
                }
                self.events.emit(SessionEvent::MetadataFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let fallback = Some(self.config.primary_key.as_str());
        let registry = match SchemaRegistry::ingest(&document, fallback) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "Invalid metadata document");
                self.events.emit(SessionEvent::MetadataFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if !registry.dropped().is_empty() {
            warn!(dropped = ?registry.dropped(), "Collections without primary key ignored");
        }
        let collections: Vec<CollectionName> =
            registry.collections().into_iter().map(str::to_string).collect();
        self.state.lock().replace_registry(registry);

        info!(count = collections.len(), "Metadata loaded");
        self.events.emit(SessionEvent::MetadataLoaded {
            collections: collections.clone(),
        });
        Ok(collections)
    }

    /// Send a request through the in-flight registry.
    ///
    /// Not `async` so the request is registered as soon as it is built, even
    /// if it is polled later alongside its siblings.
    pub(crate) fn call(
        &self,
        request: Request,
    ) -> impl Future<Output = std::result::Result<serde_json::Value, TransportError>> + '_ {
        let collection = request.collection().to_string();
        let method = request.method;
        let tracked = self.inflight.track(self.transport.send(request));

        async move {
            let result = tracked.await;
            self.events.emit(SessionEvent::RequestCompleted {
                collection,
                method,
                success: result.is_ok(),
            });
            if matches!(result, Err(TransportError::Unauthorized)) {
                warn!("Session expired");
                self.events.emit(SessionEvent::SessionExpired);
                self.events.emit(SessionEvent::Logout);
            }
            result
        }
    }

    fn primary_key(&self, state: &SyncState, collection: &str) -> String {
        state
            .registry
            .primary_key(collection)
            .unwrap_or(self.config.primary_key.as_str())
            .to_string()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read from the backend without touching the cache.
    pub async fn read(&self, path: &str, filters: &[Filter]) -> Result<Fetched> {
        self.fetch(&path::parse(path), filters).await
    }

    async fn fetch(&self, target: &EntityRef, filters: &[Filter]) -> Result<Fetched> {
        let collection = target.require_collection()?.to_string();
        let query = filter::compile(filters)?;
        let request_path = match &target.id {
            Some(id) => format!("{}/{}", collection, id),
            None => collection.clone(),
        };

        let response = self.call(Request::get(request_path, query)).await?;

        let state = self.state.lock();
        Ok(match target.id {
            Some(_) => Fetched::Row(list::decode_row(&state.registry, &collection, &response)),
            None => Fetched::Rows(list::decode_list(
                &state.registry,
                &collection,
                &self.config.primary_key,
                &response,
            )),
        })
    }

    fn merge_fetched(&self, target: &EntityRef, fetched: Fetched, prefer_local: bool) -> usize {
        let count = fetched.len();
        let rows = match fetched {
            Fetched::Rows(rows) => rows,
            Fetched::Row(Some(row)) => match &target.id {
                Some(id) => vec![(id.clone(), row)],
                None => Vec::new(),
            },
            Fetched::Row(None) => Vec::new(),
        };
        self.state
            .lock()
            .store
            .merge_collection(&target.collection, rows, prefer_local);
        count
    }

    /// Read and merge into the cache, keeping local values, and remember the
    /// read for [`Session::reload`].
    pub async fn load(&self, path: &str, filters: Vec<Filter>) -> Result<usize> {
        let binding = Binding {
            target: path::parse(path),
            filters,
        };
        binding.target.require_collection()?;
        {
            let mut bindings = self.bindings.lock();
            if !bindings.contains(&binding) {
                bindings.push(binding.clone());
            }
        }
        self.run_binding(&binding, true).await
    }

    async fn run_binding(&self, binding: &Binding, prefer_local: bool) -> Result<usize> {
        let fetched = self.fetch(&binding.target, &binding.filters).await?;
        let count = self.merge_fetched(&binding.target, fetched, prefer_local);
        debug!(collection = %binding.target.collection, rows = count, "Binding loaded");
        Ok(count)
    }

    /// Make sure a row is cached, fetching it by primary key if it is not.
    pub async fn ensure_row(&self, path: &str) -> Result<Option<Row>> {
        let target = path::parse(path);
        let collection = target.require_collection()?.to_string();
        let id = target.require_id()?.to_string();

        let primary_key = {
            let state = self.state.lock();
            if let Some(row) = state.store.get_row(&collection, &id) {
                return Ok(Some(row.clone()));
            }
            self.primary_key(&state, &collection)
        };

        let lookup = EntityRef::collection(collection.clone());
        let filters: [Filter; 1] = [Predicate::equals(primary_key, Value::from_id(&id)).into()];
        let fetched = self.fetch(&lookup, &filters).await?;
        self.merge_fetched(&lookup, fetched, true);

        Ok(self.state.lock().store.get_row(&collection, &id).cloned())
    }

    /// Owned copy of the cached collection, row or field at `path`.
    pub fn get(&self, path: &str) -> Option<Cached> {
        let state = self.state.lock();
        match state.store.lookup(&path::parse(path))? {
            Entry::Collection(c) => Some(Cached::Collection(
                c.rows().map(|(id, row)| (id.clone(), row.clone())).collect(),
            )),
            Entry::Row(row) => Some(Cached::Row(row.clone())),
            Entry::Field(value) => Some(Cached::Field(value.clone())),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a row. Returns the temp id in batch mode, the server id otherwise.
    pub async fn create(&self, path: &str, payload: Row) -> Result<RecordId> {
        let target = path::parse(path);
        if self.config.use_batch {
            return Ok(self.stage_create(&target, payload)?.to_string());
        }

        let collection = target.require_collection()?.to_string();
        if payload.is_empty() {
            return Err(crudsync_engine::Error::EmptyPayload(target.raw_path.clone()).into());
        }
        let (primary_key, mut row, body) = {
            let state = self.state.lock();
            let primary_key = self.primary_key(&state, &collection);
            let mut row = materialize_defaults(&state.registry, &collection, &payload);
            row.remove(&primary_key);
            let body = row_to_wire(&state.registry, &collection, &row);
            (primary_key, row, body)
        };

        let response = self.call(Request::post(collection.clone(), body)).await?;
        let id = Value::from_json(response.clone())
            .as_id()
            .ok_or_else(|| ClientError::UnexpectedResponse(format!("create returned {}", response)))?;

        row.insert(primary_key, Value::from_id(&id));
        self.state.lock().store.put_row(&collection, &id, row);
        info!(collection = %collection, id = %id, "Row created");
        Ok(id)
    }

    /// Stage a create regardless of the batch setting.
    pub fn create_entry(&self, path: &str, payload: Row) -> Result<TempId> {
        self.stage_create(&path::parse(path), payload)
    }

    fn stage_create(&self, target: &EntityRef, payload: Row) -> Result<TempId> {
        let temp_id = self.state.lock().stage_create(target, payload)?;
        debug!(collection = %target.collection, temp_id, "Create staged");
        Ok(temp_id)
    }

    /// Update fields of a row.
    pub async fn update(&self, path: &str, partial: Row) -> Result<()> {
        let target = path::parse(path);
        if self.config.use_batch {
            self.state.lock().stage_update(&target, partial)?;
            return Ok(());
        }

        let collection = target.require_collection()?.to_string();
        let id = target.require_id()?.to_string();
        if partial.is_empty() {
            return Err(crudsync_engine::Error::EmptyPayload(target.raw_path.clone()).into());
        }
        let (fields, body) = {
            let state = self.state.lock();
            let mut fields = canonicalize_row(&state.registry, &collection, partial);
            fields.remove(&self.primary_key(&state, &collection));
            let body = row_to_wire(&state.registry, &collection, &fields);
            (fields, body)
        };

        let request_path = format!("{}/{}", collection, id);
        let response = self.call(Request::put(request_path.clone(), body)).await?;
        if !batch::is_success(&response) {
            warn!(collection = %collection, id = %id, response = %response, "Update rejected");
            return Err(ClientError::Rejected {
                method: Method::Put,
                path: request_path,
            });
        }

        let mut state = self.state.lock();
        if state.store.contains(&collection, &id) {
            state.store.merge_row(&collection, &id, fields);
        }
        Ok(())
    }

    /// Delete a row.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let target = path::parse(path);
        if self.config.use_batch {
            self.state.lock().stage_delete(&target)?;
            return Ok(());
        }

        let collection = target.require_collection()?.to_string();
        let id = target.require_id()?.to_string();

        let request_path = format!("{}/{}", collection, id);
        let response = self.call(Request::delete(request_path.clone())).await?;
        if is_rejection(&response) {
            warn!(collection = %collection, id = %id, "Delete rejected");
            return Err(ClientError::Rejected {
                method: Method::Delete,
                path: request_path,
            });
        }

        self.state.lock().store.remove_row(&collection, &id);
        Ok(())
    }

    /// Write a row or field through the binding, staging it as an update.
    pub fn set(&self, path: &str, value: Value) -> Result<Recorded> {
        if self.config.binding_mode == BindingMode::OneWay {
            return Err(ClientError::ReadOnly);
        }
        Ok(self.state.lock().set(&path::parse(path), value)?)
    }

    // ========================================================================
    // Reload, reset and authentication
    // ========================================================================

    /// Re-run remembered reads, optionally only those of one collection.
    ///
    /// Every binding is attempted; the first failure is returned.
    pub async fn reload(&self, collection: Option<&str>) -> Result<()> {
        self.events.emit(SessionEvent::Reload {
            collection: collection.map(str::to_string),
        });
        self.rerun_bindings(collection, true).await
    }

    async fn rerun_bindings(&self, collection: Option<&str>, prefer_local: bool) -> Result<()> {
        let bindings: Vec<Binding> = self
            .bindings
            .lock()
            .iter()
            .filter(|b| collection.map_or(true, |c| b.target.collection == c))
            .cloned()
            .collect();

        let mut first_error = None;
        for binding in &bindings {
            if let Err(e) = self.run_binding(binding, prefer_local).await {
                warn!(collection = %binding.target.collection, error = %e, "Reload failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drop every pending change and re-read bindings with server values
    /// taking precedence.
    pub async fn reset_changes(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            let collections: Vec<CollectionName> = state.log.creates().keys().cloned().collect();
            for collection in collections {
                for id in state.unsent_ids(&collection) {
                    state.store.remove_row(&collection, &id);
                }
            }
            state.log.clear(None);
        }
        info!("Pending changes discarded");
        self.events.emit(SessionEvent::Reload { collection: None });
        self.rerun_bindings(None, false).await
    }

    /// Open a backend session, then retry deferred metadata and re-run
    /// bindings.
    pub async fn login(&self, user: &str, password: &str) -> Result<()> {
        self.transport.login(user, password).await?;
        self.events.emit(SessionEvent::Login);

        if self.metadata_retry.swap(false, Ordering::SeqCst) {
            self.load_metadata().await?;
        }
        self.rerun_bindings(None, true).await
    }

    /// Close the backend session. `Logout` is emitted even if the call fails.
    pub async fn logout(&self) -> Result<()> {
        let result = self.transport.logout().await;
        self.events.emit(SessionEvent::Logout);
        Ok(result?)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn has_pending_changes(&self) -> bool {
        self.state.lock().log.has_pending_changes()
    }

    /// Number of staged entries across all buckets.
    pub fn pending_count(&self) -> usize {
        self.state.lock().log.pending_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Register an observer for row-level cache changes.
    pub fn observe(&self, observer: Arc<dyn StoreObserver>) {
        self.state.lock().store.subscribe(observer);
    }

    /// Collections known from the metadata.
    pub fn collections(&self) -> Vec<CollectionName> {
        self.state
            .lock()
            .registry
            .collections()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Number of requests currently on the wire.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().snapshot()
    }

    pub fn restore(&self, snapshot: SessionSnapshot) -> Result<()> {
        Ok(self.state.lock().restore(snapshot)?)
    }
}

/// A direct delete fails only on an explicit zero or false.
fn is_rejection(response: &serde_json::Value) -> bool {
    match response {
        serde_json::Value::Bool(b) => !b,
        serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
        serde_json::Value::String(s) => s.trim() == "0",
        _ => false,
    }
}
