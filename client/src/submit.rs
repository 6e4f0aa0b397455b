//! Phased submission of pending changes.

use crate::events::SessionEvent;
use crate::session::Session;
use crate::transport::{Request, Transport};
use crudsync_engine::{batch, MutationKind, SubmitErrors, SubmitState};
use futures::future::join_all;
use tracing::{debug, info, warn};

impl<T: Transport> Session<T> {
    /// Send every pending change: creates, then updates, then deletes.
    ///
    /// Requests of one phase go out concurrently, one per collection. A
    /// phase starts only after the previous one has settled, so updates and
    /// deletes already carry server ids for rows created in this call.
    /// Failures are collected per phase and collection; entries that failed
    /// stay pending. An expired session stops the walk after the current
    /// phase; the phases it skips are reported with their pending entries.
    ///
    /// Concurrent calls are serialized; a call that waited finds only what
    /// the previous one left pending.
    pub async fn submit_changes(&self) -> Result<(), SubmitErrors> {
        let _submitting = self.submitting.lock().await;
        if !self.has_pending_changes() {
            debug!("Nothing to submit");
            return Ok(());
        }

        let mut errors = SubmitErrors::default();
        let mut machine = SubmitState::Idle.advance();

        while let Some(phase) = machine.phase() {
            if errors.session_expired {
                debug!(phase = ?phase, "Phase skipped after session expiry");
                errors.record_skipped(phase, &self.state.lock());
            } else {
                self.submit_phase(phase, &mut errors).await;
            }
            machine = machine.advance();
        }

        let result = errors.finish(&self.state.lock());
        match &result {
            Ok(()) => info!("Changes submitted"),
            Err(e) => warn!(error = %e, "Submission incomplete"),
        }
        self.events.emit(SessionEvent::SubmitFinished { ok: result.is_ok() });
        result
    }

    async fn submit_phase(&self, phase: MutationKind, errors: &mut SubmitErrors) {
        let (requests, unkeyed) = {
            let state = self.state.lock();
            let unkeyed = match phase {
                MutationKind::Create => batch::unkeyed_creates(&state),
                _ => Vec::new(),
            };
            (batch::plan(&state, phase), unkeyed)
        };
        for collection in unkeyed {
            warn!(collection = %collection, "Creates held back, no primary key known");
            errors.record(phase, &collection, "no primary key");
        }
        debug!(phase = ?phase, requests = requests.len(), "submit{}s started", phase);
        self.events.emit(SessionEvent::PhaseStarted(phase));
        if requests.is_empty() {
            return;
        }

        let calls: Vec<_> = requests
            .iter()
            .map(|request| self.call(Request::from(request)))
            .collect();
        let responses = join_all(calls).await;

        let mut state = self.state.lock();
        for (request, response) in requests.iter().zip(responses) {
            match response {
                Ok(body) => {
                    let settlement = batch::settle(&mut state, request, &body);
                    if !settlement.is_complete() {
                        warn!(
                            collection = %request.collection,
                            phase = ?phase,
                            rejected = ?settlement.rejected,
                            "Backend rejected entries"
                        );
                        errors.record(
                            phase,
                            &request.collection,
                            format!("rejected: {}", settlement.rejected.join(",")),
                        );
                    }
                }
                Err(e) => {
                    if e.is_auth() {
                        errors.session_expired = true;
                    }
                    warn!(collection = %request.collection, phase = ?phase, error = %e, "Request failed");
                    errors.record(phase, &request.collection, e.to_string());
                }
            }
        }
    }
}
