use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use shared::{
    domain::RequestId,
    protocol::{
        events, Musician, MusicianAcceptedPayload, MusicianRequest, RequestCancelledPayload,
        RequestErrorPayload, RequestResolvedPayload,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::channel::{EventChannel, ListenerId};

const REQUEST_TAKEN_MESSAGE: &str = "request taken by another musician";
const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Idle,
    Searching,
    Found,
    NotFound,
    Cancelled,
    Error,
}

impl RequestStatus {
    /// Terminal statuses only leave via [`RequestCoordinator::retry`] or a
    /// fresh [`RequestCoordinator::submit`].
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Found | Self::NotFound | Self::Cancelled | Self::Error
        )
    }
}

/// Snapshot of one search session, broadcast to subscribers after every
/// transition.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorState {
    pub status: RequestStatus,
    pub musician: Option<Musician>,
    pub error: Option<String>,
    pub current_request_id: Option<RequestId>,
}

impl CoordinatorState {
    fn idle() -> Self {
        Self {
            status: RequestStatus::Idle,
            musician: None,
            error: None,
            current_request_id: None,
        }
    }

    fn bound_to(request_id: RequestId) -> Self {
        Self {
            status: RequestStatus::Searching,
            musician: None,
            error: None,
            current_request_id: Some(request_id),
        }
    }
}

/// Optional hooks invoked synchronously at the corresponding transition.
#[derive(Default)]
pub struct Callbacks {
    pub on_found: Option<Box<dyn Fn(&Musician) + Send + Sync>>,
    pub on_not_found: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_cancel: Option<Box<dyn Fn() + Send + Sync>>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Name of the transport-level error event. The name is an external
    /// contract and differs between deployments.
    pub error_event: String,
    /// Correlation id of a search already in flight when the coordinator is
    /// created, e.g. restored when a hosting screen remounts. The session
    /// starts in `Searching` and honors events for that id.
    pub bound_request_id: Option<RequestId>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            error_event: events::REQUEST_ERROR.to_string(),
            bound_request_id: None,
        }
    }
}

/// Owns the lifecycle of one outstanding musician-search request: emits the
/// request over the shared channel, routes inbound events correlated to it,
/// and resolves the session to a terminal status.
///
/// All transitions are synchronous; inbound fault conditions are absorbed
/// into the state (`status` + `error`), never surfaced as Rust errors.
pub struct RequestCoordinator {
    channel: Arc<dyn EventChannel>,
    inner: Mutex<CoordinatorState>,
    listeners: Mutex<Vec<(String, ListenerId)>>,
    callbacks: Callbacks,
    error_event: String,
    updates: broadcast::Sender<CoordinatorState>,
}

impl RequestCoordinator {
    pub fn new(channel: Arc<dyn EventChannel>) -> Arc<Self> {
        Self::new_with_options(channel, Callbacks::default(), CoordinatorOptions::default())
    }

    pub fn new_with_callbacks(channel: Arc<dyn EventChannel>, callbacks: Callbacks) -> Arc<Self> {
        Self::new_with_options(channel, callbacks, CoordinatorOptions::default())
    }

    pub fn new_with_options(
        channel: Arc<dyn EventChannel>,
        callbacks: Callbacks,
        options: CoordinatorOptions,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(64);
        let state = match options.bound_request_id {
            Some(request_id) => CoordinatorState::bound_to(request_id),
            None => CoordinatorState::idle(),
        };
        Arc::new(Self {
            channel,
            inner: Mutex::new(state),
            listeners: Mutex::new(Vec::new()),
            callbacks,
            error_event: options.error_event,
            updates,
        })
    }

    /// Subscribe the four inbound event names. Idempotent; pair with
    /// [`Self::dispose`] so repeated mount/unmount cycles of a hosting view
    /// do not leak listeners on the shared channel.
    pub fn activate(self: &Arc<Self>) {
        let mut listeners = self.lock_listeners();
        if !listeners.is_empty() {
            return;
        }
        self.listen(
            &mut listeners,
            events::MUSICIAN_ACCEPTED,
            Self::handle_musician_accepted,
        );
        self.listen(
            &mut listeners,
            events::MUSICIAN_NOT_FOUND,
            Self::handle_musician_not_found,
        );
        self.listen(
            &mut listeners,
            events::MUSICIAN_REQUEST_TAKEN,
            Self::handle_request_taken,
        );
        let error_event = self.error_event.clone();
        self.listen(&mut listeners, &error_event, Self::handle_transport_error);
    }

    /// Release every listener registered by [`Self::activate`]. Idempotent;
    /// also runs on drop.
    pub fn dispose(&self) {
        let mut listeners = self.lock_listeners();
        for (event, listener) in listeners.drain(..) {
            self.channel.off(&event, listener);
        }
    }

    /// Start a search. Always allowed: submitting while another request is in
    /// flight supersedes its correlation id, so further events for the old
    /// request are ignored. Emits exactly one `new_event_request`.
    pub fn submit(&self, request: &MusicianRequest) {
        let snapshot = {
            let mut state = self.lock_state();
            state.status = RequestStatus::Searching;
            state.musician = None;
            state.error = None;
            state.current_request_id = Some(request.id.clone());
            state.clone()
        };
        info!(request_id = %request.id, instrument = %request.instrument, "submitting musician request");
        match serde_json::to_value(request) {
            Ok(payload) => self.channel.emit(events::NEW_EVENT_REQUEST, payload),
            Err(err) => warn!(request_id = %request.id, "failed to encode musician request: {err}"),
        }
        self.publish(snapshot);
    }

    /// Abandon the in-flight search: emits one `request_cancelled` and moves
    /// to `Cancelled`. A deliberate no-op when nothing is being searched, so
    /// repeated calls are safe. Best-effort only; the server may still
    /// process the request, and any late event for it is ignored.
    pub fn cancel(&self) {
        let cancelled = {
            let mut state = self.lock_state();
            if state.status != RequestStatus::Searching {
                None
            } else {
                state.current_request_id.take().map(|request_id| {
                    state.status = RequestStatus::Cancelled;
                    state.musician = None;
                    state.error = None;
                    (request_id, state.clone())
                })
            }
        };
        let Some((request_id, snapshot)) = cancelled else {
            debug!("cancel requested with no in-flight search");
            return;
        };
        info!(request_id = %request_id, "cancelling musician request");
        match serde_json::to_value(RequestCancelledPayload { request_id }) {
            Ok(payload) => self.channel.emit(events::REQUEST_CANCELLED, payload),
            Err(err) => warn!("failed to encode cancellation: {err}"),
        }
        if let Some(on_cancel) = &self.callbacks.on_cancel {
            on_cancel();
        }
        self.publish(snapshot);
    }

    /// Pure local reset back to `Idle`; no emission. The tracked request id
    /// is left as-is — restarting the search takes a fresh [`Self::submit`].
    pub fn retry(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            state.status = RequestStatus::Idle;
            state.musician = None;
            state.error = None;
            state.clone()
        };
        debug!("resetting musician search for retry");
        self.publish(snapshot);
    }

    pub fn state(&self) -> CoordinatorState {
        self.lock_state().clone()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<CoordinatorState> {
        self.updates.subscribe()
    }

    fn listen<F>(
        self: &Arc<Self>,
        listeners: &mut Vec<(String, ListenerId)>,
        event: &str,
        handle: F,
    ) where
        F: Fn(&RequestCoordinator, Value) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        let listener = self.channel.on(
            event,
            Arc::new(move |payload| {
                if let Some(coordinator) = weak.upgrade() {
                    handle(coordinator.as_ref(), payload);
                }
            }),
        );
        listeners.push((event.to_string(), listener));
    }

    fn handle_musician_accepted(&self, payload: Value) {
        let Ok(payload) = serde_json::from_value::<MusicianAcceptedPayload>(payload) else {
            debug!("dropping malformed musician_accepted payload");
            return;
        };
        let snapshot = {
            let mut state = self.lock_state();
            if !is_current(&state, &payload.request_id) {
                debug!(request_id = %payload.request_id, "ignoring acceptance for superseded request");
                return;
            }
            state.status = RequestStatus::Found;
            state.musician = Some(payload.musician.clone());
            state.error = None;
            state.clone()
        };
        info!(
            request_id = %payload.request_id,
            musician_id = %payload.musician.id,
            "musician accepted request"
        );
        if let Some(on_found) = &self.callbacks.on_found {
            on_found(&payload.musician);
        }
        self.publish(snapshot);
    }

    fn handle_musician_not_found(&self, payload: Value) {
        self.resolve_unmatched(payload, None);
    }

    fn handle_request_taken(&self, payload: Value) {
        self.resolve_unmatched(payload, Some(REQUEST_TAKEN_MESSAGE));
    }

    // `musician_not_found` and `musician_request_taken` land in the same
    // status; only the taken variant carries an error string so callers can
    // tell a lost race from an exhausted search.
    fn resolve_unmatched(&self, payload: Value, error: Option<&'static str>) {
        let Ok(payload) = serde_json::from_value::<RequestResolvedPayload>(payload) else {
            debug!("dropping malformed request resolution payload");
            return;
        };
        let snapshot = {
            let mut state = self.lock_state();
            if !is_current(&state, &payload.request_id) {
                debug!(request_id = %payload.request_id, "ignoring resolution for superseded request");
                return;
            }
            state.status = RequestStatus::NotFound;
            state.musician = None;
            state.error = error.map(str::to_string);
            state.clone()
        };
        info!(
            request_id = %payload.request_id,
            taken = error.is_some(),
            "musician search resolved without a match"
        );
        if let Some(on_not_found) = &self.callbacks.on_not_found {
            on_not_found();
        }
        self.publish(snapshot);
    }

    // Not filtered by correlation id: a transport failure concerns whatever
    // search is active. Ignored outside `Searching`.
    fn handle_transport_error(&self, payload: Value) {
        let message = serde_json::from_value::<RequestErrorPayload>(payload)
            .ok()
            .and_then(|payload| payload.message)
            .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string());
        let snapshot = {
            let mut state = self.lock_state();
            if state.status != RequestStatus::Searching {
                debug!("ignoring transport error outside an active search");
                return;
            }
            state.status = RequestStatus::Error;
            state.musician = None;
            state.error = Some(message.clone());
            state.clone()
        };
        warn!("musician search failed: {message}");
        self.publish(snapshot);
    }

    fn publish(&self, snapshot: CoordinatorState) {
        let _ = self.updates.send(snapshot);
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(String, ListenerId)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RequestCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

// Events are honored only while searching: correlation-id filtering alone is
// not enough once a session has been cancelled, since the id may still match.
fn is_current(state: &CoordinatorState, request_id: &RequestId) -> bool {
    state.status == RequestStatus::Searching
        && state.current_request_id.as_ref() == Some(request_id)
}
