//! Request-scoped observability event.
//!
//! The logging middleware creates an [`Event`] per request and stores it in
//! the request extensions. Middleware further down the chain record
//! counters (`"timeout"`, `"panic"`) and errors on it, and the logging
//! middleware emits everything in a single line once the response is ready.
//!
//! Handlers can read it with `Extension<Event>`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::http::Request;

#[derive(Debug, Default)]
struct EventState {
    counters: BTreeMap<String, i64>,
    errors: Vec<String>,
    request_id: Option<String>,
}

/// Cheap-to-clone handle on the event of one request.
///
/// The handle crosses into the task spawned by the timeout middleware,
/// hence the mutex; it is never shared between requests.
#[derive(Clone)]
pub struct Event {
    state: Arc<Mutex<EventState>>,
    started: Instant,
}

impl Event {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EventState::default())),
            started: Instant::now(),
        }
    }

    /// Event already attached to the request, if any.
    pub fn from_request<B>(req: &Request<B>) -> Option<Self> {
        req.extensions().get::<Self>().cloned()
    }

    /// Event attached to the request, attaching a new one when missing.
    pub fn get_or_insert<B>(req: &mut Request<B>) -> Self {
        if let Some(event) = Self::from_request(req) {
            return event;
        }
        let event = Self::new();
        req.extensions_mut().insert(event.clone());
        event
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        // A panicking handler must not make the event unusable for the
        // middleware reporting that panic.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_counter(&self, name: &str, value: i64) {
        self.lock().counters.insert(name.to_string(), value);
    }

    pub fn inc_counter(&self, name: &str, delta: i64) {
        *self.lock().counters.entry(name.to_string()).or_insert(0) += delta;
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.lock().counters.get(name).copied()
    }

    pub fn counters(&self) -> BTreeMap<String, i64> {
        self.lock().counters.clone()
    }

    pub fn add_err(&self, err: impl fmt::Display) {
        self.lock().errors.push(err.to_string());
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    pub fn set_request_id(&self, id: impl Into<String>) {
        self.lock().request_id = Some(id.into());
    }

    pub fn request_id(&self) -> Option<String> {
        self.lock().request_id.clone()
    }

    /// Time since the event was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Event")
            .field("counters", &state.counters)
            .field("errors", &state.errors)
            .field("request_id", &state.request_id)
            .finish()
    }
}
