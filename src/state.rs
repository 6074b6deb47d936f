//! Shared entry state for axum handlers.
//!
//! Every boot entry owns one [`EntryState`]. It's cloned into the common
//! service handlers and holds the lifecycle primitives used by
//! `bootstrap`/`interrupt`.
//!
//! # Structured Concurrency
//!
//! The serving task is spawned on a `tokio_util::task::TaskTracker` and
//! stopped through a `CancellationToken`. Call [`EntryState::shutdown`] to
//! mark the entry not ready, stop the server and wait for it to drain.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Shared entry state.
///
/// Cloned per handler; everything mutable is behind an `Arc`.
#[derive(Clone)]
pub struct EntryState {
    /// Entry name from the boot file
    pub name: Arc<str>,
    pub description: Arc<str>,
    /// Application version reported by `/info` and meta headers
    pub version: Arc<str>,
    /// Monotonic start, for uptime
    pub started_at: Instant,
    /// Wall-clock start, for display
    pub started_utc: DateTime<Utc>,
    ready: Arc<AtomicBool>,
    local_addr: Arc<OnceLock<SocketAddr>>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl EntryState {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: Arc::from(name),
            description: Arc::from(description),
            version: Arc::from(env!("CARGO_PKG_VERSION")),
            started_at: Instant::now(),
            started_utc: Utc::now(),
            ready: Arc::new(AtomicBool::new(false)),
            local_addr: Arc::new(OnceLock::new()),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Address the entry is bound to, once bootstrapped.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub(crate) fn set_local_addr(&self, addr: SocketAddr) {
        let _ = self.local_addr.set(addr);
    }

    pub(crate) fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// Token cancelled when the entry is interrupted.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Get the entry uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Gracefully shut the entry down.
    ///
    /// This method:
    /// 1. Marks the entry not ready
    /// 2. Signals the server task to stop via the cancellation token
    /// 3. Closes the task tracker and waits for the task to complete
    pub async fn shutdown(&self) {
        info!(entry = %self.name, "Initiating graceful shutdown");

        self.set_ready(false);
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!(entry = %self.name, "Entry stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_not_ready() {
        let state = EntryState::new("greeter", "demo");
        assert!(!state.is_ready());
        assert!(!state.is_interrupted());
        assert!(state.local_addr().is_none());
        assert_eq!(&*state.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_local_addr_set_once() {
        let state = EntryState::new("greeter", "");
        state.set_local_addr("127.0.0.1:1000".parse().unwrap());
        state.set_local_addr("127.0.0.1:2000".parse().unwrap());
        assert_eq!(state.local_addr().unwrap().port(), 1000);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_tasks() {
        let state = EntryState::new("greeter", "");
        state.set_ready(true);

        let token = state.cancellation_token().clone();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        state.task_tracker().spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        state.shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(!state.is_ready());
        assert!(state.is_interrupted());
    }
}
