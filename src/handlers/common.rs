//! Common service endpoints.
//!
//! # Endpoints
//!
//! Mounted under `commonService.pathPrefix` (default `/rk/v1/`):
//!
//! - `GET <prefix>ready` - Readiness probe; 503 once the entry is interrupted
//! - `GET <prefix>alive` - Liveness probe; always 200
//! - `GET <prefix>info` - Entry name, version, port and uptime
//!
//! # Ready vs Alive
//!
//! - **Alive**: the process is up and serving requests
//! - **Ready**: the entry is bootstrapped and not shutting down, so load
//!   balancers should keep routing traffic to it

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::instrument;

use crate::models::{AliveResponse, InfoResponse, ReadyResponse, humanize_uptime};
use crate::state::EntryState;

/// Readiness check endpoint for Kubernetes probes.
///
/// # Usage
///
/// ```yaml
/// readinessProbe:
///   httpGet:
///     path: /rk/v1/ready
///     port: 8080
///   periodSeconds: 10
/// ```
#[instrument(skip(state), fields(entry = %state.name))]
pub async fn ready(State(state): State<EntryState>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.is_ready() && !state.is_interrupted();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadyResponse { ready }))
}

#[instrument(skip(state), fields(entry = %state.name))]
pub async fn alive(State(state): State<EntryState>) -> Json<AliveResponse> {
    Json(AliveResponse { alive: true })
}

/// Entry information.
///
/// # Response Body
///
/// ```json
/// {
///   "entryName": "greeter",
///   "description": "greeter service",
///   "version": "0.1.0",
///   "port": 8080,
///   "startTime": "2024-01-15T10:30:00Z",
///   "upTimeSec": 3723,
///   "upTimeStr": "1h2m3s",
///   "ready": true
/// }
/// ```
#[instrument(skip(state), fields(entry = %state.name))]
pub async fn info(State(state): State<EntryState>) -> Json<InfoResponse> {
    let up_time_sec = state.uptime_seconds();

    Json(InfoResponse {
        entry_name: state.name.to_string(),
        description: state.description.to_string(),
        version: state.version.to_string(),
        port: state.local_addr().map(|addr| addr.port()).unwrap_or_default(),
        start_time: state.started_utc,
        up_time_sec,
        up_time_str: humanize_uptime(up_time_sec),
        ready: state.is_ready() && !state.is_interrupted(),
    })
}
