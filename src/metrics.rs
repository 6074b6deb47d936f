//! Prometheus metrics for request observability.
//!
//! A single recorder is installed per process and shared by every entry;
//! each entry renders it at its own `prom.path`. Samples carry an `entry`
//! label so entries stay distinguishable.
//!
//! # Available Metrics
//!
//! ## Counters
//! The `path` label is the matched route template (`/v1/users/{id}`), or
//! `unmatched` for requests no route claimed, so the series set stays
//! bounded by the routes an entry registers.
//!
//! - `axum_boot_requests_total` - Requests served (labels: entry, path, method, code)
//! - `axum_boot_timeouts_total` - Requests answered by the timeout middleware (labels: path)
//! - `axum_boot_panics_total` - Handler panics recovered
//! - `axum_boot_rate_limited_total` - Requests rejected by the rate limiter (labels: path)
//! - `axum_boot_auth_failures_total` - Rejected credentials
//!
//! ## Histograms
//! - `axum_boot_request_duration_seconds` - Request duration (labels: entry, path, method)

use std::sync::{Mutex, OnceLock, PoisonError};

use axum::extract::MatchedPath;
use axum::http::Request;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::{BootError, BootResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "axum_boot_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "axum_boot_request_duration_seconds";
    pub const TIMEOUTS_TOTAL: &str = "axum_boot_timeouts_total";
    pub const PANICS_TOTAL: &str = "axum_boot_panics_total";
    pub const RATE_LIMITED_TOTAL: &str = "axum_boot_rate_limited_total";
    pub const AUTH_FAILURES_TOTAL: &str = "axum_boot_auth_failures_total";
}

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL: Mutex<()> = Mutex::new(());

/// Install the process-wide Prometheus recorder, or return the existing one.
///
/// # Errors
///
/// Returns `BootError::Metrics` if another recorder was installed outside
/// this module.
pub fn init_metrics() -> BootResult<PrometheusHandle> {
    let _guard = INSTALL.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| BootError::Metrics(format!("Failed to install Prometheus recorder: {e}")))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of HTTP requests served");
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        names::TIMEOUTS_TOTAL,
        "Total number of requests answered with 408 by the timeout middleware"
    );
    describe_counter!(names::PANICS_TOTAL, "Total number of recovered handler panics");
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of requests rejected for missing or invalid credentials"
    );

    info!("Prometheus recorder installed");

    Ok(HANDLE.get_or_init(|| handle).clone())
}

/// Render the current metrics in Prometheus text format, if installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

/// `path` label for requests without a matched route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Route template of the request for use as a metric label.
pub fn route_label<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ROUTE.to_string(), |matched| matched.as_str().to_string())
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record a completed request.
pub fn record_request(entry: &str, path: &str, method: &str, code: u16, duration_secs: f64) {
    counter!(names::REQUESTS_TOTAL, "entry" => entry.to_string(), "path" => path.to_string(), "method" => method.to_string(), "code" => code.to_string())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "entry" => entry.to_string(), "path" => path.to_string(), "method" => method.to_string())
        .record(duration_secs);
}

pub fn record_timeout(path: &str) {
    counter!(names::TIMEOUTS_TOTAL, "path" => path.to_string()).increment(1);
}

pub fn record_panic() {
    counter!(names::PANICS_TOTAL).increment(1);
}

pub fn record_rate_limited(path: &str) {
    counter!(names::RATE_LIMITED_TOTAL, "path" => path.to_string()).increment(1);
}

pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // These verify the recording functions don't panic without a recorder.

    #[test]
    fn test_record_without_recorder() {
        record_request("entry", "/", "GET", 200, 0.01);
        record_timeout("/slow");
        record_panic();
        record_rate_limited("/");
        record_auth_failure();
    }

    #[test]
    fn test_route_label_without_match() {
        let req = Request::builder().uri("/scan/1").body(()).unwrap();
        assert_eq!(route_label(&req), UNMATCHED_ROUTE);
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(render().is_some());
    }
}
