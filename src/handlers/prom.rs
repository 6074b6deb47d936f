//! Prometheus scrape endpoint.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::ErrorResp;
use crate::metrics;

/// Render every recorded metric in the Prometheus text format.
pub async fn scrape() -> Response {
    match metrics::render() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => ErrorResp::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Prometheus recorder is not installed",
        )
        .into_response(),
    }
}
