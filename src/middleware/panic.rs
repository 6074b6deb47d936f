//! Panic recovery for the whole middleware chain.
//!
//! The timeout middleware recovers panics inside its own spawned task. This
//! layer sits near the top of the chain and catches everything else: panics
//! raised by other middleware, or by handlers when the timeout middleware
//! is disabled. Either way the client receives the same 500 envelope.
//!
//! The envelope carries the panic message only. [`install_panic_hook`]
//! routes the location and stack trace of every panic through `tracing`.

use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error;
use std::io;
use std::panic;
use std::sync::Once;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tracing::error;

use crate::error::ErrorResp;
use crate::metrics;

/// Message used when the panic payload is neither a string nor an error.
pub const UNKNOWN_PANIC: &str = "unknown panic";

/// Turn a panic payload into a readable message.
///
/// `&'static str` and `String` payloads are kept as-is; boxed errors and
/// `io::Error` use their `Display`.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    describe(&*payload)
}

fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    if let Some(err) = payload.downcast_ref::<Box<dyn Error + Send + Sync>>() {
        return err.to_string();
    }
    if let Some(err) = payload.downcast_ref::<Box<dyn Error + Send>>() {
        return err.to_string();
    }
    if let Some(err) = payload.downcast_ref::<io::Error>() {
        return err.to_string();
    }

    UNKNOWN_PANIC.to_string()
}

/// Replace the process panic hook with one that logs message, location and
/// a captured backtrace as a single `error!` event.
///
/// Installed once; later calls are no-ops.
pub fn install_panic_hook() {
    static INSTALLED: Once = Once::new();

    INSTALLED.call_once(|| {
        panic::set_hook(Box::new(|info| {
            let location = info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
                .unwrap_or_default();
            let backtrace = Backtrace::force_capture();

            error!(
                panic = %describe(info.payload()),
                location = %location,
                backtrace = %backtrace,
                "Thread panicked"
            );
        }));
    });
}

/// Writes the 500 envelope for a caught panic.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicResponder;

impl ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        let message = panic_message(err);
        metrics::record_panic();
        error!(panic = %message, "Recovered panic in middleware chain");

        ErrorResp::new(StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
    }
}

/// Layer installed on every entry.
pub fn panic_layer() -> CatchPanicLayer<PanicResponder> {
    CatchPanicLayer::custom(PanicResponder)
}
