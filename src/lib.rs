//! # axum-boot
//!
//! Boot axum servers from a YAML file, with an ordered middleware chain
//! and auxiliary endpoints switched on per entry:
//!
//! - **Lifecycle**: bootstrap binds and serves, interrupt drains and stops
//! - **Timeout**: race-based deadline with per-path overrides and custom responders
//! - **Security**: basic/API key auth, CSRF, CORS, secure headers, rate limiting
//! - **Observability**: per-request log line, request IDs, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 boot.yaml  (BootConfig)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  AxumEntry  (from_yaml → add_routes → bootstrap/interrupt)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Logging → Panic → ... → Timeout → Rate Limit)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  User routes + common service, Prometheus, static files     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::Router;
//! use axum::routing::get;
//! use axum_boot::AxumEntry;
//!
//! #[tokio::main]
//! async fn main() -> axum_boot::BootResult<()> {
//!     let mut entries = AxumEntry::from_file("boot.yaml")?;
//!     for entry in entries.values_mut() {
//!         entry.add_routes(Router::new().route("/v1/hello", get(|| async { "hello" })));
//!         entry.bootstrap().await?;
//!     }
//!
//!     axum_boot::utils::shutdown_signal().await;
//!     for entry in entries.values() {
//!         entry.interrupt().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::{BootConfig, EntryConfig};
pub use entry::AxumEntry;
pub use error::{BootError, BootResult, ErrorResp};
pub use middleware::{RaceOutcome, TimeoutLayer, TimeoutPolicy, TimeoutSignal};
pub use routes::build_router;
pub use state::EntryState;
