//! Boot entries: one axum server per enabled `axum` item in the boot file.
//!
//! # Lifecycle
//!
//! ```text
//! from_yaml / from_config ──► add_routes / customize_timeout ──► bootstrap ──► interrupt
//!                                                                  │              │
//!                                                     bind + serve in background  │
//!                                                     ready = true                ▼
//!                                                                   ready = false, drain, stop
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::Router;
//! use axum::routing::get;
//! use axum_boot::AxumEntry;
//!
//! # async fn run() -> axum_boot::BootResult<()> {
//! let mut entries = AxumEntry::from_file("boot.yaml")?;
//! if let Some(entry) = entries.get_mut("greeter") {
//!     entry.add_routes(Router::new().route("/v1/greeter", get(|| async { "hello" })));
//!     entry.bootstrap().await?;
//! }
//! axum_boot::utils::shutdown_signal().await;
//! for entry in entries.values() {
//!     entry.interrupt().await;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::{BootConfig, EntryConfig};
use crate::error::{BootError, BootResult};
use crate::metrics;
use crate::middleware::TimeoutLayer;
use crate::routes::build_router;
use crate::state::EntryState;

/// One configured axum server.
pub struct AxumEntry {
    config: EntryConfig,
    state: EntryState,
    routes: Router,
    timeout: TimeoutLayer,
}

impl AxumEntry {
    pub fn from_config(config: EntryConfig) -> Self {
        let state = EntryState::new(&config.entry_name(), &config.description);
        let timeout =
            TimeoutLayer::from_config(&config.middleware.timeout, &config.middleware.ignore);

        Self {
            config,
            state,
            routes: Router::new(),
            timeout,
        }
    }

    /// Parse a boot file and build every enabled entry, keyed by name.
    ///
    /// # Errors
    ///
    /// Returns the parse and validation errors of [`BootConfig::from_yaml_str`].
    pub fn from_yaml(raw: &str) -> BootResult<BTreeMap<String, Self>> {
        Ok(Self::from_boot_config(&BootConfig::from_yaml_str(raw)?))
    }

    /// Read a boot file from disk and build every enabled entry.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`BootConfig::from_file`].
    pub fn from_file(path: impl AsRef<Path>) -> BootResult<BTreeMap<String, Self>> {
        Ok(Self::from_boot_config(&BootConfig::from_file(path)?))
    }

    pub fn from_boot_config(config: &BootConfig) -> BTreeMap<String, Self> {
        config
            .enabled_entries()
            .map(|entry| (entry.entry_name(), Self::from_config(entry.clone())))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Configured port; see [`AxumEntry::local_addr`] for the bound one.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn config(&self) -> &EntryConfig {
        &self.config
    }

    pub fn state(&self) -> &EntryState {
        &self.state
    }

    /// Address the server is listening on, once bootstrapped.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.local_addr()
    }

    /// Merge user routes; call before [`AxumEntry::bootstrap`].
    pub fn add_routes(&mut self, routes: Router) -> &mut Self {
        self.routes = std::mem::take(&mut self.routes).merge(routes);
        self
    }

    /// Adjust the configured timeout layer, e.g. to attach responders.
    ///
    /// ```rust,ignore
    /// entry.customize_timeout(|layer| {
    ///     layer.with_path_responder("/v1/report", Duration::from_secs(30), |meta| {
    ///         Some(format!("report {} is still running", meta.path))
    ///     })
    /// });
    /// ```
    pub fn customize_timeout(&mut self, f: impl FnOnce(TimeoutLayer) -> TimeoutLayer) -> &mut Self {
        self.timeout = f(self.timeout.clone());
        self
    }

    /// Assemble the router without binding, for in-process use.
    ///
    /// # Errors
    ///
    /// Returns `BootError::RateLimit` or `BootError::Jwt` for an invalid layer configuration.
    pub fn router(&self) -> BootResult<Router> {
        build_router(&self.config, &self.state, self.routes.clone(), &self.timeout)
    }

    fn wants_metrics(&self) -> bool {
        self.config.prom.enabled || self.config.middleware.prom.enabled
    }

    /// Bind the configured port and serve in a background task.
    ///
    /// Port 0 binds an ephemeral port; the result holds the bound address.
    ///
    /// # Errors
    ///
    /// - `BootError::Serve` if the entry was already bootstrapped or interrupted
    /// - `BootError::Metrics` if the Prometheus recorder can't be installed
    /// - `BootError::Bind` if the port can't be bound
    pub async fn bootstrap(&mut self) -> BootResult<SocketAddr> {
        if let Some(addr) = self.state.local_addr() {
            return Err(BootError::Serve(format!(
                "entry '{}' is already serving on {addr}",
                self.name()
            )));
        }
        if self.state.is_interrupted() {
            return Err(BootError::Serve(format!(
                "entry '{}' was interrupted",
                self.name()
            )));
        }

        if self.wants_metrics() {
            metrics::init_metrics()?;
        }

        let router = self.router()?;
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let bind_err = |source| BootError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        self.state.set_local_addr(local_addr);

        let name = self.state.name.clone();
        let shutdown = self.state.cancellation_token().clone();

        self.state.task_tracker().spawn(async move {
            let served = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

            if let Err(e) = served {
                error!(entry = %name, "Server error: {e}");
            }
        });

        self.state.set_ready(true);
        info!(
            entry = %self.name(),
            addr = %local_addr,
            "Server listening on http://{local_addr}"
        );

        Ok(local_addr)
    }

    /// Stop serving: mark the entry not ready, then drain and wait.
    ///
    /// Safe to call more than once, or before bootstrap.
    pub async fn interrupt(&self) {
        self.state.shutdown().await;
    }
}

impl std::fmt::Debug for AxumEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumEntry")
            .field("name", &self.name())
            .field("port", &self.config.port)
            .field("local_addr", &self.local_addr())
            .field("timeout", &self.timeout)
            .finish()
    }
}
