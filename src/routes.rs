//! Router assembly with the ordered middleware chain.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Logging      │ ← Creates the request Event, one line per request
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Panic Recovery  │ ← 500 envelope (always installed)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Metrics      │ ← Prometheus request counters/histograms
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP spans
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │       JWT        │ ← 401 if missing or invalid
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Secure Headers   │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │       CSRF       │ ← 400/403 on missing or mismatched token
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │       CORS       │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │       Meta       │ ← X-Request-Id, X-RK-App-* headers
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 if invalid
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Timeout      │ ← 408 on deadline, 500 on panic
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! axum wraps the router with each `.layer()` call, so the chain is
//! applied innermost first.
//!
//! # Auxiliary Routes
//!
//! - `<commonService.pathPrefix>{ready,alive,info}` - Common service
//! - `<prom.path>` - Prometheus scrape
//! - `<static.path>` - Static files from `static.sourcePath`

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{OriginalUri, Request, State};
use axum::middleware::{self as axum_middleware, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{EntryConfig, StaticConfig};
use crate::error::BootResult;
use crate::handlers;
use crate::middleware::{
    AuthLayer, CsrfLayer, JwtLayer, LoggingLayer, MetaLayer, PathFilter, PromLayer,
    RateLimitLayer, SecureLayer, TimeoutLayer, TrustedProxyConfig, build_cors_layer,
    normalize_path, panic_layer,
};
use crate::state::EntryState;

/// Build the entry router: user routes, auxiliary routes and the middleware chain.
///
/// # Arguments
///
/// * `config` - Entry configuration
/// * `state` - Entry state shared with the common service handlers
/// * `routes` - User routes registered with `AxumEntry::add_routes`
/// * `timeout` - Timeout layer, built from config and optionally customized
///
/// # Errors
///
/// Returns `BootError::RateLimit` or `BootError::Jwt` if those layers are misconfigured.
pub fn build_router(
    config: &EntryConfig,
    state: &EntryState,
    routes: Router,
    timeout: &TimeoutLayer,
) -> BootResult<Router> {
    let name = config.entry_name();
    let mw = &config.middleware;
    let ignore = &mw.ignore;
    let proxies = Arc::new(TrustedProxyConfig::new(&mw.trusted_proxies));

    // =========================================================================
    // Routes
    // =========================================================================
    let mut router = routes;

    if config.common_service.enabled {
        let prefix = common_prefix(&config.common_service.path_prefix);
        info!(entry = %name, prefix = %prefix, "Common service enabled");
        router = router.merge(
            Router::new()
                .route(&format!("{prefix}ready"), get(handlers::ready))
                .route(&format!("{prefix}alive"), get(handlers::alive))
                .route(&format!("{prefix}info"), get(handlers::info))
                .with_state(state.clone()),
        );
    }

    if config.prom.enabled {
        let path = normalize_path(&config.prom.path);
        info!(entry = %name, path = %path, "Prometheus endpoint enabled");
        router = router.route(&path, get(handlers::scrape));
    }

    if config.static_files.enabled {
        router = mount_static(router, &config.static_files);
        info!(
            entry = %name,
            path = %config.static_files.path,
            source = %config.static_files.source_path,
            "Static file handler enabled"
        );
    }

    // =========================================================================
    // Apply Middleware Stack (innermost first)
    // =========================================================================

    if mw.rate_limit.enabled {
        info!(
            entry = %name,
            rps = mw.rate_limit.req_per_sec,
            overrides = mw.rate_limit.paths.len(),
            "Rate limiting enabled"
        );
        router = router.layer(RateLimitLayer::from_config(
            &mw.rate_limit,
            ignore,
            proxies.clone(),
        )?);
    }

    if mw.timeout.enabled {
        info!(entry = %name, ?timeout, "Timeout middleware enabled");
        router = router.layer(timeout.clone());
    }

    if mw.auth.enabled {
        info!(
            entry = %name,
            basic = mw.auth.basic.len(),
            api_keys = mw.auth.api_key.len(),
            "Authentication enabled"
        );
        router = router.layer(AuthLayer::from_config(&mw.auth, ignore, proxies.clone()));
    }

    if mw.meta.enabled {
        router = router.layer(MetaLayer::new(&mw.meta.prefix, &name, &state.version));
    }

    if mw.cors.enabled {
        router = router.layer(build_cors_layer(&mw.cors));
    }

    if mw.csrf.enabled {
        router = router.layer(CsrfLayer::from_config(&mw.csrf, ignore));
    }

    if mw.secure.enabled {
        router = router.layer(SecureLayer::from_config(&mw.secure, ignore));
    }

    if mw.jwt.enabled {
        info!(entry = %name, algorithm = %mw.jwt.algorithm, "JWT validation enabled");
        router = router.layer(JwtLayer::from_config(&mw.jwt, ignore)?);
    }

    if mw.trace.enabled {
        router = router.layer(TraceLayer::new_for_http());
    }

    if mw.prom.enabled {
        router = router.layer(PromLayer::new(
            &name,
            PathFilter::merged(ignore, &mw.prom.ignore),
        ));
    }

    router = router.layer(panic_layer());

    if mw.logging.enabled {
        router = router.layer(LoggingLayer::new(
            &name,
            PathFilter::merged(ignore, &mw.logging.ignore),
            proxies,
        ));
    }

    Ok(router)
}

/// Prefix with leading and trailing slash.
fn common_prefix(raw: &str) -> String {
    let prefix = normalize_path(raw);
    if prefix.ends_with('/') {
        prefix
    } else {
        format!("{prefix}/")
    }
}

/// Serve `source_path` under `path`; the bare path redirects to `path/`.
fn mount_static(router: Router, config: &StaticConfig) -> Router {
    let prefix = normalize_path(&config.path).trim_end_matches('/').to_string();
    if prefix.is_empty() {
        return router.fallback_service(ServeDir::new(&config.source_path));
    }

    let files = ServiceBuilder::new()
        .layer(axum_middleware::from_fn_with_state(
            Arc::<str>::from(prefix.as_str()),
            redirect_bare_prefix,
        ))
        .service(ServeDir::new(&config.source_path));

    router.nest_service(&prefix, files)
}

async fn redirect_bare_prefix(
    State(prefix): State<Arc<str>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let bare = req
        .extensions()
        .get::<OriginalUri>()
        .is_some_and(|OriginalUri(uri)| uri.path() == &*prefix);

    if bare {
        return Redirect::temporary(&format!("{prefix}/")).into_response();
    }
    next.run(req).await
}
