//! Rate limiting middleware using the token bucket algorithm.
//!
//! # Algorithm
//!
//! Uses the Governor crate which implements a Generic Cell Rate Algorithm (GCRA),
//! also known as a "leaky bucket as a meter". This provides:
//!
//! - Smooth rate limiting (no sudden bursts followed by long waits)
//! - Per-IP rate limiting to prevent single-client abuse
//! - Thread-safe keyed state shared by every request
//!
//! # Configuration
//!
//! ```yaml
//! middleware:
//!   rateLimit:
//!     enabled: true
//!     reqPerSec: 100        # global, per client IP (0 = unlimited)
//!     burst: 50             # extra capacity (0 = same as reqPerSec)
//!     paths:
//!       - path: /v1/login
//!         reqPerSec: 1      # exact-path override with its own bucket
//! ```
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the next request will be accepted
//! - `X-RateLimit-Limit`: Configured RPS limit
//! - `X-RateLimit-Remaining`: Remaining requests in current window
//!
//! # IP Spoofing Mitigation
//!
//! Per-IP rate limiting relies on headers like `X-Forwarded-For` when behind
//! a reverse proxy. Configure `middleware.trustedProxies` with the proxy's
//! CIDR ranges so forwarding headers from other peers are ignored.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, extract_client_ip_with_validation};
use super::request::{PathFilter, normalize_path};
use crate::config::RateLimitConfig;
use crate::error::ErrorResp;
use crate::metrics;

/// Error type for rate limit layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// RPS value cannot be zero.
    #[error("RPS must be greater than 0; leave the limiter out for no limiting")]
    ZeroRps,

    #[error("rate limit path override needs a path")]
    EmptyPath,
}

/// Type alias for per-IP rate limiter.
///
/// Uses `String` keys (IP addresses) with the default DashMap-based state store.
type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// One bucket set with the limit it enforces.
struct Limit {
    limiter: KeyedLimiter,
    rps: u32,
}

impl Limit {
    fn new(rps: u32, burst: u32) -> Result<Self, RateLimitError> {
        let rps_nonzero = NonZeroU32::new(rps).ok_or(RateLimitError::ZeroRps)?;
        // A zero burst means "same as the rate"
        let burst_nonzero = NonZeroU32::new(burst).unwrap_or(rps_nonzero);
        let quota = Quota::per_second(rps_nonzero).allow_burst(burst_nonzero);

        Ok(Self {
            limiter: RateLimiter::keyed(quota),
            rps,
        })
    }
}

/// Limits resolved per path; `None` means unlimited.
#[derive(Clone, Default)]
struct Limits {
    global: Option<Arc<Limit>>,
    by_path: HashMap<String, Option<Arc<Limit>>>,
}

impl Limits {
    fn lookup(&self, path: &str) -> Option<&Limit> {
        match self.by_path.get(path) {
            Some(limit) => limit.as_deref(),
            None => self.global.as_deref(),
        }
    }
}

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let layer = RateLimitLayer::new(100, 50)?   // 100 RPS per IP, 50 burst
///     .with_path("/v1/login", 1)?;
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limits: Arc<Limits>,
    ignore: PathFilter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    /// Create a per-IP rate limit layer with a global limit.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError::ZeroRps` if `rps` is 0.
    pub fn new(rps: u32, burst: u32) -> Result<Self, RateLimitError> {
        Ok(Self::unlimited().with_global(Some(Arc::new(Limit::new(rps, burst)?))))
    }

    /// A layer with no global limit; only path overrides apply.
    pub fn unlimited() -> Self {
        Self {
            limits: Arc::new(Limits::default()),
            ignore: PathFilter::default(),
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
        }
    }

    /// Build from configuration; `reqPerSec: 0` means unlimited.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError::EmptyPath` for path overrides without a path.
    pub fn from_config(
        config: &RateLimitConfig,
        global_ignore: &[String],
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Result<Self, RateLimitError> {
        let global = match config.req_per_sec {
            0 => None,
            rps => Some(Arc::new(Limit::new(rps, config.burst)?)),
        };

        let mut layer = Self::unlimited()
            .with_global(global)
            .with_ignore(PathFilter::merged(global_ignore, &config.ignore));
        layer.trusted_proxies = trusted_proxies;

        for path in &config.paths {
            layer = layer.with_path(&path.path, path.req_per_sec)?;
        }

        debug!(
            global_rps = config.req_per_sec,
            overrides = config.paths.len(),
            "Rate limiter configured"
        );
        Ok(layer)
    }

    fn limits_mut(&mut self) -> &mut Limits {
        Arc::make_mut(&mut self.limits)
    }

    fn with_global(mut self, global: Option<Arc<Limit>>) -> Self {
        self.limits_mut().global = global;
        self
    }

    /// Give an exact path its own bucket (`rps = 0` exempts the path).
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError::EmptyPath` if `path` is empty.
    pub fn with_path(mut self, path: &str, rps: u32) -> Result<Self, RateLimitError> {
        if path.trim().is_empty() {
            return Err(RateLimitError::EmptyPath);
        }
        let limit = match rps {
            0 => None,
            rps => Some(Arc::new(Limit::new(rps, 0)?)),
        };
        self.limits_mut().by_path.insert(normalize_path(path), limit);
        Ok(self)
    }

    pub fn with_ignore(mut self, ignore: PathFilter) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_trusted_proxies(mut self, cidrs: &[String]) -> Self {
        self.trusted_proxies = Arc::new(TrustedProxyConfig::new(cidrs));
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limits: self.limits.clone(),
            ignore: self.ignore.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limits: Arc<Limits>,
    ignore: PathFilter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let path = req.uri().path();

        let limit = match self.limits.lookup(path) {
            Some(limit) if !self.ignore.is_ignored(path) => limit,
            _ => return Box::pin(async move { inner.call(req).await }),
        };

        // Convert Cow to String for the limiter key (required by governor's keyed rate limiter)
        let client_ip = extract_client_ip_with_validation(&req, &self.trusted_proxies).into_owned();

        match limit.limiter.check_key(&client_ip) {
            Ok(_) => Box::pin(async move { inner.call(req).await }),
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(DefaultClock::default().now());
                let retry_after = wait_time.as_secs().max(1);

                warn!(
                    client_ip = %client_ip,
                    path = %path,
                    retry_after_secs = retry_after,
                    "Rate limit exceeded for IP"
                );
                metrics::record_rate_limited(&metrics::route_label(&req));

                let response = rate_limited_response(limit.rps, retry_after);
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

fn rate_limited_response(limit: u32, retry_after: u64) -> Response<Body> {
    let mut response = ErrorResp::new(
        StatusCode::TOO_MANY_REQUESTS,
        "Rate limit exceeded. Please retry later.",
    )
    .into_response();

    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::PathRateLimit;
    use axum::Router;
    use axum::extract::ConnectInfo;
    use axum::routing::get;
    use tower::ServiceExt;

    fn app(layer: RateLimitLayer) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route("/login", get(|| async { "ok" }))
            .route("/free", get(|| async { "ok" }))
            .layer(layer)
    }

    async fn hit(app: &Router, path: &str, ip: &str) -> Response<Body> {
        app.clone()
            .oneshot(
                Request::builder()
                    .uri(path)
                    .header("x-forwarded-for", ip)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_rate_limit_zero_rps_returns_error() {
        let result = RateLimitLayer::new(0, 50);
        assert!(matches!(result, Err(RateLimitError::ZeroRps)));
    }

    #[test]
    fn test_empty_path_rejected() {
        let result = RateLimitLayer::unlimited().with_path(" ", 1);
        assert!(matches!(result, Err(RateLimitError::EmptyPath)));
    }

    #[tokio::test]
    async fn test_global_limit_per_ip() {
        let app = app(RateLimitLayer::new(1, 1).unwrap());

        assert_eq!(hit(&app, "/", "10.0.0.1").await.status(), StatusCode::OK);

        let limited = hit(&app, "/", "10.0.0.1").await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers()["retry-after"], "1");
        assert_eq!(limited.headers()["x-ratelimit-limit"], "1");

        // Other clients keep their own bucket
        assert_eq!(hit(&app, "/", "10.0.0.2").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_path_override_and_unlimited_global() {
        let config = RateLimitConfig {
            enabled: true,
            req_per_sec: 0,
            paths: vec![PathRateLimit {
                path: "login".to_string(),
                req_per_sec: 1,
            }],
            ..RateLimitConfig::default()
        };
        let layer =
            RateLimitLayer::from_config(&config, &[], Arc::new(TrustedProxyConfig::default()))
                .unwrap();
        let app = app(layer);

        for _ in 0..5 {
            assert_eq!(hit(&app, "/", "10.0.0.3").await.status(), StatusCode::OK);
        }
        assert_eq!(hit(&app, "/login", "10.0.0.3").await.status(), StatusCode::OK);
        assert_eq!(
            hit(&app, "/login", "10.0.0.3").await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_path_exempt_and_ignore() {
        let layer = RateLimitLayer::new(1, 1)
            .unwrap()
            .with_path("/free", 0)
            .unwrap()
            .with_ignore(PathFilter::new(["/login"]));
        let app = app(layer);

        for _ in 0..3 {
            assert_eq!(hit(&app, "/free", "10.0.0.4").await.status(), StatusCode::OK);
            assert_eq!(hit(&app, "/login", "10.0.0.4").await.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_untrusted_proxy_header_ignored() {
        let layer = RateLimitLayer::new(1, 1)
            .unwrap()
            .with_trusted_proxies(&["10.0.0.0/8".to_string()]);
        let app = app(layer);

        let from_untrusted_peer = |forwarded: &str| {
            let mut req = Request::builder()
                .uri("/")
                .header("x-forwarded-for", forwarded)
                .body(Body::empty())
                .unwrap();
            let peer: std::net::SocketAddr = "192.168.1.5:40000".parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(peer));
            req
        };

        // Both requests are keyed by the peer, not the spoofed header
        let first = app.clone().oneshot(from_untrusted_peer("1.1.1.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.oneshot(from_untrusted_peer("2.2.2.2")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
