//! Basic and API key authentication middleware.
//!
//! # Security Features
//!
//! - **Constant-time comparison**: Credentials are checked with `subtle`,
//!   and every configured credential is compared so the match position
//!   doesn't leak through timing
//! - **Two schemes**: `Authorization: Basic <base64(user:pass)>` and the
//!   `X-API-Key` header; either one is sufficient
//! - **Brute force protection**: Per-IP failure limiter; once exceeded the
//!   IP receives 429 until the quota refills, even with valid credentials
//!
//! # Configuration
//!
//! ```yaml
//! middleware:
//!   auth:
//!     enabled: true
//!     ignore: ["/v1/public"]
//!     basic: ["user:pass"]
//!     apiKey: ["my-key"]
//! ```
//!
//! Clients then authenticate with:
//!
//! ```bash
//! curl -u user:pass http://localhost:8080/v1/greeter
//! curl -H "X-API-Key: my-key" http://localhost:8080/v1/greeter
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use subtle::{Choice, ConstantTimeEq};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::ip::{TrustedProxyConfig, extract_client_ip_with_validation};
use super::request::PathFilter;
use crate::config::AuthConfig;
use crate::error::ErrorResp;
use crate::metrics;

/// Header name for API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Default maximum auth failures per IP per minute before blocking.
const DEFAULT_AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Default burst capacity for auth failure rate limiting.
const DEFAULT_AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Type alias for auth failure rate limiter (per-IP).
type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Accepted credentials.
#[derive(Debug, Default)]
struct Credentials {
    /// `user:pass` pairs
    basic: Vec<String>,
    api_keys: Vec<String>,
}

impl Credentials {
    fn accepts_basic(&self, decoded: &str) -> bool {
        any_ct_eq(&self.basic, decoded)
    }

    fn accepts_api_key(&self, key: &str) -> bool {
        any_ct_eq(&self.api_keys, key)
    }

    fn challenge(&self) -> &'static str {
        if self.basic.is_empty() {
            "API-Key"
        } else {
            r#"Basic realm="Authorization Required""#
        }
    }
}

/// Compare against every candidate without short-circuiting.
fn any_ct_eq(candidates: &[String], provided: &str) -> bool {
    candidates
        .iter()
        .fold(Choice::from(0), |acc, candidate| {
            acc | candidate.as_bytes().ct_eq(provided.as_bytes())
        })
        .into()
}

/// IPs blocked after exhausting their failure quota.
#[derive(Debug, Default)]
struct Blocklist {
    until: Mutex<HashMap<String, Instant>>,
}

impl Blocklist {
    fn blocked_for(&self, ip: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        match until.get(ip) {
            Some(deadline) if *deadline > now => Some(*deadline - now),
            Some(_) => {
                until.remove(ip);
                None
            }
            None => None,
        }
    }

    fn block(&self, ip: &str, wait: Duration) {
        let now = Instant::now();
        let mut until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        until.retain(|_, deadline| *deadline > now);
        until.insert(ip.to_string(), now + wait);
    }
}

/// Authentication layer.
///
/// # Brute Force Protection
///
/// Every rejected request consumes one cell of a per-IP quota. When the
/// quota is exhausted the IP is blocked, and further requests are answered
/// with 429 before any credential is inspected.
#[derive(Clone)]
pub struct AuthLayer {
    credentials: Arc<Credentials>,
    ignore: PathFilter,
    proxies: Arc<TrustedProxyConfig>,
    failure_limiter: Arc<AuthFailureLimiter>,
    blocklist: Arc<Blocklist>,
}

impl AuthLayer {
    pub fn new(basic: Vec<String>, api_keys: Vec<String>) -> Self {
        let quota =
            Quota::per_minute(DEFAULT_AUTH_FAILURE_LIMIT).allow_burst(DEFAULT_AUTH_FAILURE_BURST);

        Self {
            credentials: Arc::new(Credentials { basic, api_keys }),
            ignore: PathFilter::default(),
            proxies: Arc::new(TrustedProxyConfig::default()),
            failure_limiter: Arc::new(RateLimiter::keyed(quota)),
            blocklist: Arc::new(Blocklist::default()),
        }
    }

    pub fn from_config(
        config: &AuthConfig,
        global_ignore: &[String],
        proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        let mut layer = Self::new(config.basic.clone(), config.api_key.clone())
            .with_ignore(PathFilter::merged(global_ignore, &config.ignore));
        layer.proxies = proxies;
        layer
    }

    pub fn with_ignore(mut self, ignore: PathFilter) -> Self {
        self.ignore = ignore;
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Authentication service wrapper.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    layer: AuthLayer,
}

/// Outcome of inspecting a request's credentials.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Accepted(&'static str),
    Invalid,
    Missing,
}

fn verify<B>(req: &Request<B>, credentials: &Credentials) -> Verdict {
    let mut provided = false;

    if let Some(value) = req.headers().get(header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some((scheme, encoded)) = value.split_once(' ')
        && scheme.eq_ignore_ascii_case("basic")
    {
        provided = true;
        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        if let Some(decoded) = decoded
            && credentials.accepts_basic(&decoded)
        {
            return Verdict::Accepted("basic");
        }
    }

    if let Some(value) = req.headers().get(API_KEY_HEADER)
        && let Ok(key) = value.to_str()
    {
        provided = true;
        if credentials.accepts_api_key(key) {
            return Verdict::Accepted("api_key");
        }
    }

    if provided {
        Verdict::Invalid
    } else {
        Verdict::Missing
    }
}

impl<S> Service<Request<Body>> for AuthService<S>
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
        let layer = &self.layer;
        let path = req.uri().path();

        if layer.ignore.is_ignored(path) {
            debug!(path, "Bypassing auth for ignored path");
            return Box::pin(async move { inner.call(req).await });
        }

        let client_ip = extract_client_ip_with_validation(&req, &layer.proxies).into_owned();

        if let Some(wait) = layer.blocklist.blocked_for(&client_ip) {
            let retry_after = wait.as_secs().max(1);
            error!(
                client_ip = %client_ip,
                retry_after_secs = retry_after,
                "IP blocked due to excessive auth failures"
            );
            return Box::pin(async move { Ok(blocked_response(retry_after)) });
        }

        let message = match verify(&req, &layer.credentials) {
            Verdict::Accepted(scheme) => {
                debug!(scheme, "Authentication successful");
                return Box::pin(async move { inner.call(req).await });
            }
            Verdict::Invalid => "Invalid credentials",
            Verdict::Missing => "Missing authorization",
        };

        metrics::record_auth_failure();
        warn!(path = %path, client_ip = %client_ip, reason = message, "Authentication failed");

        // Consume a failure token; an exhausted quota blocks the IP
        if let Err(not_until) = layer.failure_limiter.check_key(&client_ip) {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            layer.blocklist.block(&client_ip, wait);
        }

        let challenge = layer.credentials.challenge();
        Box::pin(async move { Ok(unauthorized_response(message, challenge)) })
    }
}

/// Build an unauthorized (401) response.
fn unauthorized_response(message: &str, challenge: &'static str) -> Response<Body> {
    let mut response = ErrorResp::new(StatusCode::UNAUTHORIZED, message).into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(challenge),
    );
    response
}

/// Build a rate limited (429) response for auth failures.
fn blocked_response(retry_after: u64) -> Response<Body> {
    let mut response = ErrorResp::new(
        StatusCode::TOO_MANY_REQUESTS,
        "Too many failed authentication attempts. Please wait before retrying.",
    )
    .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
