//! Double-submit cookie CSRF protection.
//!
//! Every non-ignored response carries a token cookie (default `_csrf`).
//! Requests with an unsafe method (anything but GET, HEAD, OPTIONS and
//! TRACE) must echo that token through the configured lookup, by default
//! the `X-CSRF-Token` header:
//!
//! | Situation                         | Response        |
//! |-----------------------------------|-----------------|
//! | Safe method                       | passed through  |
//! | Unsafe, token missing from lookup | 400 Bad Request |
//! | Unsafe, token differs from cookie | 403 Forbidden   |
//! | Unsafe, token matches             | passed through  |
//!
//! Handlers can read the current token with `Extension<CsrfToken>`, e.g. to
//! render it into a form.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use rand::Rng;
use rand::distr::Alphanumeric;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::request::{PathFilter, RequestMeta};
use crate::config::{CsrfConfig, TokenLookup};
use crate::error::ErrorResp;

/// Token of the current request, available to handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

#[derive(Debug)]
struct CsrfSettings {
    token_length: usize,
    lookup: TokenLookup,
    cookie_name: String,
    cookie_domain: String,
    cookie_path: String,
    cookie_max_age: u64,
    cookie_http_only: bool,
    cookie_same_site: String,
}

impl CsrfSettings {
    fn cookie(&self, token: &str, https: bool) -> String {
        let mut cookie = format!(
            "{}={}; Path={}; Max-Age={}",
            self.cookie_name, token, self.cookie_path, self.cookie_max_age
        );
        if !self.cookie_domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.cookie_domain));
        }
        if self.cookie_http_only {
            cookie.push_str("; HttpOnly");
        }
        let same_site = match self.cookie_same_site.to_ascii_lowercase().as_str() {
            "strict" => "Strict",
            "none" => "None",
            _ => "Lax",
        };
        cookie.push_str("; SameSite=");
        cookie.push_str(same_site);
        // Browsers drop SameSite=None cookies without Secure
        if https || same_site == "None" {
            cookie.push_str("; Secure");
        }
        cookie
    }

    fn token_from_cookie(&self, meta: &RequestMeta) -> Option<String> {
        meta.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .find_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == self.cookie_name && !value.is_empty()).then(|| value.to_string())
            })
    }

    fn token_from_lookup(&self, meta: &RequestMeta) -> Option<String> {
        let value = match &self.lookup {
            TokenLookup::Header(name) => meta.header(name),
            TokenLookup::Query(name) => meta.query_param(name),
        };
        value.filter(|v| !v.is_empty()).map(str::to_string)
    }

    fn generate(&self) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(self.token_length)
            .map(char::from)
            .collect()
    }
}

/// CSRF layer for the tower middleware stack.
#[derive(Clone)]
pub struct CsrfLayer {
    settings: Arc<CsrfSettings>,
    ignore: PathFilter,
}

impl CsrfLayer {
    /// Build from configuration. An unparsable `tokenLookup` falls back to
    /// the `X-CSRF-Token` header; validated configs never hit that path.
    pub fn from_config(config: &CsrfConfig, global_ignore: &[String]) -> Self {
        let lookup = TokenLookup::parse(&config.token_lookup).unwrap_or_else(|| {
            warn!(lookup = %config.token_lookup, "Invalid csrf tokenLookup, using header");
            TokenLookup::Header("X-CSRF-Token".to_string())
        });

        Self {
            settings: Arc::new(CsrfSettings {
                token_length: config.token_length.max(1),
                lookup,
                cookie_name: config.cookie_name.clone(),
                cookie_domain: config.cookie_domain.clone(),
                cookie_path: config.cookie_path.clone(),
                cookie_max_age: config.cookie_max_age,
                cookie_http_only: config.cookie_http_only,
                cookie_same_site: config.cookie_same_site.clone(),
            }),
            ignore: PathFilter::merged(global_ignore, &config.ignore),
        }
    }
}

impl<S> Layer<S> for CsrfLayer {
    type Service = CsrfService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CsrfService {
            inner,
            settings: self.settings.clone(),
            ignore: self.ignore.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CsrfService<S> {
    inner: S,
    settings: Arc<CsrfSettings>,
    ignore: PathFilter,
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn tokens_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

impl<S> Service<Request<Body>> for CsrfService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if self.ignore.is_ignored(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let settings = self.settings.clone();
        let meta = RequestMeta::from_request(&req);
        let token = settings
            .token_from_cookie(&meta)
            .unwrap_or_else(|| settings.generate());

        if !is_safe(&meta.method) {
            match settings.token_from_lookup(&meta) {
                None => {
                    warn!(path = %meta.path, method = %meta.method, "Missing csrf token");
                    return Box::pin(async {
                        Ok(
                            ErrorResp::new(StatusCode::BAD_REQUEST, "Missing csrf token")
                                .into_response(),
                        )
                    });
                }
                Some(provided) if !tokens_match(&provided, &token) => {
                    warn!(path = %meta.path, method = %meta.method, "Invalid csrf token");
                    return Box::pin(async {
                        Ok(ErrorResp::new(StatusCode::FORBIDDEN, "Invalid csrf token")
                            .into_response())
                    });
                }
                Some(_) => debug!(path = %meta.path, "Csrf token accepted"),
            }
        }

        req.extensions_mut().insert(CsrfToken(token.clone()));
        let cookie = settings.cookie(&token, meta.is_https());

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            if let Ok(value) = HeaderValue::try_from(cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;

    fn app(config: CsrfConfig) -> Router {
        Router::new()
            .route(
                "/form",
                get(|Extension(token): Extension<CsrfToken>| async move { token.0 })
                    .post(|| async { "posted" }),
            )
            .layer(CsrfLayer::from_config(&config, &[]))
    }

    fn enabled() -> CsrfConfig {
        CsrfConfig {
            enabled: true,
            ..CsrfConfig::default()
        }
    }

    #[tokio::test]
    async fn test_safe_method_sets_cookie() {
        let response = app(enabled())
            .oneshot(Request::builder().uri("/form").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("_csrf="));
        assert!(cookie.contains("SameSite=Lax"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.len(), 32);
        assert!(cookie.contains(std::str::from_utf8(&bytes).unwrap()));
    }

    #[tokio::test]
    async fn test_existing_cookie_reused() {
        let response = app(enabled())
            .oneshot(
                Request::builder()
                    .uri("/form")
                    .header(header::COOKIE, "other=1; _csrf=known-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"known-token");
    }

    #[tokio::test]
    async fn test_unsafe_without_token_is_400() {
        let response = app(enabled())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/form")
                    .header(header::COOKIE, "_csrf=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsafe_with_wrong_token_is_403() {
        let response = app(enabled())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/form")
                    .header(header::COOKIE, "_csrf=abc")
                    .header("x-csrf-token", "xyz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unsafe_without_cookie_is_403() {
        let response = app(enabled())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/form")
                    .header("x-csrf-token", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unsafe_with_matching_token_passes() {
        let response = app(enabled())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/form")
                    .header(header::COOKIE, "_csrf=abc")
                    .header("x-csrf-token", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_lookup() {
        let config = CsrfConfig {
            token_lookup: "query:csrf".to_string(),
            ..enabled()
        };
        let response = app(config)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/form?csrf=abc")
                    .header(header::COOKIE, "_csrf=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_cookie_attributes() {
        let layer = CsrfLayer::from_config(
            &CsrfConfig {
                cookie_domain: "example.com".to_string(),
                cookie_http_only: true,
                cookie_same_site: "none".to_string(),
                ..enabled()
            },
            &[],
        );
        let cookie = layer.settings.cookie("tok", false);

        assert_eq!(
            cookie,
            "_csrf=tok; Path=/; Max-Age=86400; Domain=example.com; HttpOnly; SameSite=None; Secure"
        );
    }
}
