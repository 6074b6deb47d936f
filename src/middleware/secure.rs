//! Security response headers.
//!
//! Header values come from `middleware.secure`; an empty value leaves the
//! header out. `Strict-Transport-Security` is only sent to clients that
//! reached us over HTTPS, as reported by `X-Forwarded-Proto`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::warn;

use super::request::PathFilter;
use crate::config::SecureConfig;

/// Header for XSS filtering in legacy browsers.
pub const XSS_PROTECTION_HEADER: &str = "x-xss-protection";

#[derive(Debug, Default)]
struct SecureHeaders {
    always: Vec<(HeaderName, HeaderValue)>,
    hsts: Option<HeaderValue>,
}

impl SecureHeaders {
    fn from_config(config: &SecureConfig) -> Self {
        let mut always = Vec::new();
        let mut push = |name: HeaderName, value: &str| {
            if value.is_empty() {
                return;
            }
            match HeaderValue::try_from(value) {
                Ok(value) => always.push((name, value)),
                Err(_) => warn!(header = %name, value, "Invalid secure header value, skipping"),
            }
        };

        push(
            HeaderName::from_static(XSS_PROTECTION_HEADER),
            &config.xss_protection,
        );
        push(header::X_CONTENT_TYPE_OPTIONS, &config.content_type_nosniff);
        push(header::X_FRAME_OPTIONS, &config.x_frame_options);
        push(
            if config.csp_report_only {
                header::CONTENT_SECURITY_POLICY_REPORT_ONLY
            } else {
                header::CONTENT_SECURITY_POLICY
            },
            &config.content_security_policy,
        );
        push(header::REFERRER_POLICY, &config.referrer_policy);

        let hsts = (config.hsts_max_age > 0)
            .then(|| hsts_value(config))
            .and_then(|v| HeaderValue::try_from(v).ok());

        Self { always, hsts }
    }
}

fn hsts_value(config: &SecureConfig) -> String {
    let mut value = format!("max-age={}", config.hsts_max_age);
    if !config.hsts_exclude_subdomains {
        value.push_str("; includeSubdomains");
    }
    if config.hsts_preload_enabled {
        value.push_str("; preload");
    }
    value
}

#[derive(Clone)]
pub struct SecureLayer {
    headers: Arc<SecureHeaders>,
    ignore: PathFilter,
}

impl SecureLayer {
    pub fn from_config(config: &SecureConfig, global_ignore: &[String]) -> Self {
        Self {
            headers: Arc::new(SecureHeaders::from_config(config)),
            ignore: PathFilter::merged(global_ignore, &config.ignore),
        }
    }
}

impl<S> Layer<S> for SecureLayer {
    type Service = SecureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecureService {
            inner,
            headers: self.headers.clone(),
            ignore: self.ignore.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SecureService<S> {
    inner: S,
    headers: Arc<SecureHeaders>,
    ignore: PathFilter,
}

impl<S> Service<Request<Body>> for SecureService<S>
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

        if self.ignore.is_ignored(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let headers = self.headers.clone();
        let https = req
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            let out = response.headers_mut();

            for (name, value) in &headers.always {
                out.insert(name.clone(), value.clone());
            }
            if https && let Some(hsts) = &headers.hsts {
                out.insert(header::STRICT_TRANSPORT_SECURITY, hsts.clone());
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn headers_for(config: SecureConfig, https: bool) -> axum::http::HeaderMap {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(SecureLayer::from_config(&config, &[]));

        let mut req = Request::builder().uri("/");
        if https {
            req = req.header("x-forwarded-proto", "https");
        }
        app.oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .headers()
            .clone()
    }

    #[tokio::test]
    async fn test_default_headers() {
        let headers = headers_for(SecureConfig::default(), false).await;

        assert_eq!(headers["x-xss-protection"], "1; mode=block");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert!(!headers.contains_key("strict-transport-security"));
        assert!(!headers.contains_key("content-security-policy"));
        assert!(!headers.contains_key("referrer-policy"));
    }

    #[tokio::test]
    async fn test_hsts_only_over_https() {
        let config = SecureConfig {
            hsts_max_age: 3600,
            hsts_preload_enabled: true,
            ..SecureConfig::default()
        };

        let plain = headers_for(config.clone(), false).await;
        assert!(!plain.contains_key("strict-transport-security"));

        let tls = headers_for(config, true).await;
        assert_eq!(
            tls["strict-transport-security"],
            "max-age=3600; includeSubdomains; preload"
        );
    }

    #[tokio::test]
    async fn test_csp_report_only() {
        let config = SecureConfig {
            content_security_policy: "default-src 'self'".to_string(),
            csp_report_only: true,
            referrer_policy: "no-referrer".to_string(),
            ..SecureConfig::default()
        };
        let headers = headers_for(config, false).await;

        assert_eq!(
            headers["content-security-policy-report-only"],
            "default-src 'self'"
        );
        assert!(!headers.contains_key("content-security-policy"));
        assert_eq!(headers["referrer-policy"], "no-referrer");
    }

    #[test]
    fn test_hsts_exclude_subdomains() {
        let config = SecureConfig {
            hsts_max_age: 10,
            hsts_exclude_subdomains: true,
            ..SecureConfig::default()
        };
        assert_eq!(hsts_value(&config), "max-age=10");
    }
}
