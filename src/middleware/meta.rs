//! Request ID and application metadata headers.
//!
//! # Features
//!
//! - Propagates an incoming `X-Request-Id` or generates a UUIDv4
//! - Adds `X-Request-Id` to the request (for handlers) and the response
//! - Adds `X-<prefix>-App-Name`, `X-<prefix>-App-Version`,
//!   `X-<prefix>-App-Unix-Time` and `X-<prefix>-Received-Time` response
//!   headers (prefix defaults to `RK`)
//!
//! # Client Usage
//!
//! ```bash
//! curl -i -H "X-Request-Id: my-correlation-id" http://localhost:8080/v1/greeter
//! # X-Request-Id: my-correlation-id
//! # X-RK-App-Name: greeter
//! # X-RK-App-Version: 0.1.0
//! # X-RK-App-Unix-Time: 2024-05-01T10:00:00.000123+00:00
//! # X-RK-Received-Time: 2024-05-01T10:00:00.000045+00:00
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Request, Response};
use chrono::{SecondsFormat, Utc};
use tower::{Layer, Service};
use tracing::{Span, debug, warn};
use uuid::Uuid;

use super::context::Event;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Prefix used when the configured one can't form a valid header name.
pub const DEFAULT_META_PREFIX: &str = "RK";

/// Fallback header value when request ID parsing fails.
static UNKNOWN_REQUEST_ID: HeaderValue = HeaderValue::from_static("unknown");

#[derive(Debug)]
struct MetaHeaders {
    app_name: HeaderName,
    app_version: HeaderName,
    app_unix_time: HeaderName,
    received_time: HeaderName,
    name_value: HeaderValue,
    version_value: HeaderValue,
}

impl MetaHeaders {
    fn build(prefix: &str, app_name: &str, app_version: &str) -> Option<Self> {
        let name = |suffix: &str| HeaderName::try_from(format!("x-{prefix}-{suffix}")).ok();
        Some(Self {
            app_name: name("app-name")?,
            app_version: name("app-version")?,
            app_unix_time: name("app-unix-time")?,
            received_time: name("received-time")?,
            name_value: HeaderValue::try_from(app_name).ok()?,
            version_value: HeaderValue::try_from(app_version).ok()?,
        })
    }
}

/// Meta header layer for the tower middleware stack.
#[derive(Debug, Clone)]
pub struct MetaLayer {
    headers: Option<Arc<MetaHeaders>>,
}

impl MetaLayer {
    /// Create a meta layer; `prefix` is lower-cased into the header names.
    ///
    /// An app name or version that isn't a valid header value disables the
    /// app headers but keeps request ID propagation.
    pub fn new(prefix: &str, app_name: &str, app_version: &str) -> Self {
        let prefix = prefix.trim().to_ascii_lowercase();
        let headers = MetaHeaders::build(&prefix, app_name, app_version).or_else(|| {
            warn!(
                prefix = %prefix,
                "Invalid meta header prefix or app name, falling back to default prefix"
            );
            MetaHeaders::build(&DEFAULT_META_PREFIX.to_ascii_lowercase(), app_name, app_version)
        });

        Self {
            headers: headers.map(Arc::new),
        }
    }
}

impl<S> Layer<S> for MetaLayer {
    type Service = MetaService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetaService {
            inner,
            headers: self.headers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetaService<S> {
    inner: S,
    headers: Option<Arc<MetaHeaders>>,
}

impl<S> Service<Request<Body>> for MetaService<S>
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
        let received = Utc::now();
        let request_id = extract_or_generate_request_id(&req);
        let request_id_value = HeaderValue::try_from(request_id.as_str())
            .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone());

        req.headers_mut()
            .insert(REQUEST_ID_HEADER, request_id_value.clone());
        if let Some(event) = Event::from_request(&req) {
            event.set_request_id(request_id.clone());
        }

        Span::current().record("request_id", &request_id);
        debug!(request_id = %request_id, "Processing request");

        let headers = self.headers.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            let out = response.headers_mut();
            out.insert(REQUEST_ID_HEADER, request_id_value);

            if let Some(meta) = headers {
                out.insert(meta.app_name.clone(), meta.name_value.clone());
                out.insert(meta.app_version.clone(), meta.version_value.clone());
                if let Ok(now) = HeaderValue::try_from(rfc3339(Utc::now())) {
                    out.insert(meta.app_unix_time.clone(), now);
                }
                if let Ok(at) = HeaderValue::try_from(rfc3339(received)) {
                    out.insert(meta.received_time.clone(), at);
                }
            }

            Ok(response)
        })
    }
}

fn rfc3339(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Extract request ID from headers or generate a new one.
fn extract_or_generate_request_id<B>(req: &Request<B>) -> String {
    if let Some(header_value) = req.headers().get(REQUEST_ID_HEADER)
        && let Ok(value) = header_value.to_str()
        && !value.is_empty()
    {
        return value.to_string();
    }

    Uuid::new_v4().to_string()
}

/// Extension trait to extract request ID from requests.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<String>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<String> {
        self.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}
