//! Per-request access logging.
//!
//! The logging middleware is the outermost layer. It attaches a fresh
//! [`Event`] to the request and, once the response is ready, emits a
//! single `info!` line carrying everything the inner layers recorded.
//!
//! ```text
//! INFO axum_boot::middleware::logging: Request completed entry=greeter method=GET
//!      path=/v1/greeter status=408 elapsed_ms=5001 client_ip=10.0.0.9
//!      request_id=7c1e.. counters={"timeout": 1} errors=[]
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::info;

use super::context::Event;
use super::ip::{TrustedProxyConfig, extract_client_ip_with_validation};
use super::meta::REQUEST_ID_HEADER;
use super::request::PathFilter;

#[derive(Clone)]
pub struct LoggingLayer {
    entry: Arc<str>,
    ignore: PathFilter,
    proxies: Arc<TrustedProxyConfig>,
}

impl LoggingLayer {
    pub fn new(entry: &str, ignore: PathFilter, proxies: Arc<TrustedProxyConfig>) -> Self {
        Self {
            entry: Arc::from(entry),
            ignore,
            proxies,
        }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            entry: self.entry.clone(),
            ignore: self.ignore.clone(),
            proxies: self.proxies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LoggingService<S> {
    inner: S,
    entry: Arc<str>,
    ignore: PathFilter,
    proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for LoggingService<S>
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

        let event = Event::new();
        req.extensions_mut().insert(event.clone());

        let entry = self.entry.clone();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let client_ip = extract_client_ip_with_validation(&req, &self.proxies).into_owned();

        Box::pin(async move {
            let result = inner.call(req).await;

            if let Ok(response) = &result {
                let request_id = event.request_id().or_else(|| {
                    response
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                });

                info!(
                    entry = %entry,
                    method = %method,
                    path = %path,
                    status = response.status().as_u16(),
                    elapsed_ms = u64::try_from(event.elapsed().as_millis()).unwrap_or(u64::MAX),
                    client_ip = %client_ip,
                    request_id = request_id.as_deref().unwrap_or("-"),
                    counters = ?event.counters(),
                    errors = ?event.errors(),
                    "Request completed"
                );
            }

            result
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

    fn layer(ignore: &[&str]) -> LoggingLayer {
        LoggingLayer::new(
            "test",
            PathFilter::new(ignore.iter().copied()),
            Arc::new(TrustedProxyConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_event_visible_to_handlers() {
        let app = Router::new()
            .route(
                "/",
                get(|Extension(event): Extension<Event>| async move {
                    event.set_counter("seen", 1);
                    event.counter("seen").unwrap_or_default().to_string()
                }),
            )
            .layer(layer(&[]));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"1");
    }

    #[tokio::test]
    async fn test_ignored_path_gets_no_event() {
        let app = Router::new()
            .route(
                "/rk/v1/alive",
                get(|req: Request<Body>| async move { Event::from_request(&req).is_some().to_string() }),
            )
            .layer(layer(&["/rk/v1/"]));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/rk/v1/alive")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"false");
    }
}
