//! Request metrics middleware.
//!
//! Records `axum_boot_requests_total` and
//! `axum_boot_request_duration_seconds` for every request that isn't
//! ignored, labelled with the matched route. The recorder itself is
//! installed by the entry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};

use super::request::PathFilter;
use crate::metrics;

#[derive(Clone)]
pub struct PromLayer {
    entry: Arc<str>,
    ignore: PathFilter,
}

impl PromLayer {
    pub fn new(entry: &str, ignore: PathFilter) -> Self {
        Self {
            entry: Arc::from(entry),
            ignore,
        }
    }
}

impl<S> Layer<S> for PromLayer {
    type Service = PromService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PromService {
            inner,
            entry: self.entry.clone(),
            ignore: self.ignore.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PromService<S> {
    inner: S,
    entry: Arc<str>,
    ignore: PathFilter,
}

impl<S> Service<Request<Body>> for PromService<S>
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

        let entry = self.entry.clone();
        let method = req.method().to_string();
        let route = metrics::route_label(&req);
        let started = Instant::now();

        Box::pin(async move {
            let result = inner.call(req).await;
            if let Ok(response) = &result {
                metrics::record_request(
                    &entry,
                    &route,
                    &method,
                    response.status().as_u16(),
                    started.elapsed().as_secs_f64(),
                );
            }
            result
        })
    }
}
