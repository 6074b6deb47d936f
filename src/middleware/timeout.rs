//! Request timeout middleware.
//!
//! Every request is raced against a per-path deadline:
//!
//! ```text
//!                 ┌──────────────── spawned task ────────────────┐
//! request ──────► │ inner.call(req)  ── Ok/Err ──► Completed      │
//!    │            │                  ── panic  ──► Panicked       │
//!    │            └───────────────────────────────────────────────┘
//!    └─► sleep(policy.timeout) ───────────────────► TimedOut
//! ```
//!
//! Exactly one outcome is observed per request:
//!
//! - **Completed**: the inner response and error are returned untouched.
//! - **Panicked**: a 500 error envelope carrying the panic message. The
//!   spawned task is the only recover boundary; the panic never reaches
//!   axum.
//! - **TimedOut**: a 408 envelope with the message `Request timed out!`
//!   plus any detail returned by the path's responder.
//!
//! # Detached Continuations
//!
//! A timed-out continuation is **not aborted**. Its join handle is dropped
//! and it runs to completion in the background, since handlers may be
//! halfway through non-idempotent work. Handlers that want to stop early
//! can extract the [`TimeoutSignal`] and await [`TimeoutSignal::cancelled`].
//!
//! # Ties
//!
//! When the continuation and the timer become ready in the same poll,
//! `tokio::select!` picks a branch at random. Either outcome is valid.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::context::Event;
use super::panic::panic_message;
use super::request::{PathFilter, RequestMeta, normalize_path};
use crate::config::{DEFAULT_TIMEOUT, TimeoutConfig, timeout_from_millis};
use crate::error::ErrorResp;
use crate::metrics;

/// Message of the 408 envelope.
pub const TIMEOUT_MESSAGE: &str = "Request timed out!";

/// Event counter set when the deadline wins the race.
pub const TIMEOUT_COUNTER: &str = "timeout";

/// Event counter set when the continuation panics.
pub const PANIC_COUNTER: &str = "panic";

/// Produces an extra detail for the 408 body when a request times out.
pub type TimeoutResponder = Arc<dyn Fn(&RequestMeta) -> Option<String> + Send + Sync>;

/// Deadline and optional responder for one route (or the global default).
#[derive(Clone)]
pub struct TimeoutPolicy {
    timeout: Duration,
    responder: Option<TimeoutResponder>,
}

impl TimeoutPolicy {
    /// A zero duration is replaced by [`DEFAULT_TIMEOUT`]; it never means "no timeout".
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: if timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                timeout
            },
            responder: None,
        }
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&RequestMeta) -> Option<String> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn respond(&self, meta: &RequestMeta) -> Option<String> {
        self.responder.as_ref().and_then(|responder| responder(meta))
    }
}

impl fmt::Debug for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("timeout", &self.timeout)
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

/// Cancellation signal handed to the continuation through request extensions.
///
/// It fires when the request times out. Observing it is optional; the
/// continuation is never killed.
///
/// ```rust,ignore
/// async fn slow(Extension(signal): Extension<TimeoutSignal>) -> StatusCode {
///     tokio::select! {
///         _ = signal.cancelled() => StatusCode::REQUEST_TIMEOUT,
///         _ = expensive_work() => StatusCode::OK,
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TimeoutSignal(CancellationToken);

impl TimeoutSignal {
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Child token for passing into further spawned work.
    pub fn child_token(&self) -> CancellationToken {
        self.0.child_token()
    }
}

/// Result of racing one continuation against its deadline.
#[derive(Debug)]
pub enum RaceOutcome<T> {
    Completed(T),
    Panicked(String),
    TimedOut,
}

/// Run `continuation` on its own task and race it against `timeout`.
///
/// On [`RaceOutcome::TimedOut`] the task is detached, not aborted. A panic
/// or result it produces later is dropped with the join handle.
pub async fn race<F>(timeout: Duration, continuation: F) -> RaceOutcome<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut handle = tokio::spawn(continuation);

    tokio::select! {
        joined = &mut handle => match joined {
            Ok(output) => RaceOutcome::Completed(output),
            Err(err) if err.is_panic() => RaceOutcome::Panicked(panic_message(err.into_panic())),
            // Only reachable when the runtime is shutting down underneath us
            Err(err) => RaceOutcome::Panicked(err.to_string()),
        },
        () = tokio::time::sleep(timeout) => RaceOutcome::TimedOut,
    }
}

#[derive(Clone)]
struct Policies {
    global: TimeoutPolicy,
    by_path: HashMap<String, TimeoutPolicy>,
    ignore: PathFilter,
}

impl Policies {
    fn lookup(&self, path: &str) -> &TimeoutPolicy {
        self.by_path.get(path).unwrap_or(&self.global)
    }
}

/// Timeout layer for the tower middleware stack.
///
/// Path policies match exactly; every other path uses the global policy.
///
/// # Example
///
/// ```rust,ignore
/// let layer = TimeoutLayer::new(Duration::from_secs(5))
///     .with_path("/v1/report", Duration::from_secs(60))
///     .with_path_responder("/v1/search", Duration::from_secs(2), |meta| {
///         Some(format!("search on {} took too long", meta.path))
///     });
/// let app = Router::new().route("/v1/report", get(report)).layer(layer);
/// ```
#[derive(Clone)]
pub struct TimeoutLayer {
    policies: Arc<Policies>,
}

impl TimeoutLayer {
    pub fn new(global: Duration) -> Self {
        Self {
            policies: Arc::new(Policies {
                global: TimeoutPolicy::new(global),
                by_path: HashMap::new(),
                ignore: PathFilter::default(),
            }),
        }
    }

    /// Build from boot configuration, merging the entry-wide ignore list.
    pub fn from_config(config: &TimeoutConfig, global_ignore: &[String]) -> Self {
        let mut layer = Self::new(timeout_from_millis(config.timeout_ms))
            .with_ignore(PathFilter::merged(global_ignore, &config.ignore));

        for path in &config.paths {
            layer = layer.with_path(&path.path, timeout_from_millis(path.timeout_ms));
        }

        layer
    }

    fn policies_mut(&mut self) -> &mut Policies {
        Arc::make_mut(&mut self.policies)
    }

    /// Set the responder used by the global policy.
    pub fn with_global_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&RequestMeta) -> Option<String> + Send + Sync + 'static,
    {
        let policies = self.policies_mut();
        policies.global = policies.global.clone().with_responder(responder);
        self
    }

    pub fn with_path(self, path: &str, timeout: Duration) -> Self {
        self.with_policy(path, TimeoutPolicy::new(timeout))
    }

    pub fn with_path_responder<F>(self, path: &str, timeout: Duration, responder: F) -> Self
    where
        F: Fn(&RequestMeta) -> Option<String> + Send + Sync + 'static,
    {
        self.with_policy(path, TimeoutPolicy::new(timeout).with_responder(responder))
    }

    /// Register a policy for an exact path; the path gets a leading `/` if missing.
    pub fn with_policy(mut self, path: &str, policy: TimeoutPolicy) -> Self {
        self.policies_mut()
            .by_path
            .insert(normalize_path(path), policy);
        self
    }

    /// Paths under these prefixes pass through without a deadline.
    pub fn with_ignore(mut self, ignore: PathFilter) -> Self {
        self.policies_mut().ignore = ignore;
        self
    }

    /// Policy applied to `path`; never fails.
    pub fn policy_for(&self, path: &str) -> &TimeoutPolicy {
        self.policies.lookup(path)
    }
}

impl fmt::Debug for TimeoutLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutLayer")
            .field("global", &self.policies.global)
            .field("by_path", &self.policies.by_path)
            .finish()
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            policies: self.policies.clone(),
        }
    }
}

/// Timeout service wrapper.
#[derive(Clone)]
pub struct TimeoutService<S> {
    inner: S,
    policies: Arc<Policies>,
}

impl<S> Service<Request<Body>> for TimeoutService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if self.policies.ignore.is_ignored(req.uri().path()) {
            return Box::pin(inner.call(req));
        }

        let policies = self.policies.clone();
        let meta = RequestMeta::from_request(&req);
        let route = metrics::route_label(&req);
        let event = Event::get_or_insert(&mut req);
        let token = CancellationToken::new();
        req.extensions_mut().insert(TimeoutSignal(token.clone()));

        Box::pin(async move {
            let policy = policies.lookup(&meta.path);

            match race(policy.timeout, async move { inner.call(req).await }).await {
                RaceOutcome::Completed(result) => result,
                RaceOutcome::Panicked(message) => Ok(panic_response(&event, &meta, message)),
                RaceOutcome::TimedOut => {
                    token.cancel();
                    Ok(timeout_response(&event, &meta, &route, policy))
                }
            }
        })
    }
}

fn panic_response(event: &Event, meta: &RequestMeta, message: String) -> Response<Body> {
    event.set_counter(PANIC_COUNTER, 1);
    event.add_err(&message);
    metrics::record_panic();

    error!(
        method = %meta.method,
        path = %meta.path,
        panic = %message,
        "Recovered panic in request handler"
    );

    ErrorResp::new(StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}

fn timeout_response(
    event: &Event,
    meta: &RequestMeta,
    route: &str,
    policy: &TimeoutPolicy,
) -> Response<Body> {
    event.set_counter(TIMEOUT_COUNTER, 1);
    metrics::record_timeout(route);

    let details = policy.respond(meta);
    if let Some(detail) = &details {
        debug!(path = %meta.path, detail = %detail, "Custom timeout responder returned detail");
    }

    warn!(
        method = %meta.method,
        path = %meta.path,
        timeout_ms = u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
        "Request timed out"
    );

    ErrorResp::new(StatusCode::REQUEST_TIMEOUT, TIMEOUT_MESSAGE)
        .with_details(details)
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::routing::get;
    use axum::{Extension, Router};
    use serde_json::Value;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    async fn sleep_h() -> StatusCode {
        tokio::time::sleep(Duration::from_secs(2)).await;
        StatusCode::OK
    }

    async fn panic_h() -> StatusCode {
        panic!("ut panic");
    }

    async fn return_h() -> StatusCode {
        StatusCode::OK
    }

    fn app(layer: TimeoutLayer) -> Router {
        Router::new()
            .route("/", get(sleep_h))
            .route("/timeout", get(sleep_h))
            .route("/happy", get(return_h))
            .route("/panic", get(panic_h))
            .layer(layer)
    }

    async fn send(app: Router, path: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_global_timeout() {
        let (status, body) = send(app(TimeoutLayer::new(Duration::from_nanos(1))), "/").await;

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["error"]["code"], 408);
        assert_eq!(body["error"]["message"], TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_timeout_by_path() {
        let layer = TimeoutLayer::new(Duration::from_secs(60)).with_path("/", Duration::from_nanos(1));
        let (status, _) = send(app(layer), "/").await;

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_per_path_isolation() {
        let layer = TimeoutLayer::new(DEFAULT_TIMEOUT)
            .with_path("/timeout", Duration::from_nanos(1))
            .with_path("/happy", Duration::from_secs(60));
        let app = app(layer);

        let (status, _) = send(app.clone(), "/timeout").await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

        let (status, _) = send(app, "/happy").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_fast_handler_keeps_its_response() {
        let (status, body) = send(app(TimeoutLayer::new(Duration::from_secs(60))), "/happy").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let (status, body) = send(app(TimeoutLayer::new(Duration::from_secs(60))), "/panic").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], 500);
        assert_eq!(body["error"]["message"], "ut panic");
    }

    #[tokio::test]
    async fn test_formatted_panic_payload() {
        let app = Router::new()
            .route(
                "/",
                get(|| async {
                    let code = 42;
                    if code > 0 {
                        panic!("failed with code {code}");
                    }
                    StatusCode::OK
                }),
            )
            .layer(TimeoutLayer::new(Duration::from_secs(60)));

        let (status, body) = send(app, "/").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "failed with code 42");
    }

    #[tokio::test]
    async fn test_error_panic_payload() {
        #[derive(Debug)]
        struct UtError;

        impl fmt::Display for UtError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("ut panic")
            }
        }

        impl std::error::Error for UtError {}

        let app = Router::new()
            .route(
                "/",
                get(|| async {
                    if true {
                        std::panic::panic_any(
                            Box::new(UtError) as Box<dyn std::error::Error + Send + Sync>
                        );
                    }
                    StatusCode::OK
                }),
            )
            .layer(TimeoutLayer::new(Duration::from_secs(60)));

        let (status, body) = send(app, "/").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "ut panic");
    }

    #[tokio::test]
    async fn test_timeout_metric_uses_route_template() {
        metrics::init_metrics().unwrap();

        let app = Router::new()
            .route("/ut-items/{id}", get(sleep_h))
            .layer(TimeoutLayer::new(Duration::from_nanos(1)));

        let (status, _) = send(app.clone(), "/ut-items/7").await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        send(app, "/ut-items/8").await;

        let rendered = metrics::render().unwrap();
        assert!(rendered.contains(r#"axum_boot_timeouts_total{path="/ut-items/{id}"}"#));
        assert!(!rendered.contains(r#"path="/ut-items/7""#));
    }

    #[tokio::test]
    async fn test_custom_responder_detail() {
        let layer = TimeoutLayer::new(DEFAULT_TIMEOUT).with_path_responder(
            "timeout",
            Duration::from_nanos(1),
            |meta| Some(format!("custom error on {}", meta.path)),
        );
        let (status, body) = send(app(layer), "/timeout").await;

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["error"]["details"][0], "custom error on /timeout");
    }

    #[tokio::test]
    async fn test_global_responder_returning_none_adds_nothing() {
        let layer = TimeoutLayer::new(Duration::from_nanos(1)).with_global_responder(|_| None);
        let (_, body) = send(app(layer), "/").await;

        assert_eq!(body["error"]["details"], Value::Array(vec![]));
    }

    #[test]
    fn test_policy_lookup_exact_match_only() {
        let layer = TimeoutLayer::new(Duration::from_secs(3)).with_path("/happy", Duration::from_secs(60));

        assert_eq!(layer.policy_for("/happy").timeout(), Duration::from_secs(60));
        assert_eq!(layer.policy_for("/happy/sub").timeout(), Duration::from_secs(3));
        assert_eq!(layer.policy_for("/hap").timeout(), Duration::from_secs(3));
        assert_eq!(layer.policy_for("").timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_zero_duration_is_default() {
        let layer = TimeoutLayer::new(Duration::ZERO).with_path("/x", Duration::ZERO);

        assert_eq!(layer.policy_for("/").timeout(), DEFAULT_TIMEOUT);
        assert_eq!(layer.policy_for("/x").timeout(), DEFAULT_TIMEOUT);
        assert_eq!(TimeoutPolicy::new(DEFAULT_TIMEOUT).timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_from_config() {
        let config = TimeoutConfig {
            enabled: true,
            ignore: vec!["/static/".to_string()],
            timeout_ms: 0,
            paths: vec![crate::config::PathTimeout {
                path: "slow".to_string(),
                timeout_ms: 30_000,
            }],
        };
        let layer = TimeoutLayer::from_config(&config, &["/rk/v1/".to_string()]);

        assert_eq!(layer.policy_for("/").timeout(), DEFAULT_TIMEOUT);
        assert_eq!(layer.policy_for("/slow").timeout(), Duration::from_secs(30));
        assert!(layer.policies.ignore.is_ignored("/rk/v1/ready"));
        assert!(layer.policies.ignore.is_ignored("/static/app.js"));
    }

    #[tokio::test]
    async fn test_ignored_path_has_no_deadline() {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    StatusCode::OK
                }),
            )
            .layer(
                TimeoutLayer::new(Duration::from_nanos(1)).with_ignore(PathFilter::new(["/slow"])),
            );

        let (status, _) = send(app, "/slow").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_inner_error_propagates() {
        let svc = TimeoutLayer::new(Duration::from_secs(60))
            .layer(tower::service_fn(|_req: Request<Body>| async {
                Err::<Response<Body>, &'static str>("boom")
            }));

        let result = svc
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn test_event_counters() {
        let svc = TimeoutLayer::new(Duration::from_nanos(1)).layer(tower::service_fn(
            |_req: Request<Body>| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, std::convert::Infallible>(StatusCode::OK.into_response())
            },
        ));

        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let event = Event::get_or_insert(&mut req);
        let response = svc.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(event.counter(TIMEOUT_COUNTER), Some(1));
        assert_eq!(event.counter(PANIC_COUNTER), None);
    }

    #[tokio::test]
    async fn test_panic_counter_and_error_recorded() {
        let svc = TimeoutLayer::new(Duration::from_secs(60)).layer(tower::service_fn(
            |_req: Request<Body>| async {
                if true {
                    panic!("ut panic");
                }
                Ok::<_, std::convert::Infallible>(StatusCode::OK.into_response())
            },
        ));

        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let event = Event::get_or_insert(&mut req);
        let response = svc.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(event.counter(PANIC_COUNTER), Some(1));
        assert_eq!(event.errors(), vec!["ut panic".to_string()]);
    }

    #[tokio::test]
    async fn test_signal_fires_on_timeout() {
        type Notify = Arc<Mutex<Option<oneshot::Sender<()>>>>;

        let (tx, rx) = oneshot::channel();
        let notify: Notify = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new()
            .route(
                "/",
                get(
                    |Extension(signal): Extension<TimeoutSignal>,
                     Extension(notify): Extension<Notify>| async move {
                        signal.cancelled().await;
                        let sender = notify.lock().unwrap().take();
                        if let Some(sender) = sender {
                            let _ = sender.send(());
                        }
                        StatusCode::OK
                    },
                ),
            )
            .layer(Extension(notify))
            .layer(TimeoutLayer::new(Duration::from_millis(10)));

        let (status, _) = send(app, "/").await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

        let observed = tokio::time::timeout(Duration::from_secs(1), rx).await;
        assert!(matches!(observed, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_continuation_not_aborted_after_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let svc = TimeoutLayer::new(Duration::from_millis(5)).layer(tower::service_fn(
            move |_req: Request<Body>| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(StatusCode::OK.into_response())
                }
            },
        ));

        let response = svc
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_race_outcomes() {
        assert!(matches!(
            race(Duration::from_secs(60), async { 7 }).await,
            RaceOutcome::Completed(7)
        ));
        assert!(matches!(
            race(Duration::from_millis(1), async {
                tokio::time::sleep(Duration::from_secs(2)).await;
            })
            .await,
            RaceOutcome::TimedOut
        ));

        match race(Duration::from_secs(60), async {
            if true {
                panic!("inside race");
            }
        })
        .await
        {
            RaceOutcome::Panicked(message) => assert_eq!(message, "inside race"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_late_panic_is_inert() {
        // Panics after the deadline land in a dropped join handle
        let outcome = race(Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            panic!("too late");
        })
        .await;
        assert!(matches!(outcome, RaceOutcome::TimedOut));

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
