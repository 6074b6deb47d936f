//! Framework-neutral view of an incoming request.
//!
//! Middleware policies (timeout responders, auth, CSRF, logging) work on a
//! [`RequestMeta`] snapshot instead of the axum request itself, so the
//! request can be moved into the inner service while the policy keeps what
//! it needs.

use std::sync::Arc;

use axum::http::{HeaderMap, Method, Request};

use super::ip::{TrustedProxyConfig, extract_client_ip_with_validation};

/// Snapshot of the parts of a request that middleware policies inspect.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub client_ip: String,
}

impl RequestMeta {
    /// Snapshot a request, trusting forwarding headers from any peer.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self::from_request_with_proxies(req, &TrustedProxyConfig::default())
    }

    /// Snapshot a request, resolving the client IP against trusted proxies.
    pub fn from_request_with_proxies<B>(req: &Request<B>, proxies: &TrustedProxyConfig) -> Self {
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            query: req.uri().query().map(str::to_string),
            headers: req.headers().clone(),
            client_ip: extract_client_ip_with_validation(req, proxies).into_owned(),
        }
    }

    /// Header value as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }

    /// Whether the client reached us over TLS, as reported by a proxy.
    pub fn is_https(&self) -> bool {
        self.header("x-forwarded-proto")
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
    }
}

/// Ensure a configured path starts with `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Set of path prefixes a middleware skips.
///
/// Built from the entry-wide `middleware.ignore` list plus the middleware's
/// own `ignore` list.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    prefixes: Arc<Vec<String>>,
}

impl PathFilter {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .map(|p| normalize_path(&p))
            .collect();
        Self {
            prefixes: Arc::new(prefixes),
        }
    }

    /// Combine the global ignore list with a middleware-specific one.
    pub fn merged(global: &[String], local: &[String]) -> Self {
        Self::new(global.iter().chain(local.iter()))
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_request_meta_snapshot() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/v1/greeter?name=rk&x=1")
            .header("x-forwarded-for", "10.0.0.9")
            .header("x-forwarded-proto", "HTTPS")
            .body(Body::empty())
            .unwrap();

        let meta = RequestMeta::from_request(&req);
        assert_eq!(meta.method, Method::POST);
        assert_eq!(meta.path, "/v1/greeter");
        assert_eq!(meta.query.as_deref(), Some("name=rk&x=1"));
        assert_eq!(meta.client_ip, "10.0.0.9");
        assert_eq!(meta.query_param("name"), Some("rk"));
        assert_eq!(meta.query_param("missing"), None);
        assert!(meta.is_https());
    }

    #[test]
    fn test_query_param_without_value() {
        let req = Request::builder().uri("/?flag").body(Body::empty()).unwrap();
        let meta = RequestMeta::from_request(&req);
        assert_eq!(meta.query_param("flag"), Some(""));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("timeout"), "/timeout");
        assert_eq!(normalize_path("/timeout"), "/timeout");
        assert_eq!(normalize_path(" /x "), "/x");
    }

    #[test]
    fn test_path_filter_prefix_match() {
        let filter = PathFilter::merged(&["/rk/v1/".to_string()], &["metrics".to_string()]);
        assert!(filter.is_ignored("/rk/v1/ready"));
        assert!(filter.is_ignored("/metrics"));
        assert!(!filter.is_ignored("/v1/greeter"));
    }

    #[test]
    fn test_path_filter_empty_entries_dropped() {
        let filter = PathFilter::new(["", "  "]);
        assert!(filter.is_empty());
        assert!(!filter.is_ignored("/anything"));
    }
}
