//! CORS layer built from `middleware.cors`.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::config::CorsConfig;

/// Build a CORS layer from configuration.
///
/// `*` in `allowOrigins` and empty method/header lists mean "any". With
/// `allowCredentials` the wildcard is replaced by mirroring the request,
/// since browsers reject `*` together with credentials.
///
/// # Security Note
///
/// Allowing any origin is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
pub fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    let credentials = config.allow_credentials;
    let any_origin = config.allow_origins.is_empty() || config.allow_origins.iter().any(|o| o == "*");

    let origin = if any_origin {
        if credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::from(Any)
        }
    } else {
        AllowOrigin::list(parse_all(&config.allow_origins, "origin", |o| {
            HeaderValue::try_from(o).ok()
        }))
    };

    let methods = if config.allow_methods.is_empty() {
        if credentials {
            AllowMethods::mirror_request()
        } else {
            AllowMethods::from(Any)
        }
    } else {
        AllowMethods::list(parse_all(&config.allow_methods, "method", |m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok()
        }))
    };

    let headers = if config.allow_headers.is_empty() {
        if credentials {
            AllowHeaders::mirror_request()
        } else {
            AllowHeaders::from(Any)
        }
    } else {
        AllowHeaders::list(parse_all(&config.allow_headers, "header", |h| {
            HeaderName::try_from(h).ok()
        }))
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(credentials);

    if !config.expose_headers.is_empty() {
        layer = layer.expose_headers(parse_all(&config.expose_headers, "expose header", |h| {
            HeaderName::try_from(h).ok()
        }));
    }

    if config.max_age > 0 {
        layer = layer.max_age(Duration::from_secs(config.max_age));
    }

    layer
}

fn parse_all<T>(raw: &[String], kind: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    raw.iter()
        .filter_map(|value| {
            let parsed = parse(value.trim());
            if parsed.is_none() {
                warn!(kind, value = %value, "Invalid CORS value, skipping");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, header};
    use axum::routing::get;
    use tower::ServiceExt;

    async fn preflight(config: CorsConfig, origin: &str) -> axum::http::HeaderMap {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(build_cors_layer(&config));

        app.oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .headers()
        .clone()
    }

    #[tokio::test]
    async fn test_any_origin() {
        let headers = preflight(CorsConfig::default(), "https://a.example").await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_specific_origins() {
        let config = CorsConfig {
            allow_origins: vec!["https://app.example.com".to_string()],
            max_age: 600,
            ..CorsConfig::default()
        };

        let allowed = preflight(config.clone(), "https://app.example.com").await;
        assert_eq!(
            allowed[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert_eq!(allowed[header::ACCESS_CONTROL_MAX_AGE], "600");

        let denied = preflight(config, "https://evil.example").await;
        assert!(!denied.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_credentials_mirror_origin() {
        let config = CorsConfig {
            allow_credentials: true,
            ..CorsConfig::default()
        };
        let headers = preflight(config, "https://b.example").await;

        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://b.example");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn test_invalid_values_skipped() {
        let parsed = parse_all(
            &["GET".to_string(), "bad method".to_string()],
            "method",
            |m| Method::from_bytes(m.as_bytes()).ok(),
        );
        assert_eq!(parsed, vec![Method::GET]);
    }
}
