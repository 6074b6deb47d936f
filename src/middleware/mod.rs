//! HTTP middleware chain for boot entries.
//!
//! Every middleware is a tower `Layer`/`Service` pair over
//! `Request<Body>`/`Response<Body>`, passing the inner error type through.
//!
//! # Architecture
//!
//! The entry applies enabled layers in this order, outermost first:
//!
//! ```text
//! Request → Logging → Panic → Metrics → Trace → JWT → Secure → CSRF → CORS
//!         → Meta → Auth → Timeout → Rate Limit → Handler
//! ```
//!
//! Terminal answers: panic 500, JWT 401, CSRF 400/403, auth 401/429,
//! timeout 408/500, rate limit 429.
//!
//! Logging creates the request [`Event`]; inner layers record counters and
//! errors on it. Global `middleware.ignore` prefixes, merged with each
//! layer's own `ignore`, skip logging, metrics, JWT, secure headers, CSRF,
//! auth, timeout and rate limiting.
//!
//! # Security Considerations
//!
//! - Credential and CSRF token comparison uses constant-time equality
//! - Trusted proxy configuration mitigates IP spoofing for rate limiting
//!   and auth failure tracking

pub mod auth;
pub mod context;
pub mod cors;
pub mod csrf;
pub mod ip;
pub mod jwt;
pub mod logging;
pub mod meta;
pub mod panic;
pub mod prom;
pub mod rate_limit;
pub mod request;
pub mod secure;
pub mod timeout;

pub use auth::AuthLayer;
pub use context::Event;
pub use cors::build_cors_layer;
pub use csrf::{CsrfLayer, CsrfToken};
pub use ip::{
    TrustedProxyConfig, UNKNOWN_IP, extract_client_ip, extract_client_ip_with_validation,
};
pub use jwt::{JWT_INVALID_MESSAGE, JwtError, JwtLayer, JwtToken};
pub use logging::LoggingLayer;
pub use meta::{MetaLayer, REQUEST_ID_HEADER, RequestIdExt};
pub use panic::{install_panic_hook, panic_layer, panic_message};
pub use prom::PromLayer;
pub use rate_limit::{RateLimitError, RateLimitLayer};
pub use request::{PathFilter, RequestMeta, normalize_path};
pub use secure::SecureLayer;
pub use timeout::{
    RaceOutcome, TIMEOUT_MESSAGE, TimeoutLayer, TimeoutPolicy, TimeoutResponder, TimeoutSignal,
    race,
};
