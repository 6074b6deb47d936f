//! Bearer token (JWT) validation middleware.
//!
//! The token is read from a header (default `Authorization: Bearer <jwt>`)
//! or a query parameter, verified with `jsonwebtoken` and stored in the
//! request extensions as a [`JwtToken`]. Missing, malformed, expired or
//! badly signed tokens get a 401 envelope with the cause in `details`.
//!
//! # Configuration
//!
//! ```yaml
//! middleware:
//!   jwt:
//!     enabled: true
//!     ignore: ["/v1/login"]
//!     algorithm: HS256
//!     secret: my-secret
//!     tokenLookup: "header:Authorization"
//!     authScheme: Bearer
//! ```
//!
//! Handlers read the claims with `Extension<JwtToken>`.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode};
use serde_json::Value;
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::request::{PathFilter, RequestMeta};
use crate::config::{JwtConfig, TokenLookup};
use crate::error::ErrorResp;

/// Message of every 401 written by this middleware.
pub const JWT_INVALID_MESSAGE: &str = "invalid or expired jwt";

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("unsupported algorithm '{0}'")]
    Algorithm(String),

    #[error("{algorithm:?} needs a non-empty {field}")]
    MissingKey {
        algorithm: Algorithm,
        field: &'static str,
    },

    #[error("invalid key: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),

    #[error("invalid tokenLookup '{0}'")]
    Lookup(String),
}

/// A verified token, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct JwtToken {
    pub header: Header,
    pub claims: Value,
}

impl JwtToken {
    /// Claim by name, e.g. `sub`.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

struct Verifier {
    key: DecodingKey,
    validation: Validation,
    lookup: TokenLookup,
    scheme: String,
}

#[derive(Clone)]
pub struct JwtLayer {
    verifier: Arc<Verifier>,
    ignore: PathFilter,
}

impl JwtLayer {
    /// HS256 with a shared secret, reading `Authorization: Bearer`.
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            verifier: Arc::new(Verifier {
                key: DecodingKey::from_secret(secret),
                validation: Validation::new(Algorithm::HS256),
                lookup: TokenLookup::Header("Authorization".to_string()),
                scheme: "Bearer".to_string(),
            }),
            ignore: PathFilter::default(),
        }
    }

    /// # Errors
    ///
    /// Returns `JwtError` for an unknown algorithm, a missing or unparsable
    /// key, or an invalid `tokenLookup`.
    pub fn from_config(config: &JwtConfig, global_ignore: &[String]) -> Result<Self, JwtError> {
        let algorithm = Algorithm::from_str(config.algorithm.trim())
            .map_err(|_| JwtError::Algorithm(config.algorithm.clone()))?;
        let key = decoding_key(algorithm, config)?;
        let lookup = TokenLookup::parse(&config.token_lookup)
            .ok_or_else(|| JwtError::Lookup(config.token_lookup.clone()))?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = config.leeway_sec;

        Ok(Self {
            verifier: Arc::new(Verifier {
                key,
                validation,
                lookup,
                scheme: config.auth_scheme.trim().to_string(),
            }),
            ignore: PathFilter::merged(global_ignore, &config.ignore),
        })
    }

    pub fn with_ignore(mut self, ignore: PathFilter) -> Self {
        self.ignore = ignore;
        self
    }
}

fn decoding_key(algorithm: Algorithm, config: &JwtConfig) -> Result<DecodingKey, JwtError> {
    let (field, material) = match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => ("secret", &config.secret),
        _ => ("publicKey", &config.public_key),
    };
    if material.is_empty() {
        return Err(JwtError::MissingKey { algorithm, field });
    }

    let pem = material.as_bytes();
    Ok(match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => DecodingKey::from_secret(pem),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem)?,
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem)?,
        _ => DecodingKey::from_rsa_pem(pem)?,
    })
}

impl<S> Layer<S> for JwtLayer {
    type Service = JwtService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JwtService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct JwtService<S> {
    inner: S,
    layer: JwtLayer,
}

impl Verifier {
    fn extract<'a>(&self, meta: &'a RequestMeta) -> Result<&'a str, &'static str> {
        let raw = match &self.lookup {
            TokenLookup::Header(name) => {
                let value = meta.header(name).ok_or("missing jwt")?;
                if self.scheme.is_empty() {
                    value
                } else {
                    value
                        .split_once(' ')
                        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case(&self.scheme))
                        .map(|(_, token)| token)
                        .ok_or("malformed jwt")?
                }
            }
            TokenLookup::Query(name) => meta.query_param(name).ok_or("missing jwt")?,
        };

        let token = raw.trim();
        if token.is_empty() {
            Err("missing jwt")
        } else {
            Ok(token)
        }
    }

    fn verify(&self, meta: &RequestMeta) -> Result<JwtToken, String> {
        let token = self.extract(meta)?;
        decode::<Value>(token, &self.key, &self.validation)
            .map(|data| JwtToken {
                header: data.header,
                claims: data.claims,
            })
            .map_err(|e| e.to_string())
    }
}

impl<S> Service<Request<Body>> for JwtService<S>
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

        if self.layer.ignore.is_ignored(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let meta = RequestMeta::from_request(&req);
        match self.layer.verifier.verify(&meta) {
            Ok(token) => {
                debug!(path = %meta.path, "JWT accepted");
                req.extensions_mut().insert(token);
                Box::pin(async move { inner.call(req).await })
            }
            Err(cause) => {
                warn!(path = %meta.path, cause = %cause, "JWT rejected");
                let response = ErrorResp::new(StatusCode::UNAUTHORIZED, JWT_INVALID_MESSAGE)
                    .with_details([cause])
                    .into_response();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
