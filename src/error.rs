use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while loading boot configuration or running an entry.
///
/// Request-level failures never use this type; middleware answers those
/// with an [`ErrorResp`] envelope instead.
#[derive(Error, Debug)]
pub enum BootError {
    #[error("Failed to read boot config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse boot config: {0}")]
    ConfigParse(#[from] serde_yml::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Rate limit configuration error: {0}")]
    RateLimit(#[from] crate::middleware::RateLimitError),

    #[error("JWT configuration error: {0}")]
    Jwt(#[from] crate::middleware::JwtError),
}

/// Convenience type alias for Results with BootError.
pub type BootResult<T> = Result<T, BootError>;

/// JSON error envelope written by middleware that terminates a request.
///
/// ```json
/// {"error": {"code": 408, "status": "Request Timeout", "message": "Request timed out!", "details": []}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResp {
    pub error: ErrorBody,
}

/// Body of [`ErrorResp`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// HTTP status code, repeated in the body for clients that only see JSON
    pub code: u16,
    /// Canonical reason phrase for `code`
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub details: Vec<Value>,
}

impl ErrorResp {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: status.as_u16(),
                status: status.canonical_reason().unwrap_or_default().to_string(),
                message: message.into(),
                details: Vec::new(),
            },
        }
    }

    /// Append supplementary details (custom responder output, recovered errors).
    pub fn with_details<I, V>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.error.details.extend(details.into_iter().map(Into::into));
        self
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.error.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ErrorResp {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_resp_shape() {
        let resp = ErrorResp::new(StatusCode::REQUEST_TIMEOUT, "Request timed out!")
            .with_details(["custom error"]);
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["error"]["code"], 408);
        assert_eq!(json["error"]["status"], "Request Timeout");
        assert_eq!(json["error"]["message"], "Request timed out!");
        assert_eq!(json["error"]["details"][0], "custom error");
    }

    #[test]
    fn test_error_resp_into_response_status() {
        let response = ErrorResp::new(StatusCode::TOO_MANY_REQUESTS, "slow down").into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_empty_details_serialized_as_array() {
        let json = serde_json::to_string(&ErrorResp::new(StatusCode::FORBIDDEN, "no")).unwrap();
        assert!(json.contains(r#""details":[]"#));
    }
}
