//! Demo endpoint registered by the binary.

use axum::Json;
use axum::extract::Query;
use serde::Deserialize;

use crate::models::GreeterResponse;

#[derive(Debug, Deserialize)]
pub struct GreeterParams {
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /v1/greeter?name=<name>`
pub async fn greeter(Query(params): Query<GreeterParams>) -> Json<GreeterResponse> {
    let name = params.name.filter(|n| !n.is_empty());
    Json(GreeterResponse {
        message: format!("Hello {}!", name.as_deref().unwrap_or("world")),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_greeter() {
        let Json(named) = greeter(Query(GreeterParams {
            name: Some("rk".to_string()),
        }))
        .await;
        assert_eq!(named.message, "Hello rk!");

        let Json(anonymous) = greeter(Query(GreeterParams { name: None })).await;
        assert_eq!(anonymous.message, "Hello world!");
    }
}
