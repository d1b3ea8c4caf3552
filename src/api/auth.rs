//! API key authentication
//!
//! When `ApiConfig::api_key` is set, every route except `/health` requires a
//! matching `X-Api-Key` header and answers 401 otherwise.

use crate::error::ApiError;
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Header carrying the key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Paths reachable without a key (liveness probes)
const PUBLIC_PATHS: &[&str] = &["/health"];

/// Middleware rejecting requests whose `X-Api-Key` does not match the configured key
///
/// ```no_run
/// use axum::{Router, middleware};
/// use shorts_dl::api::auth::require_api_key;
///
/// let router: Router = Router::new().layer(middleware::from_fn_with_state(
///     Some("secret".to_string()),
///     require_api_key,
/// ));
/// ```
pub async fn require_api_key(
    State(expected_api_key): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected_key) = expected_api_key else {
        return next.run(request).await;
    };
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(key.as_bytes(), expected_key.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => {
            tracing::debug!(path = %request.uri().path(), "rejected request with wrong API key");
            unauthorized("Invalid API key")
        }
        None => unauthorized("Missing X-Api-Key header"),
    }
}

/// Compare every byte so timing does not reveal the mismatch position
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::unauthorized(message))).into_response()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, middleware, routing::get};
    use tower::ServiceExt;

    fn app(key: Option<&str>) -> Router {
        Router::new()
            .route("/tasks/1", get(|| async { "task" }))
            .route("/health", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                key.map(str::to_string),
                require_api_key,
            ))
    }

    async fn call(app: Router, path: &str, key: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(path);
        if let Some(key) = key {
            builder = builder.header("X-Api-Key", key);
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn error_code(response: Response) -> (String, String) {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: ApiError = serde_json::from_slice(&body).unwrap();
        (error.error.code, error.error.message)
    }

    #[tokio::test]
    async fn test_open_when_no_key_configured() {
        let response = call(app(None), "/tasks/1", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_matching_key_passes() {
        let response = call(app(Some("s3cret")), "/tasks/1", Some("s3cret")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let response = call(app(Some("s3cret")), "/tasks/1", Some("S3CRET")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let (code, message) = error_code(response).await;
        assert_eq!(code, "unauthorized");
        assert_eq!(message, "Invalid API key");
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let response = call(app(Some("s3cret")), "/tasks/1", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let (_, message) = error_code(response).await;
        assert_eq!(message, "Missing X-Api-Key header");
    }

    #[tokio::test]
    async fn test_key_is_not_trimmed() {
        let response = call(app(Some("key ")), "/tasks/1", Some("key")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = call(app(Some("s3cret")), "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
