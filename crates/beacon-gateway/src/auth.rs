use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::app::AppState;

/// Route layer guarding `/api/*` with `server.cron_secret`.
///
/// With no secret configured every request passes.
pub async fn require_cron_secret(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(secret) = state.config.server.cron_secret.as_deref() {
        if let Err(reason) = verify_bearer_token(request.headers(), secret) {
            warn!(reason = %reason, path = %request.uri().path(), "cron authentication failed");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "authentication failed", "reason": reason})),
            )
                .into_response();
        }
    }
    next.run(request).await
}

/// Verify a static bearer token in the `Authorization: Bearer <token>` header.
fn verify_bearer_token(headers: &HeaderMap, expected: &str) -> Result<(), String> {
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Authorization header".to_string())?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| "Authorization header must use Bearer scheme".to_string())?;

    if token == expected {
        Ok(())
    } else {
        Err("bearer token mismatch".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("authorization", HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn accepts_matching_token() {
        assert!(verify_bearer_token(&headers("Bearer s3cret"), "s3cret").is_ok());
    }

    #[test]
    fn rejects_wrong_scheme_and_token() {
        assert_eq!(
            verify_bearer_token(&headers("Basic s3cret"), "s3cret").unwrap_err(),
            "Authorization header must use Bearer scheme"
        );
        assert_eq!(
            verify_bearer_token(&headers("Bearer nope"), "s3cret").unwrap_err(),
            "bearer token mismatch"
        );
        assert_eq!(
            verify_bearer_token(&HeaderMap::new(), "s3cret").unwrap_err(),
            "missing Authorization header"
        );
    }
}
