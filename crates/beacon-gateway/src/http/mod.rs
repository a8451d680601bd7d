pub mod cron;
pub mod health;
pub mod jobs;

use axum::{http::StatusCode, Json};
use beacon_jobs::JobError;
use serde_json::{json, Value};
use tracing::error;

pub type ApiError = (StatusCode, Json<Value>);

/// Map a scheduler error onto an HTTP status and `{"error", "code"}` body.
pub fn job_error(e: JobError) -> ApiError {
    let status = if e.is_caller_error() {
        StatusCode::BAD_REQUEST
    } else if matches!(e, JobError::JobNotFound { .. }) {
        StatusCode::NOT_FOUND
    } else {
        error!(code = e.code(), error = %e, "job request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({"error": e.to_string(), "code": e.code()})))
}

pub fn bad_request(reason: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": reason.into(), "code": "BAD_REQUEST"})),
    )
}
