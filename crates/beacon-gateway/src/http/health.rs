use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with build and handler metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let handlers: Vec<&str> = state
        .scheduler
        .registry()
        .job_types()
        .into_iter()
        .map(|t| t.as_str())
        .collect();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("BEACON_GIT_SHA"),
        "handlers": handlers,
    }))
}
