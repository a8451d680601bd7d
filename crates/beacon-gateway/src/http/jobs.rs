use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use beacon_jobs::{Job, JobStats, JobStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{bad_request, job_error, ApiError};
use crate::app::AppState;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// POST /api/jobs: enqueue one job.
///
/// A body that does not deserialize is a 400 with the usual error shape,
/// not axum's plain-text rejection.
pub async fn schedule(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    let id = state
        .scheduler
        .schedule_job(&req.job_type, req.payload, req.scheduled_for)
        .map_err(job_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// GET /api/jobs?status=&limit=, newest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(bad_request)?;
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let jobs = state.scheduler.list_jobs(status, limit).map_err(job_error)?;
    Ok(Json(jobs))
}

/// GET /api/jobs/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<JobStats>, ApiError> {
    state.scheduler.stats().map(Json).map_err(job_error)
}

/// GET /api/jobs/{id}
pub async fn show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state.scheduler.get_job(&id).map(Json).map_err(job_error)
}
