//! Cron triggers. An external scheduler hits these on a fixed cadence; they
//! do no work of their own beyond running the job table.

use axum::{extract::State, Json};
use beacon_jobs::ProcessReport;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{job_error, ApiError};
use crate::app::AppState;
use crate::handlers::schedule_refresh_set;

/// POST /api/cron/jobs: run every due job once.
pub async fn process_due(State(state): State<Arc<AppState>>) -> Result<Json<ProcessReport>, ApiError> {
    let report = state
        .scheduler
        .process_pending_jobs_report()
        .await
        .map_err(job_error)?;
    info!(
        processed = report.processed,
        failed = report.failed,
        "cron pass finished"
    );
    Ok(Json(report))
}

/// POST /api/cron/refresh: enqueue the maintenance set due now, then run it.
pub async fn refresh_market_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let scheduled = schedule_refresh_set(&state.scheduler).map_err(job_error)?;
    let report = state
        .scheduler
        .process_pending_jobs_report()
        .await
        .map_err(job_error)?;
    Ok(Json(json!({ "scheduled": scheduled, "report": report })))
}
