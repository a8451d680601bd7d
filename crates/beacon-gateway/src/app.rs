use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use beacon_core::config::BeaconConfig;
use beacon_jobs::JobScheduler;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state handed to every Axum handler as `Arc<AppState>`.
pub struct AppState {
    pub config: BeaconConfig,
    pub scheduler: JobScheduler,
}

impl AppState {
    pub fn new(config: BeaconConfig, scheduler: JobScheduler) -> Self {
        Self { config, scheduler }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // cron platforms differ on the verb they send, so the trigger accepts both
    let api = Router::new()
        .route(
            "/cron/jobs",
            post(crate::http::cron::process_due).get(crate::http::cron::process_due),
        )
        .route("/cron/refresh", post(crate::http::cron::refresh_market_data))
        .route(
            "/jobs",
            post(crate::http::jobs::schedule).get(crate::http::jobs::list),
        )
        .route("/jobs/stats", get(crate::http::jobs::stats))
        .route("/jobs/{id}", get(crate::http::jobs::show))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_cron_secret,
        ));

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use beacon_jobs::{HandlerRegistry, JobHandler, JobPayload, JobType, SqliteJobStore};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn run(&self, _: &JobPayload) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fails;

    #[async_trait]
    impl JobHandler for Fails {
        async fn run(&self, _: &JobPayload) -> anyhow::Result<()> {
            anyhow::bail!("upstream unavailable")
        }
    }

    fn state(cron_secret: Option<&str>) -> Arc<AppState> {
        let registry = JobType::ALL
            .into_iter()
            .filter(|t| *t != JobType::CacheCleanup)
            .fold(HandlerRegistry::new(), |r, t| r.register(t, Noop))
            .register(JobType::CacheCleanup, Fails);
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let mut config = BeaconConfig::default();
        config.server.cron_secret = cron_secret.map(String::from);
        Arc::new(AppState::new(config, JobScheduler::new(store, registry)))
    }

    async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_lists_registered_handlers() {
        let state = state(None);
        let (status, body) = send(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["handlers"].as_array().unwrap().len(), JobType::ALL.len());
    }

    #[tokio::test]
    async fn cron_route_reports_counts() {
        let state = state(None);
        state
            .scheduler
            .schedule_job("update_top_coins", json!({}), None)
            .unwrap();
        state
            .scheduler
            .schedule_job("cache_cleanup", json!({}), None)
            .unwrap();
        state
            .scheduler
            .schedule_job("update_news", json!({}), Some(chrono::Utc::now() + chrono::Duration::hours(1)))
            .unwrap();

        let req = Request::post("/api/cron/jobs").body(Body::empty()).unwrap();
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"processed": 2, "completed": 1, "failed": 1, "skipped": 0})
        );

        // GET works too, and there is nothing left to do
        let (status, body) = send(&state, get("/api/cron/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processed"], 0);
    }

    #[tokio::test]
    async fn api_requires_configured_bearer_secret() {
        let state = state(Some("s3cret"));

        let (status, body) = send(&state, get("/api/jobs/stats")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["reason"], "missing Authorization header");

        let req = Request::post("/api/cron/jobs")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&state, req).await.0, StatusCode::UNAUTHORIZED);

        let req = Request::post("/api/cron/jobs")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&state, req).await.0, StatusCode::OK);

        // liveness stays open
        assert_eq!(send(&state, get("/health")).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn schedule_then_show_job() {
        let state = state(None);
        let (status, body) = send(
            &state,
            post_json("/api/jobs", json!({"type": "update_top_coins", "payload": {"limit": 10}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap().to_string();

        let (status, job) = send(&state, get(&format!("/api/jobs/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["job_type"], "update_top_coins");
        assert_eq!(job["payload"], json!({"limit": 10}));
        assert_eq!(job["status"], "pending");
    }

    #[tokio::test]
    async fn schedule_rejects_bad_input_with_400() {
        let state = state(None);

        let (status, body) =
            send(&state, post_json("/api/jobs", json!({"type": "not_a_real_type"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_JOB_TYPE");

        let (status, body) = send(
            &state,
            post_json("/api/jobs", json!({"type": "update_top_coins", "payload": {"limit": 0}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_PAYLOAD");

        assert_eq!(state.scheduler.stats().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn schedule_rejects_five_digit_year() {
        let state = state(None);
        let (status, body) = send(
            &state,
            post_json(
                "/api/jobs",
                json!({"type": "update_news", "scheduled_for": "+10000-01-01T00:00:00Z"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_PAYLOAD");
        assert_eq!(state.scheduler.stats().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn malformed_schedule_body_is_json_400() {
        let state = state(None);

        let (status, body) =
            send(&state, post_json("/api/jobs", json!({"payload": {"limit": 10}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
        assert!(body["error"].as_str().unwrap().contains("type"));

        let (status, body) = send(
            &state,
            post_json("/api/jobs", json!({"type": "update_news", "scheduled_for": "tomorrow"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        let req = Request::post("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        assert_eq!(state.scheduler.stats().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let state = state(None);
        let (status, body) = send(&state, get("/api/jobs/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "JOB_NOT_FOUND");
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let state = state(None);
        state.scheduler.schedule_job("update_news", json!({}), None).unwrap();
        state.scheduler.schedule_job("cache_cleanup", json!({}), None).unwrap();
        state.scheduler.process_pending_jobs().await.unwrap();
        state.scheduler.schedule_job("update_global_data", json!({}), None).unwrap();

        let (status, body) = send(&state, get("/api/jobs?status=failed")).await;
        assert_eq!(status, StatusCode::OK);
        let jobs = body.as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["job_type"], "cache_cleanup");
        assert_eq!(jobs[0]["error"], "Handler failed: upstream unavailable");

        let (_, body) = send(&state, get("/api/jobs?limit=2")).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _) = send(&state, get("/api/jobs?status=bogus")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, stats) = send(&state, get("/api/jobs/stats")).await;
        assert_eq!(
            stats,
            json!({"pending": 1, "processing": 0, "completed": 1, "failed": 1})
        );
    }

    #[tokio::test]
    async fn refresh_enqueues_and_runs_maintenance_set() {
        let state = state(None);
        let req = Request::post("/api/cron/refresh").body(Body::empty()).unwrap();
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheduled"].as_array().unwrap().len(), 6);
        assert_eq!(
            body["report"],
            json!({"processed": 6, "completed": 5, "failed": 1, "skipped": 0})
        );
    }
}
