//! Router assembly.

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::response::Json;
use axum::routing::{get, post};
use axum::{Router, middleware};
use serde_json::{Value, json};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::web::{auth, jobs, results, stats, workers};

/// Deadline for ordinary API requests; downloads get their own.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates the API router.
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/jobs/stats", get(jobs::jobs_stats))
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/{id}/pause", post(jobs::pause_job))
        .route("/jobs/{id}/resume", post(jobs::resume_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route(
            "/jobs/{id}/results",
            get(jobs::job_results).post(jobs::submit_results),
        )
        .route("/workers/register", post(workers::register))
        .route("/workers/heartbeat", post(workers::heartbeat))
        .route("/workers", get(workers::list))
        .route("/workers/stats", get(workers::stats))
        .route(
            "/workers/{id}",
            get(workers::get).delete(workers::unregister),
        )
        .route("/workers/{id}/claim", post(workers::claim))
        .route("/workers/{id}/complete", post(workers::complete))
        .route("/workers/{id}/fail", post(workers::fail))
        .route("/workers/{id}/release", post(workers::release))
        .route("/results", get(results::list_results))
        .route("/results/categories", get(results::categories))
        .route("/results/cities", get(results::cities))
        .route("/results/stats", get(results::stats))
        .route("/results/columns", get(results::columns))
        .route("/stats", get(stats::dashboard))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    // Streaming downloads run under the (much longer) download deadline
    let download_router = Router::new()
        .route("/jobs/{id}/download", get(jobs::download_job))
        .route("/results/download", get(results::download_results))
        .layer(TimeoutLayer::new(app_state.download_timeout));

    let protected = api_router.merge(download_router).layer(
        middleware::from_fn_with_state(app_state.clone(), auth::require_auth),
    );

    // Health stays outside the auth layer
    let v2 = Router::new().route("/health", get(health)).merge(protected);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v2", v2)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(DefaultBodyLimit::max(app_state.max_body_bytes))
        .with_state(app_state)
}

/// Unauthenticated liveness probe.
async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
