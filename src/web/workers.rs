//! Worker fleet endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::models::Worker;
use crate::registry::HeartbeatRequest;
use crate::state::AppState;
use crate::web::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub worker_id: String,
}

/// `POST /workers/register`
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Worker>)> {
    let worker = state.registry.register(&request.worker_id).await?;
    Ok((StatusCode::CREATED, Json(worker)))
}

/// `POST /workers/heartbeat` — no response body.
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    state.registry.heartbeat(&request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /workers/{id}/claim` — `{"job": <job|null>}`.
pub async fn claim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = state.registry.claim_job(&id).await?;
    Ok(Json(json!({ "job": job })))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub job_id: Uuid,
    #[serde(default)]
    pub places_scraped: i64,
}

/// `POST /workers/{id}/complete`
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<Json<crate::db::models::Job>> {
    let job = state
        .registry
        .complete_job(request.job_id, &id, request.places_scraped)
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub job_id: Uuid,
    #[serde(default)]
    pub message: String,
}

/// `POST /workers/{id}/fail`
pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FailRequest>,
) -> ApiResult<Json<crate::db::models::Job>> {
    let job = state
        .registry
        .fail_job(request.job_id, &id, &request.message)
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub job_id: Uuid,
}

/// `POST /workers/{id}/release`
pub async fn release(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReleaseRequest>,
) -> ApiResult<Json<crate::db::models::Job>> {
    let job = state.registry.release_job(request.job_id, &id).await?;
    Ok(Json(job))
}

/// `GET /workers`
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Worker>>> {
    Ok(Json(state.registry.list().await?))
}

/// `GET /workers/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Worker>> {
    Ok(Json(state.registry.get(&id).await?))
}

/// `GET /workers/stats`
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.registry.stats().await?;
    Ok(Json(json!(stats)))
}

/// `DELETE /workers/{id}` — unregisters and releases any held job.
pub async fn unregister(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.unregister(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
