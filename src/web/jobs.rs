//! Job endpoints.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cache::{fingerprint, keys, ttl};
use crate::db::models::{Job, JobFilter, JobStatus};
use crate::export::exporter_for;
use crate::jobs::{CreateJobRequest, SubmitResultsRequest};
use crate::state::AppState;
use crate::web::error::{ApiError, ApiResult};
use crate::web::{Paginated, Pagination, respond_cached};

/// `POST /jobs`
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.jobs.create(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

// Pagination fields are inlined rather than #[serde(flatten)]-ed:
// flatten buffers values as strings and breaks numeric query parsing.
#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    #[serde(default = "crate::web::default_page")]
    pub page: u32,
    #[serde(default = "crate::web::default_per_page")]
    pub per_page: u32,
    pub status: Option<String>,
}

impl JobListQuery {
    fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// `GET /jobs`
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Response> {
    let status = match &query.status {
        Some(raw) => Some(
            raw.parse::<JobStatus>()
                .map_err(ApiError::bad_request)?,
        ),
        None => None,
    };

    let pagination = query.pagination();
    let (limit, offset) = pagination.clamp();
    let key = keys::jobs_list(&fingerprint(&[
        &limit.to_string(),
        &offset.to_string(),
        query.status.as_deref().unwrap_or(""),
    ]));

    respond_cached(&state, &key, ttl::JOBS_LIST, async {
        let filter = JobFilter {
            status,
            limit,
            offset,
            ..Default::default()
        };
        let (jobs, total) = state.jobs.list(&filter).await?;
        let page = Paginated::new(jobs, total, &pagination);
        Ok(serde_json::to_value(page).map_err(ApiError::internal)?)
    })
    .await
}

/// `GET /jobs/{id}`
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let key = keys::job_detail(id);
    respond_cached(&state, &key, ttl::JOB_DETAIL, async {
        let job = state.jobs.get(id).await?;
        Ok(serde_json::to_value(job).map_err(ApiError::internal)?)
    })
    .await
}

/// `DELETE /jobs/{id}`
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.jobs.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /jobs/{id}/pause`
pub async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.pause(id).await?))
}

/// `POST /jobs/{id}/resume`
pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.resume(id).await?))
}

/// `POST /jobs/{id}/cancel`
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.cancel(id).await?))
}

/// `GET /jobs/{id}/results` — paginated normalized listings.
pub async fn job_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Response> {
    // 404 for unknown jobs rather than an empty page
    state.jobs.get(id).await?;

    let (limit, offset) = pagination.clamp();
    let key = keys::results(
        id,
        &fingerprint(&[&limit.to_string(), &offset.to_string()]),
    );

    respond_cached(&state, &key, ttl::RESULTS, async {
        let listings = state.db.listings().list_by_job(id, limit, offset).await?;
        let filter = crate::db::models::ListingFilter {
            job_id: Some(id),
            ..Default::default()
        };
        let total = state.db.listings().count(&filter).await?;
        let page = Paginated::new(listings, total, &pagination);
        Ok(serde_json::to_value(page).map_err(ApiError::internal)?)
    })
    .await
}

/// `POST /jobs/{id}/results` — result ingest from workers.
pub async fn submit_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitResultsRequest>,
) -> ApiResult<StatusCode> {
    let inserted = state.jobs.submit_results(id, request).await?;
    if inserted > 0 {
        Ok(StatusCode::CREATED)
    } else {
        Ok(StatusCode::NO_CONTENT)
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default = "default_format")]
    pub format: String,
    /// Comma-separated column subset.
    pub columns: Option<String>,
}

fn default_format() -> String {
    "json".to_owned()
}

/// `GET /jobs/{id}/download` — streaming export.
pub async fn download_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    state.jobs.get(id).await?;
    stream_export(&state, Some(id), &query, &format!("job-{id}"))
}

/// Shared streaming pipeline for job-scoped and global downloads.
pub(super) fn stream_export(
    state: &AppState,
    job_id: Option<Uuid>,
    query: &DownloadQuery,
    basename: &str,
) -> ApiResult<Response> {
    let columns = query.columns.as_deref().map(|raw| {
        raw.split(',')
            .map(|c| c.trim().to_owned())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
    });

    let exporter = exporter_for(&query.format, columns).ok_or_else(|| {
        ApiError::bad_request(format!("unsupported export format: {}", query.format))
    })?;
    let exporter = std::sync::Arc::new(exporter);

    let content_type = exporter.content_type();
    let filename = format!("{basename}.{}", exporter.file_extension());

    let rows = state.db.listings().stream(job_id);

    let head = futures::stream::once({
        let exporter = exporter.clone();
        async move { Ok::<_, crate::error::Error>(exporter.begin()) }
    });
    let body_rows = rows.enumerate().map({
        let exporter = exporter.clone();
        move |(index, row)| row.map(|listing| exporter.row(&listing, index == 0))
    });
    let tail = futures::stream::once({
        let exporter = exporter.clone();
        async move { Ok::<_, crate::error::Error>(exporter.end()) }
    });

    let bytes = head
        .chain(body_rows)
        .chain(tail)
        .map_ok(axum::body::Bytes::from)
        .map_err(axum::BoxError::from);

    let response = (
        [
            (header::CONTENT_TYPE, content_type.to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(bytes),
    )
        .into_response();
    Ok(response)
}

/// `GET /jobs/stats`
pub async fn jobs_stats(State(state): State<AppState>) -> ApiResult<Response> {
    respond_cached(&state, keys::JOBS_STATS, ttl::STATS, async {
        let stats = state.jobs.stats().await?;
        Ok(json!(stats))
    })
    .await
}
