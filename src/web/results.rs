//! Global result endpoints.

use axum::Json;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cache::{fingerprint, keys, ttl};
use crate::db::models::ListingFilter;
use crate::export::EXPORT_COLUMNS;
use crate::state::AppState;
use crate::web::error::{ApiError, ApiResult};
use crate::web::jobs::{DownloadQuery, stream_export};
use crate::web::{Paginated, Pagination, respond_cached};

// Pagination fields inlined; #[serde(flatten)] breaks numeric query parsing.
#[derive(Debug, Deserialize)]
pub struct ResultListQuery {
    #[serde(default = "crate::web::default_page")]
    pub page: u32,
    #[serde(default = "crate::web::default_per_page")]
    pub per_page: u32,
    pub job_id: Option<Uuid>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub city: Option<String>,
}

/// `GET /results` — normalized listings across all jobs.
pub async fn list_results(
    State(state): State<AppState>,
    Query(query): Query<ResultListQuery>,
) -> ApiResult<Response> {
    let pagination = Pagination {
        page: query.page,
        per_page: query.per_page,
    };
    let (limit, offset) = pagination.clamp();
    let fp = fingerprint(&[
        &limit.to_string(),
        &offset.to_string(),
        &query.job_id.map(|id| id.to_string()).unwrap_or_default(),
        query.search.as_deref().unwrap_or(""),
        query.category.as_deref().unwrap_or(""),
        query.city.as_deref().unwrap_or(""),
    ]);
    // Searches live in their own (shorter-lived) namespace
    let (key, ttl) = if query.search.is_some() {
        (keys::search(&fp), ttl::SEARCH)
    } else {
        (keys::results_all(&fp), ttl::RESULTS)
    };

    respond_cached(&state, &key, ttl, async {
        let filter = ListingFilter {
            job_id: query.job_id,
            search: query.search.clone(),
            category: query.category.clone(),
            city: query.city.clone(),
            limit,
            offset,
            ..Default::default()
        };
        let listings = state.db.listings().list(&filter).await?;
        let total = state.db.listings().count(&filter).await?;
        let page = Paginated::new(listings, total, &pagination);
        Ok(serde_json::to_value(page).map_err(ApiError::internal)?)
    })
    .await
}

/// `GET /results/download` — streaming export across all jobs.
pub async fn download_results(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    stream_export(&state, None, &query, "results")
}

/// `GET /results/categories`
pub async fn categories(State(state): State<AppState>) -> ApiResult<Response> {
    respond_cached(
        &state,
        &keys::results_all("categories"),
        ttl::CATEGORY_LIST,
        async {
            let categories = state.db.listings().categories().await?;
            Ok(json!(categories))
        },
    )
    .await
}

/// `GET /results/cities`
pub async fn cities(State(state): State<AppState>) -> ApiResult<Response> {
    respond_cached(
        &state,
        &keys::results_all("cities"),
        ttl::CATEGORY_LIST,
        async {
            let cities = state.db.listings().cities().await?;
            Ok(json!(cities))
        },
    )
    .await
}

/// `GET /results/stats`
pub async fn stats(State(state): State<AppState>) -> ApiResult<Response> {
    respond_cached(&state, keys::BL_STATS, ttl::STATS_AGGREGATE, async {
        let listings = state.db.listings().stats().await?;
        let places = state.db.results().get_place_stats().await?;
        Ok(json!({
            "listings": listings,
            "places": places,
        }))
    })
    .await
}

/// `GET /results/columns` — exportable column names.
pub async fn columns() -> Json<serde_json::Value> {
    Json(json!(EXPORT_COLUMNS))
}
