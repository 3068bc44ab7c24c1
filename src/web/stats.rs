//! Dashboard aggregate endpoint.

use axum::extract::State;
use axum::response::Response;
use serde_json::json;

use crate::cache::{keys, ttl};
use crate::state::AppState;
use crate::web::error::ApiResult;
use crate::web::respond_cached;

/// `GET /stats` — one payload for the dashboard header.
pub async fn dashboard(State(state): State<AppState>) -> ApiResult<Response> {
    respond_cached(&state, keys::DASHBOARD_STATS, ttl::STATS, async {
        let jobs = state.jobs.stats().await?;
        let workers = state.registry.stats().await?;
        let places = state.db.results().get_place_stats().await?;
        let listings = state.db.listings().stats().await?;
        Ok(json!({
            "jobs": jobs,
            "workers": workers,
            "places": places,
            "listings": listings,
        }))
    })
    .await
}
