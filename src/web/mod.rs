//! HTTP API surface.
//!
//! Handlers map requests onto the job, registry and listing services and
//! translate taxonomy errors into the standard `{"code", "message"}` shape.
//! List-shaped reads go through the cache with fingerprinted keys; the
//! `X-Cache` response header reports HIT or MISS.

pub mod auth;
pub mod error;
pub mod jobs;
pub mod results;
pub mod routes;
pub mod stats;
pub mod workers;

use std::time::Duration;

use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::AppState;
use error::ApiResult;

// ── Pagination ──────────────────────────────────────────────────────

pub const MAX_PER_PAGE: u32 = 100;
const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

pub(crate) fn default_page() -> u32 {
    1
}

pub(crate) fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl Pagination {
    /// Clamp to sane bounds and convert to SQL limit/offset.
    pub fn clamp(&self) -> (i64, i64) {
        let per_page = self.per_page.clamp(1, MAX_PER_PAGE) as i64;
        let page = self.page.max(1) as i64;
        (per_page, (page - 1) * per_page)
    }

    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn per_page(&self) -> u32 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }
}

/// Standard paginated envelope.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: i64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let per_page = pagination.per_page();
        Self {
            data,
            total,
            page: pagination.page(),
            per_page,
            total_pages: (total + per_page as i64 - 1) / per_page as i64,
        }
    }
}

// ── Read-through caching ────────────────────────────────────────────

/// Serve `key` from the cache, or compute, store and serve fresh.
///
/// Cache trouble in either direction degrades to the fresh path; the
/// response carries `X-Cache: HIT` or `MISS` either way.
pub async fn respond_cached<F>(
    state: &AppState,
    key: &str,
    ttl: Duration,
    compute: F,
) -> ApiResult<Response>
where
    F: Future<Output = ApiResult<serde_json::Value>>,
{
    match state.cache.get(key).await {
        Ok(Some(bytes)) => return Ok(json_bytes_response(bytes, "HIT")),
        Ok(None) => {}
        Err(error) => warn!(key, %error, "cache read failed, serving fresh"),
    }

    let value = compute.await?;
    let bytes = serde_json::to_vec(&value)
        .map_err(|e| error::ApiError::internal(format!("serialize response: {e}")))?;

    if let Err(error) = state.cache.set(key, &bytes, ttl).await {
        warn!(key, %error, "cache write failed");
    }

    Ok(json_bytes_response(bytes, "MISS"))
}

fn json_bytes_response(bytes: Vec<u8>, cache_status: &'static str) -> Response {
    (
        [
            ("content-type", "application/json"),
            ("x-cache", cache_status),
        ],
        bytes,
    )
        .into_response()
}
