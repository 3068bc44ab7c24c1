//! Row types and database enums shared by the repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

// ── Status enums ────────────────────────────────────────────────────

/// Lifecycle status of an outer scrape job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Status of a single work item in the inner queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "work_item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    New,
    InProgress,
    Completed,
    Failed,
}

/// Discriminator selecting the decoder for a work item payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payload_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    Search,
    Place,
    Email,
}

/// Liveness status of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "worker_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

/// Validation state of a deduplicated email address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "validation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    LocalValid,
    LocalInvalid,
    ApiValid,
    ApiInvalid,
    ApiError,
    ApiSkipped,
}

/// Where a listing/email association was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "email_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmailSource {
    Website,
    GoogleMaps,
}

// ── Scraping configuration (stored as JSONB on the job row) ─────────

/// Geographic bounding box for area-coverage mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

/// Per-job scraping parameters, applied to every keyword of the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_lang")]
    pub lang: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default = "default_zoom")]
    pub zoom: i32,
    #[serde(default = "default_radius")]
    pub radius: i32,
    #[serde(default = "default_depth")]
    pub depth: i32,
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default)]
    pub extract_email: bool,
    #[serde(alias = "boundingbox")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub coverage_mode: bool,
    /// Side length of the coverage grid; each keyword fans out into
    /// `grid_size * grid_size` tiles when `coverage_mode` is set.
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    #[serde(default = "default_max_time_seconds")]
    pub max_time_seconds: u64,
    #[serde(default)]
    pub proxies: Vec<String>,
    pub location_name: Option<String>,
}

fn default_lang() -> String {
    "en".to_owned()
}

fn default_zoom() -> i32 {
    15
}

fn default_radius() -> i32 {
    10_000
}

fn default_depth() -> i32 {
    10
}

fn default_grid_size() -> u32 {
    3
}

fn default_max_time_seconds() -> u64 {
    600
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            lat: None,
            lon: None,
            zoom: default_zoom(),
            radius: default_radius(),
            depth: default_depth(),
            fast_mode: false,
            extract_email: false,
            bounding_box: None,
            coverage_mode: false,
            grid_size: default_grid_size(),
            max_time_seconds: default_max_time_seconds(),
            proxies: Vec::new(),
            location_name: None,
        }
    }
}

// ── Row types ───────────────────────────────────────────────────────

/// One user-submitted scrape job: a named batch of keywords plus parameters.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub priority: i32,
    pub keywords: Vec<String>,
    pub config: Json<ScrapeConfig>,
    pub total_places: i32,
    pub scraped_places: i32,
    pub failed_places: i32,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// One claimable unit of work (one keyword, or one grid tile of a keyword).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkItem {
    pub id: i64,
    pub priority: i32,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
    pub status: ItemStatus,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A registered worker process.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Worker {
    pub id: String,
    pub hostname: String,
    pub status: WorkerStatus,
    pub current_job_id: Option<Uuid>,
    pub jobs_completed: i64,
    pub places_scraped: i64,
    pub last_heartbeat: DateTime<Utc>,
}

/// One scraped place exactly as submitted by a worker.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RawResult {
    pub id: i64,
    pub job_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Normalized business record projected from a raw result.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Listing {
    pub id: i64,
    pub raw_result_id: i64,
    pub job_id: Uuid,
    pub place_id: Option<String>,
    pub cid: Option<String>,
    pub data_id: Option<String>,
    pub title: String,
    pub category: Option<String>,
    pub categories: Vec<String>,
    pub address: Option<String>,
    pub address_street: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_postal_code: Option<String>,
    pub address_country: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub review_count: i32,
    pub review_rating: Option<f64>,
    pub status: Option<String>,
    pub price_range: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A deduplicated email address with its validation state.
///
/// `domain`, `local_part` and `is_acceptable` are generated columns and are
/// never written by the application.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Email {
    pub id: i64,
    pub address: String,
    pub domain: String,
    pub local_part: String,
    pub validation_status: ValidationStatus,
    pub local_validation_passed: Option<bool>,
    pub local_validation_reason: Option<String>,
    pub api_score: Option<i32>,
    pub api_deliverable: Option<bool>,
    pub api_disposable: Option<bool>,
    pub api_role_account: Option<bool>,
    pub api_free_email: Option<bool>,
    pub api_catch_all: Option<bool>,
    pub api_reason: Option<String>,
    pub api_validated_at: Option<DateTime<Utc>>,
    pub is_acceptable: Option<bool>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: i32,
}

// ── Filters and aggregates ──────────────────────────────────────────

/// Sortable columns for job listings. Kept as an enum so ORDER BY is never
/// interpolated from user input.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrderBy {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
    Name,
    Status,
}

impl JobOrderBy {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Priority => "priority",
            Self::Name => "name",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDir {
    Asc,
    #[default]
    Desc,
}

impl OrderDir {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter for `JobOps::list`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub worker_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub order_by: JobOrderBy,
    pub order_dir: OrderDir,
}

/// Filter for `ListingOps::list`.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub job_id: Option<Uuid>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub city: Option<String>,
    pub has_website: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

/// Per-status job counts for the dashboard.
#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub queued: i64,
    pub running: i64,
    pub paused: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Fleet-wide worker counts and counters.
#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct WorkerStats {
    pub total: i64,
    pub idle: i64,
    pub busy: i64,
    pub offline: i64,
    pub jobs_completed: i64,
    pub places_scraped: i64,
}

/// Raw result volume aggregates.
#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct PlaceStats {
    pub total_results: i64,
    pub jobs_with_results: i64,
}

/// Aggregates over normalized listings.
#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct ListingStats {
    pub total: i64,
    pub with_website: i64,
    pub with_phone: i64,
    pub with_email: i64,
    pub avg_rating: Option<f64>,
}
