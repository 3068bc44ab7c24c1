//! Outer job lifecycle: creation with keyword fan-out, the status state
//! machine, result ingest, and progress roll-up.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::Notifier;
use crate::cache::invalidator::CacheInvalidator;
use crate::db::DbContext;
use crate::db::models::{BoundingBox, Job, JobFilter, JobStats, JobStatus, ScrapeConfig};
use crate::error::{Error, Result};
use crate::payload::{SearchTask, TaskPayload};

// ── State machine ───────────────────────────────────────────────────

/// Whether `from -> to` is an edge of the job status graph.
///
/// `queued` is a pending job whose notification went out on the broker; it
/// behaves like `pending` for claiming and cancelling.
pub fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Queued)
            | (Pending, Cancelled)
            | (Queued, Running)
            | (Queued, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Paused)
            | (Running, Cancelled)
            | (Paused, Running)
    )
}

/// Check an edge, producing the typed error on violation.
pub fn check_transition(from: JobStatus, to: JobStatus) -> Result<()> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(Error::invalid_transition(from, to))
    }
}

// ── Requests ────────────────────────────────────────────────────────

/// Body of `POST /jobs`. Scraping parameters flatten into [`ScrapeConfig`],
/// which supplies the documented defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub config: ScrapeConfig,
}

/// Body of `POST /jobs/{id}/results`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResultsRequest {
    pub worker_id: String,
    pub results: Vec<serde_json::Value>,
    /// Optional echo of the path id; rejected when it disagrees.
    pub job_id: Option<Uuid>,
}

// ── Service ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct JobService {
    db: DbContext,
    invalidator: CacheInvalidator,
    notifier: Option<Arc<Notifier>>,
}

impl JobService {
    pub fn new(db: DbContext, invalidator: CacheInvalidator, notifier: Option<Arc<Notifier>>) -> Self {
        Self {
            db,
            invalidator,
            notifier,
        }
    }

    /// Create a job and fan its keywords out into work items.
    pub async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(Error::validation("job name must not be empty"));
        }
        let keywords: Vec<String> = req
            .keywords
            .iter()
            .map(|k| k.trim().to_owned())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(Error::validation("at least one keyword is required"));
        }

        let job = self
            .db
            .jobs()
            .create(name, req.priority, &keywords, &req.config)
            .await?;

        // One item per keyword; coverage mode multiplies by grid tiles.
        let items = fan_out(&keywords, &req.config, job.priority);
        let total = items.len() as i32;
        self.db.queue().push_batch(&items, job.id).await?;
        self.db
            .jobs()
            .update_progress(job.id, Some(total), None, None)
            .await?;

        // With a broker attached the job is advertised and marked queued;
        // otherwise it stays pending until a worker polls a claim.
        let status = if let Some(notifier) = &self.notifier {
            notifier.notify_job(job.id, job.priority).await;
            JobStatus::Queued
        } else {
            JobStatus::Pending
        };
        let job = match status {
            JobStatus::Pending => self.db.jobs().get(job.id).await?.ok_or(Error::NotFound("job"))?,
            _ => self
                .db
                .jobs()
                .update_status(job.id, status, None)
                .await?
                .ok_or(Error::NotFound("job"))?,
        };

        info!(job_id = %job.id, keywords = keywords.len(), items = total, "job created");
        self.invalidator.on_job_lifecycle(job.id).await;
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job> {
        self.db.jobs().get(id).await?.ok_or(Error::NotFound("job"))
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, i64)> {
        let jobs = self.db.jobs().list(filter).await?;
        let total = self.db.jobs().count(filter).await?;
        Ok((jobs, total))
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.db.jobs().delete(id).await? {
            return Err(Error::NotFound("job"));
        }
        self.invalidator.on_job_lifecycle(id).await;
        Ok(())
    }

    pub async fn pause(&self, id: Uuid) -> Result<Job> {
        self.transition(id, JobStatus::Paused).await
    }

    pub async fn resume(&self, id: Uuid) -> Result<Job> {
        self.transition(id, JobStatus::Running).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Job> {
        self.transition(id, JobStatus::Cancelled).await
    }

    /// Validated status transition; rejects edges outside the graph without
    /// mutating anything.
    async fn transition(&self, id: Uuid, to: JobStatus) -> Result<Job> {
        let job = self.get(id).await?;
        check_transition(job.status, to)?;
        let job = self
            .db
            .jobs()
            .update_status(id, to, None)
            .await?
            .ok_or(Error::NotFound("job"))?;
        self.invalidator.on_job_status(id).await;
        Ok(job)
    }

    /// Ingest a batch of scraped results for a job.
    ///
    /// The normalizer runs inside the insert transaction; progress is then
    /// refreshed from the actual stored count, so double submissions do not
    /// inflate it.
    pub async fn submit_results(&self, job_id: Uuid, req: SubmitResultsRequest) -> Result<usize> {
        if let Some(body_id) = req.job_id
            && body_id != job_id
        {
            return Err(Error::validation(format!(
                "body job_id {body_id} does not match path {job_id}"
            )));
        }
        // 404 before ingesting into a job that does not exist
        self.get(job_id).await?;

        let inserted = self.db.results().create_batch(job_id, &req.results).await?;

        let scraped = self.db.results().count(Some(job_id)).await? as i32;
        self.db
            .jobs()
            .update_progress(job_id, None, Some(scraped), None)
            .await?;

        debug!(
            %job_id,
            submitted = req.results.len(),
            inserted = inserted.len(),
            scraped,
            "results ingested"
        );
        self.invalidator.on_results(job_id).await;
        Ok(inserted.len())
    }

    /// Mark one work item terminal and roll its parent's progress up.
    ///
    /// When every item of the parent is terminal the parent completes, or
    /// fails if no item succeeded. Failed items count toward completion.
    pub async fn finish_item(&self, item_id: i64, parent_id: Uuid, success: bool) -> Result<()> {
        if success {
            self.db.queue().mark_complete(item_id).await?;
        } else {
            self.db.queue().mark_failed(item_id).await?;
        }

        let counts = self.db.queue().counts(parent_id).await?;
        self.db
            .jobs()
            .update_progress(parent_id, None, None, Some(counts.failed as i32))
            .await?;

        if counts.all_terminal() {
            let job = self.get(parent_id).await?;
            if !job.status.is_terminal() {
                let status = if counts.completed > 0 {
                    JobStatus::Completed
                } else {
                    JobStatus::Failed
                };
                self.db.jobs().update_status(parent_id, status, None).await?;
                self.invalidator.on_job_status(parent_id).await;
                info!(job_id = %parent_id, status = %status, "job rolled up");
            }
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<JobStats> {
        self.db.jobs().stats().await
    }
}

// ── Fan-out ─────────────────────────────────────────────────────────

/// Produce the work items for a keyword list under one config.
fn fan_out(keywords: &[String], config: &ScrapeConfig, priority: i32) -> Vec<(TaskPayload, i32)> {
    let tiles: Vec<Option<BoundingBox>> = match (&config.bounding_box, config.coverage_mode) {
        (Some(bbox), true) => grid_tiles(bbox, config.grid_size)
            .into_iter()
            .map(Some)
            .collect(),
        _ => vec![None],
    };

    let mut items = Vec::with_capacity(keywords.len() * tiles.len());
    for keyword in keywords {
        for tile in &tiles {
            let task = SearchTask {
                keyword: keyword.clone(),
                lang: config.lang.clone(),
                lat: config.lat,
                lon: config.lon,
                zoom: config.zoom,
                radius: config.radius,
                depth: config.depth,
                fast_mode: config.fast_mode,
                extract_email: config.extract_email,
                max_time_seconds: config.max_time_seconds,
                proxies: config.proxies.clone(),
                tile: *tile,
            };
            items.push((TaskPayload::Search(task), priority));
        }
    }
    items
}

/// Split a bounding box into an n×n grid of tiles.
fn grid_tiles(bbox: &BoundingBox, grid_size: u32) -> Vec<BoundingBox> {
    let n = grid_size.max(1);
    let lat_step = (bbox.max_lat - bbox.min_lat) / n as f64;
    let lon_step = (bbox.max_lon - bbox.min_lon) / n as f64;

    let mut tiles = Vec::with_capacity((n * n) as usize);
    for row in 0..n {
        for col in 0..n {
            tiles.push(BoundingBox {
                min_lat: bbox.min_lat + row as f64 * lat_step,
                min_lon: bbox.min_lon + col as f64 * lon_step,
                max_lat: bbox.min_lat + (row + 1) as f64 * lat_step,
                max_lon: bbox.min_lon + (col + 1) as f64 * lon_step,
            });
        }
    }
    tiles
}
