//! Worker identity, liveness and job-claim bookkeeping.
//!
//! The claim/complete/fail/release protocol always pairs a job mutation with
//! the owning worker's row; the paired updates run in one transaction with
//! an ownership check under a row lock, so two workers can never finish the
//! same job.

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::cache::invalidator::CacheInvalidator;
use crate::db::DbContext;
use crate::db::models::{Job, JobStatus, Worker, WorkerStats, WorkerStatus};
use crate::error::{Error, Result, StorageContext};
use crate::jobs::check_transition;

/// Body of `POST /workers/heartbeat`.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    #[serde(default)]
    pub hostname: String,
    pub status: WorkerStatus,
    pub current_job_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct WorkerRegistry {
    db: DbContext,
    invalidator: CacheInvalidator,
}

impl WorkerRegistry {
    pub fn new(db: DbContext, invalidator: CacheInvalidator) -> Self {
        Self { db, invalidator }
    }

    /// Upsert the worker as idle with a fresh heartbeat.
    pub async fn register(&self, worker_id: &str) -> Result<Worker> {
        if worker_id.trim().is_empty() {
            return Err(Error::validation("worker_id must not be empty"));
        }
        let worker = self
            .db
            .workers()
            .upsert(worker_id, "", WorkerStatus::Idle, None)
            .await?;
        info!(worker_id, "worker registered");
        Ok(worker)
    }

    /// Advance the worker's heartbeat; idempotent upsert, no response body.
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<()> {
        if req.worker_id.trim().is_empty() {
            return Err(Error::validation("worker_id must not be empty"));
        }
        self.db
            .workers()
            .upsert(&req.worker_id, &req.hostname, req.status, req.current_job_id)
            .await?;
        Ok(())
    }

    /// Claim the next pending job for a worker, marking the worker busy.
    ///
    /// Returns `None` when the queue is empty; concurrent claimers each get
    /// a distinct job or nothing.
    pub async fn claim_job(&self, worker_id: &str) -> Result<Option<Job>> {
        // The worker must exist; claiming also counts as liveness.
        if self.db.workers().get(worker_id).await?.is_none() {
            return Err(Error::NotFound("worker"));
        }

        let Some(job) = self.db.jobs().claim_pending(worker_id).await? else {
            return Ok(None);
        };

        self.db
            .workers()
            .update_status(worker_id, WorkerStatus::Busy, Some(job.id))
            .await?;

        info!(worker_id, job_id = %job.id, "job claimed");
        self.invalidator.on_job_status(job.id).await;
        Ok(Some(job))
    }

    /// Finish a job successfully and return the worker to idle.
    pub async fn complete_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        places_scraped: i64,
    ) -> Result<Job> {
        let job = self
            .finish(job_id, worker_id, JobStatus::Completed, None, places_scraped)
            .await?;
        info!(worker_id, %job_id, places_scraped, "job completed");
        Ok(job)
    }

    /// Mark a job failed with the worker's error message.
    pub async fn fail_job(&self, job_id: Uuid, worker_id: &str, message: &str) -> Result<Job> {
        let job = self
            .finish(job_id, worker_id, JobStatus::Failed, Some(message), 0)
            .await?;
        info!(worker_id, %job_id, message, "job failed");
        Ok(job)
    }

    /// Shared transactional tail of complete/fail.
    async fn finish(
        &self,
        job_id: Uuid,
        worker_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
        places_scraped: i64,
    ) -> Result<Job> {
        let mut tx = self.db.pool().begin().await.ctx("begin job finish")?;

        let current: Option<(Option<String>, JobStatus)> =
            sqlx::query_as("SELECT worker_id, status FROM scrape_jobs WHERE id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .ctx("lock job for finish")?;

        let Some((owner, from)) = current else {
            return Err(Error::NotFound("job"));
        };
        if owner.as_deref() != Some(worker_id) {
            return Err(Error::conflict(format!(
                "job {job_id} is not held by worker {worker_id}"
            )));
        }
        check_transition(from, status)?;

        let job = sqlx::query_as::<_, Job>(
            "UPDATE scrape_jobs
             SET status = $2, worker_id = NULL, completed_at = NOW(),
                 error_message = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(job_id)
        .bind(status)
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await
        .ctx("finish job")?;

        let jobs_delta = i64::from(status == JobStatus::Completed);
        sqlx::query(
            "UPDATE workers
             SET status = 'idle', current_job_id = NULL,
                 jobs_completed = jobs_completed + $2,
                 places_scraped = places_scraped + $3
             WHERE id = $1",
        )
        .bind(worker_id)
        .bind(jobs_delta)
        .bind(places_scraped)
        .execute(&mut *tx)
        .await
        .ctx("settle worker after finish")?;

        tx.commit().await.ctx("commit job finish")?;

        self.invalidator.on_job_status(job_id).await;
        Ok(job)
    }

    /// Return a held job to the pending queue and idle the worker.
    pub async fn release_job(&self, job_id: Uuid, worker_id: &str) -> Result<Job> {
        let mut tx = self.db.pool().begin().await.ctx("begin job release")?;

        let owner: Option<Option<String>> =
            sqlx::query_scalar("SELECT worker_id FROM scrape_jobs WHERE id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .ctx("lock job for release")?;

        let Some(owner) = owner else {
            return Err(Error::NotFound("job"));
        };
        if owner.as_deref() != Some(worker_id) {
            return Err(Error::conflict(format!(
                "job {job_id} is not held by worker {worker_id}"
            )));
        }

        let job = sqlx::query_as::<_, Job>(
            "UPDATE scrape_jobs
             SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .ctx("release job")?;

        sqlx::query(
            "UPDATE work_items SET status = 'new'
             WHERE parent_id = $1 AND status = 'in_progress'",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .ctx("release job items")?;

        sqlx::query("UPDATE workers SET status = 'idle', current_job_id = NULL WHERE id = $1")
            .bind(worker_id)
            .execute(&mut *tx)
            .await
            .ctx("idle worker after release")?;

        tx.commit().await.ctx("commit job release")?;

        info!(worker_id, %job_id, "job released");
        self.invalidator.on_job_status(job_id).await;
        Ok(job)
    }

    /// Remove a worker. Any job it still held goes back to pending.
    pub async fn unregister(&self, worker_id: &str) -> Result<()> {
        let mut tx = self.db.pool().begin().await.ctx("begin unregister")?;

        let held: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE scrape_jobs
             SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
             WHERE worker_id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
             RETURNING id",
        )
        .bind(worker_id)
        .fetch_all(&mut *tx)
        .await
        .ctx("release jobs on unregister")?;

        if !held.is_empty() {
            let job_ids: Vec<Uuid> = held.iter().map(|(id,)| *id).collect();
            sqlx::query(
                "UPDATE work_items SET status = 'new'
                 WHERE parent_id = ANY($1) AND status = 'in_progress'",
            )
            .bind(&job_ids)
            .execute(&mut *tx)
            .await
            .ctx("release items on unregister")?;
        }

        let deleted = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(worker_id)
            .execute(&mut *tx)
            .await
            .ctx("delete worker")?;

        tx.commit().await.ctx("commit unregister")?;

        if deleted.rows_affected() == 0 {
            return Err(Error::NotFound("worker"));
        }

        info!(worker_id, released = held.len(), "worker unregistered");
        for (job_id,) in held {
            self.invalidator.on_job_status(job_id).await;
        }
        Ok(())
    }

    pub async fn get(&self, worker_id: &str) -> Result<Worker> {
        self.db
            .workers()
            .get(worker_id)
            .await?
            .ok_or(Error::NotFound("worker"))
    }

    pub async fn list(&self) -> Result<Vec<Worker>> {
        self.db.workers().list().await
    }

    pub async fn stats(&self) -> Result<WorkerStats> {
        self.db.workers().get_stats().await
    }
}
