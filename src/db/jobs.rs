//! Outer job repository.

use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::db::DbContext;
use crate::db::models::{Job, JobFilter, JobStats, JobStatus, ScrapeConfig};
use crate::error::{Result, StorageContext};

/// Outer job operations.
pub struct JobOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> JobOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert a new job in `pending` state and return the stored row.
    pub async fn create(
        &self,
        name: &str,
        priority: i32,
        keywords: &[String],
        config: &ScrapeConfig,
    ) -> Result<Job> {
        sqlx::query_as::<_, Job>(
            "INSERT INTO scrape_jobs (id, name, priority, keywords, config)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(priority)
        .bind(keywords)
        .bind(sqlx::types::Json(config))
        .fetch_one(self.ctx.pool())
        .await
        .ctx("create job")
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM scrape_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await
            .ctx("get job")
    }

    /// Update the client-mutable fields of a job.
    pub async fn update(&self, job: &Job) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE scrape_jobs
             SET name = $2, priority = $3, keywords = $4, config = $5,
                 error_message = $6, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(job.priority)
        .bind(&job.keywords)
        .bind(&job.config)
        .bind(&job.error_message)
        .fetch_optional(self.ctx.pool())
        .await
        .ctx("update job")
    }

    /// Delete a job; its work items and raw results cascade.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scrape_jobs WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await
            .ctx("delete job")?;
        Ok(result.rows_affected() > 0)
    }

    /// List jobs matching the filter, newest first by default.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut qb = QueryBuilder::new("SELECT * FROM scrape_jobs WHERE TRUE");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(worker_id) = &filter.worker_id {
            qb.push(" AND worker_id = ").push_bind(worker_id);
        }
        // order_by/order_dir come from a closed enum, not user strings
        qb.push(format!(
            " ORDER BY {} {}",
            filter.order_by.as_sql(),
            filter.order_dir.as_sql()
        ));
        qb.push(" LIMIT ").push_bind(filter.limit);
        qb.push(" OFFSET ").push_bind(filter.offset);

        qb.build_query_as::<Job>()
            .fetch_all(self.ctx.pool())
            .await
            .ctx("list jobs")
    }

    /// Count jobs matching the filter (for pagination totals).
    pub async fn count(&self, filter: &JobFilter) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM scrape_jobs WHERE TRUE");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(worker_id) = &filter.worker_id {
            qb.push(" AND worker_id = ").push_bind(worker_id);
        }
        qb.build_query_scalar::<i64>()
            .fetch_one(self.ctx.pool())
            .await
            .ctx("count jobs")
    }

    /// Set a job's status. Terminal states also stamp `completed_at`.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE scrape_jobs
             SET status = $2,
                 error_message = COALESCE($3, error_message),
                 updated_at = NOW(),
                 completed_at = CASE
                     WHEN $2 IN ('completed', 'failed', 'cancelled') THEN NOW()
                     ELSE completed_at
                 END
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(status)
        .bind(error_message)
        .fetch_optional(self.ctx.pool())
        .await
        .ctx("update job status")
    }

    /// Update the progress triple. `None` fields are left untouched.
    pub async fn update_progress(
        &self,
        id: Uuid,
        total: Option<i32>,
        scraped: Option<i32>,
        failed: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scrape_jobs
             SET total_places = COALESCE($2, total_places),
                 scraped_places = COALESCE($3, scraped_places),
                 failed_places = COALESCE($4, failed_places),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(total)
        .bind(scraped)
        .bind(failed)
        .execute(self.ctx.pool())
        .await
        .ctx("update job progress")?;
        Ok(())
    }

    /// Atomically claim the next pending job for a worker.
    ///
    /// One statement: selects the highest-priority (then oldest) pending job,
    /// skipping rows locked by concurrent claimers, and flips it to `running`
    /// with the worker assigned. Under concurrent callers each pending job is
    /// claimed by at most one worker.
    pub async fn claim_pending(&self, worker_id: &str) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE scrape_jobs
             SET status = 'running', worker_id = $1, started_at = NOW(), updated_at = NOW()
             WHERE id = (
                 SELECT id FROM scrape_jobs
                 WHERE status IN ('pending', 'queued')
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING *",
        )
        .bind(worker_id)
        .fetch_optional(self.ctx.pool())
        .await
        .ctx("claim pending job")
    }

    /// Return a job to the pending queue, clearing its assignment.
    pub async fn release(&self, id: Uuid) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE scrape_jobs
             SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .fetch_optional(self.ctx.pool())
        .await
        .ctx("release job")
    }

    /// Per-status counts across all jobs.
    pub async fn stats(&self) -> Result<JobStats> {
        sqlx::query_as::<_, JobStats>(
            "SELECT
                 COUNT(*)::BIGINT AS total,
                 COUNT(*) FILTER (WHERE status = 'pending')::BIGINT AS pending,
                 COUNT(*) FILTER (WHERE status = 'queued')::BIGINT AS queued,
                 COUNT(*) FILTER (WHERE status = 'running')::BIGINT AS running,
                 COUNT(*) FILTER (WHERE status = 'paused')::BIGINT AS paused,
                 COUNT(*) FILTER (WHERE status = 'completed')::BIGINT AS completed,
                 COUNT(*) FILTER (WHERE status = 'failed')::BIGINT AS failed,
                 COUNT(*) FILTER (WHERE status = 'cancelled')::BIGINT AS cancelled
             FROM scrape_jobs",
        )
        .fetch_one(self.ctx.pool())
        .await
        .ctx("job stats")
    }
}
