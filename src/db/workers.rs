//! Worker registry repository.

use std::time::Duration;

use uuid::Uuid;

use crate::db::DbContext;
use crate::db::models::{Worker, WorkerStats, WorkerStatus};
use crate::error::{Result, StorageContext};

/// Worker registry operations.
pub struct WorkerOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> WorkerOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert or refresh a worker row, advancing its heartbeat timestamp.
    ///
    /// Register and heartbeat both land here; the operation is idempotent.
    pub async fn upsert(
        &self,
        id: &str,
        hostname: &str,
        status: WorkerStatus,
        current_job_id: Option<Uuid>,
    ) -> Result<Worker> {
        sqlx::query_as::<_, Worker>(
            "INSERT INTO workers (id, hostname, status, current_job_id, last_heartbeat)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (id) DO UPDATE SET
                 hostname = EXCLUDED.hostname,
                 status = EXCLUDED.status,
                 current_job_id = EXCLUDED.current_job_id,
                 last_heartbeat = NOW()
             RETURNING *",
        )
        .bind(id)
        .bind(hostname)
        .bind(status)
        .bind(current_job_id)
        .fetch_one(self.ctx.pool())
        .await
        .ctx("upsert worker")
    }

    pub async fn get(&self, id: &str) -> Result<Option<Worker>> {
        sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await
            .ctx("get worker")
    }

    pub async fn list(&self) -> Result<Vec<Worker>> {
        sqlx::query_as::<_, Worker>("SELECT * FROM workers ORDER BY last_heartbeat DESC")
            .fetch_all(self.ctx.pool())
            .await
            .ctx("list workers")
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await
            .ctx("delete worker")?;
        Ok(result.rows_affected() > 0)
    }

    /// Set a worker's status and current job assignment.
    pub async fn update_status(
        &self,
        id: &str,
        status: WorkerStatus,
        current_job_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query("UPDATE workers SET status = $2, current_job_id = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(current_job_id)
            .execute(self.ctx.pool())
            .await
            .ctx("update worker status")?;
        Ok(())
    }

    /// Mark workers silent for longer than `timeout` as offline.
    ///
    /// In the same transaction, any job held by a swept worker loses its
    /// assignment: non-terminal jobs return to `pending` (started_at
    /// cleared) and their in-progress items become claimable again.
    ///
    /// # Returns
    /// The number of workers transitioned to offline.
    pub async fn mark_offline_workers(&self, timeout: Duration) -> Result<u64> {
        let mut tx = self.ctx.pool().begin().await.ctx("begin offline sweep")?;

        let stale: Vec<(String,)> = sqlx::query_as(
            "UPDATE workers
             SET status = 'offline', current_job_id = NULL
             WHERE status != 'offline'
               AND last_heartbeat < NOW() - make_interval(secs => $1::double precision)
             RETURNING id",
        )
        .bind(timeout.as_secs_f64())
        .fetch_all(&mut *tx)
        .await
        .ctx("sweep stale workers")?;

        if !stale.is_empty() {
            let ids: Vec<String> = stale.into_iter().map(|(id,)| id).collect();

            let released: Vec<(Uuid,)> = sqlx::query_as(
                "UPDATE scrape_jobs
                 SET worker_id = NULL,
                     updated_at = NOW(),
                     status = CASE
                         WHEN status IN ('completed', 'failed', 'cancelled') THEN status
                         ELSE 'pending'
                     END,
                     started_at = CASE
                         WHEN status IN ('completed', 'failed', 'cancelled') THEN started_at
                         ELSE NULL
                     END
                 WHERE worker_id = ANY($1)
                 RETURNING id",
            )
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .ctx("release jobs of stale workers")?;

            if !released.is_empty() {
                let job_ids: Vec<Uuid> = released.into_iter().map(|(id,)| id).collect();
                sqlx::query(
                    "UPDATE work_items SET status = 'new'
                     WHERE parent_id = ANY($1) AND status = 'in_progress'",
                )
                .bind(&job_ids)
                .execute(&mut *tx)
                .await
                .ctx("release items of stale workers")?;
            }

            tx.commit().await.ctx("commit offline sweep")?;
            return Ok(ids.len() as u64);
        }

        tx.commit().await.ctx("commit offline sweep")?;
        Ok(0)
    }

    /// Fleet-wide counts and counter totals.
    pub async fn get_stats(&self) -> Result<WorkerStats> {
        sqlx::query_as::<_, WorkerStats>(
            "SELECT
                 COUNT(*)::BIGINT AS total,
                 COUNT(*) FILTER (WHERE status = 'idle')::BIGINT AS idle,
                 COUNT(*) FILTER (WHERE status = 'busy')::BIGINT AS busy,
                 COUNT(*) FILTER (WHERE status = 'offline')::BIGINT AS offline,
                 COALESCE(SUM(jobs_completed), 0)::BIGINT AS jobs_completed,
                 COALESCE(SUM(places_scraped), 0)::BIGINT AS places_scraped
             FROM workers",
        )
        .fetch_one(self.ctx.pool())
        .await
        .ctx("worker stats")
    }

    /// Bump a worker's counters. Concurrent increments compose.
    pub async fn increment_stats(
        &self,
        id: &str,
        jobs_completed: i64,
        places_scraped: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workers
             SET jobs_completed = jobs_completed + $2,
                 places_scraped = places_scraped + $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(jobs_completed)
        .bind(places_scraped)
        .execute(self.ctx.pool())
        .await
        .ctx("increment worker stats")?;
        Ok(())
    }

    /// Delete workers that have been offline for longer than `max_age`.
    pub async fn cleanup(&self, max_age: Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM workers
             WHERE status = 'offline'
               AND last_heartbeat < NOW() - make_interval(secs => $1::double precision)",
        )
        .bind(max_age.as_secs_f64())
        .execute(self.ctx.pool())
        .await
        .ctx("cleanup workers")?;
        Ok(result.rows_affected())
    }
}
