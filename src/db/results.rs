//! Raw result repository and ingest path.
//!
//! Ingest is idempotent: the batch insert uses `ON CONFLICT DO NOTHING` on
//! the `(job_id, payload digest)` key, and normalization runs in the same
//! transaction for exactly the rows that were actually inserted.

use futures::TryStreamExt;
use futures::stream::BoxStream;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::db::models::{PlaceStats, RawResult};
use crate::db::{DbContext, normalize};
use crate::error::{Result, StorageContext};

/// Rows per INSERT statement, kept under bound-parameter limits.
const INSERT_CHUNK: usize = 100;

/// Rows fetched per round-trip while streaming.
const STREAM_CHUNK: i64 = 500;

/// Raw result operations.
pub struct ResultOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ResultOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert a single result and normalize it, in one transaction.
    pub async fn create(&self, job_id: Uuid, payload: &serde_json::Value) -> Result<Option<i64>> {
        let mut inserted = self.create_batch(job_id, std::slice::from_ref(payload)).await?;
        Ok(inserted.pop())
    }

    /// Insert a batch of results and normalize each inserted row.
    ///
    /// One transaction for the whole batch; duplicate payloads are skipped
    /// and not re-normalized. Returns the ids of the rows actually inserted.
    pub async fn create_batch(
        &self,
        job_id: Uuid,
        payloads: &[serde_json::Value],
    ) -> Result<Vec<i64>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.ctx.pool().begin().await.ctx("begin result ingest")?;
        let mut inserted_ids = Vec::with_capacity(payloads.len());

        for chunk in payloads.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::new("INSERT INTO raw_results (job_id, payload) ");
            qb.push_values(chunk, |mut row, payload| {
                row.push_bind(job_id).push_bind(payload);
            });
            qb.push(" ON CONFLICT DO NOTHING RETURNING id, payload");

            let rows: Vec<(i64, serde_json::Value)> = qb
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .ctx("insert raw results")?;

            // Normalize inside the same transaction: a committed raw result
            // is never visible without its listing.
            for (raw_id, payload) in rows {
                normalize::project(&mut *tx, job_id, raw_id, &payload).await?;
                inserted_ids.push(raw_id);
            }
        }

        tx.commit().await.ctx("commit result ingest")?;
        Ok(inserted_ids)
    }

    /// Results for one job, stable pagination by id.
    pub async fn list_by_job(&self, job_id: Uuid, limit: i64, offset: i64) -> Result<Vec<RawResult>> {
        sqlx::query_as::<_, RawResult>(
            "SELECT * FROM raw_results WHERE job_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
        )
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await
        .ctx("list results by job")
    }

    pub async fn list_all(&self, limit: i64, offset: i64) -> Result<Vec<RawResult>> {
        sqlx::query_as::<_, RawResult>(
            "SELECT * FROM raw_results ORDER BY id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await
        .ctx("list results")
    }

    /// Stream results, optionally restricted to one job, ordered by id.
    ///
    /// Keyset pagination; the stream owns its pool handle so it can back a
    /// streaming response.
    pub fn stream(&self, job_id: Option<Uuid>) -> BoxStream<'static, Result<RawResult>> {
        let pool = self.ctx.pool().clone();
        let stream = futures::stream::try_unfold((pool, 0i64), move |(pool, last_id)| async move {
            let rows: Vec<RawResult> = sqlx::query_as(
                "SELECT * FROM raw_results
                 WHERE id > $1 AND ($2::uuid IS NULL OR job_id = $2)
                 ORDER BY id LIMIT $3",
            )
            .bind(last_id)
            .bind(job_id)
            .bind(STREAM_CHUNK)
            .fetch_all(&pool)
            .await
            .ctx("stream results")?;

            match rows.last() {
                None => Ok::<_, crate::error::Error>(None),
                Some(last) => {
                    let next = last.id;
                    Ok(Some((
                        futures::stream::iter(rows.into_iter().map(Ok)),
                        (pool, next),
                    )))
                }
            }
        });
        Box::pin(stream.try_flatten())
    }

    /// Count results, optionally for one job.
    pub async fn count(&self, job_id: Option<Uuid>) -> Result<i64> {
        match job_id {
            Some(id) => sqlx::query_scalar("SELECT COUNT(*) FROM raw_results WHERE job_id = $1")
                .bind(id)
                .fetch_one(self.ctx.pool())
                .await
                .ctx("count results"),
            None => sqlx::query_scalar("SELECT COUNT(*) FROM raw_results")
                .fetch_one(self.ctx.pool())
                .await
                .ctx("count results"),
        }
    }

    /// Volume aggregates across all jobs.
    pub async fn get_place_stats(&self) -> Result<PlaceStats> {
        sqlx::query_as::<_, PlaceStats>(
            "SELECT
                 COUNT(*)::BIGINT AS total_results,
                 COUNT(DISTINCT job_id)::BIGINT AS jobs_with_results
             FROM raw_results",
        )
        .fetch_one(self.ctx.pool())
        .await
        .ctx("place stats")
    }
}
