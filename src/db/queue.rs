//! Inner work-item queue.
//!
//! Claim safety comes from the database: a single `UPDATE ... WHERE id IN
//! (SELECT ... FOR UPDATE SKIP LOCKED)` statement flips `new` items to
//! `in_progress`, so concurrent pollers never observe the same item. The
//! optional broker only advertises that items exist; this table is always
//! the source of truth.

use uuid::Uuid;

use crate::db::DbContext;
use crate::db::models::{ItemStatus, PayloadType, WorkItem};
use crate::error::{Result, StorageContext};
use crate::payload::TaskPayload;

impl PayloadType {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Place => "place",
            Self::Email => "email",
        }
    }
}

/// Polling cadence for queue consumers when no broker is configured.
///
/// Starts at 50ms after an empty poll and doubles up to 300ms; any claimed
/// item resets it.
#[derive(Debug, Clone, Copy)]
pub struct PollBackoff {
    current: std::time::Duration,
}

impl PollBackoff {
    const FLOOR: std::time::Duration = std::time::Duration::from_millis(50);
    const CEILING: std::time::Duration = std::time::Duration::from_millis(300);

    pub fn new() -> Self {
        Self {
            current: Self::FLOOR,
        }
    }

    /// Delay to sleep after an empty poll.
    pub fn next_delay(&mut self) -> std::time::Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::CEILING);
        delay
    }

    /// Call after a successful claim.
    pub fn reset(&mut self) {
        self.current = Self::FLOOR;
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-parent item counts used for progress roll-up.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct ItemCounts {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
}

impl ItemCounts {
    /// All items have reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.total > 0 && self.completed + self.failed == self.total
    }
}

/// Work-item queue operations.
pub struct QueueOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> QueueOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Push a single item carrying its parent job id.
    pub async fn push_with_parent(
        &self,
        payload: &TaskPayload,
        priority: i32,
        parent_id: Option<Uuid>,
    ) -> Result<WorkItem> {
        let bytes = payload.encode()?;
        sqlx::query_as::<_, WorkItem>(
            "INSERT INTO work_items (priority, payload_type, payload, parent_id)
             VALUES ($1, $2::payload_type, $3, $4)
             RETURNING *",
        )
        .bind(priority)
        .bind(payload.kind().as_sql())
        .bind(&bytes)
        .bind(parent_id)
        .fetch_one(self.ctx.pool())
        .await
        .ctx("push work item")
    }

    /// Batch insert items for one parent using UNNEST for a single round-trip.
    pub async fn push_batch(
        &self,
        items: &[(TaskPayload, i32)],
        parent_id: Uuid,
    ) -> Result<Vec<WorkItem>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut kinds: Vec<&'static str> = Vec::with_capacity(items.len());
        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(items.len());
        let mut priorities: Vec<i32> = Vec::with_capacity(items.len());

        for (payload, priority) in items {
            kinds.push(payload.kind().as_sql());
            payloads.push(payload.encode()?);
            priorities.push(*priority);
        }

        sqlx::query_as::<_, WorkItem>(
            "INSERT INTO work_items (payload_type, payload, priority, parent_id)
             SELECT v.kind::payload_type, v.payload, v.priority, $4
             FROM UNNEST($1::text[], $2::bytea[], $3::int[]) AS v(kind, payload, priority)
             RETURNING *",
        )
        .bind(&kinds)
        .bind(&payloads)
        .bind(&priorities)
        .bind(parent_id)
        .fetch_all(self.ctx.pool())
        .await
        .ctx("push work item batch")
    }

    /// Atomically claim up to `limit` new items, flipping them to in-progress.
    ///
    /// Concurrent callers skip each other's locked rows, so every item is
    /// observed by at most one claimer.
    pub async fn fetch_batch(&self, limit: i64) -> Result<Vec<WorkItem>> {
        let mut items = sqlx::query_as::<_, WorkItem>(
            "UPDATE work_items
             SET status = 'in_progress'
             WHERE id IN (
                 SELECT id FROM work_items
                 WHERE status = 'new'
                 ORDER BY priority DESC, created_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING *",
        )
        .bind(limit)
        .fetch_all(self.ctx.pool())
        .await
        .ctx("fetch work item batch")?;

        // RETURNING order is unspecified; hand items out in claim order
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(items)
    }

    /// Claim the next available item, if any.
    pub async fn claim_next(&self) -> Result<Option<WorkItem>> {
        Ok(self.fetch_batch(1).await?.into_iter().next())
    }

    pub async fn mark_complete(&self, id: i64) -> Result<()> {
        self.mark(id, ItemStatus::Completed).await
    }

    pub async fn mark_failed(&self, id: i64) -> Result<()> {
        self.mark(id, ItemStatus::Failed).await
    }

    async fn mark(&self, id: i64, status: ItemStatus) -> Result<()> {
        sqlx::query("UPDATE work_items SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(self.ctx.pool())
            .await
            .ctx("mark work item")?;
        Ok(())
    }

    /// Return a parent's in-progress items to the queue.
    ///
    /// Used when a job is released or its worker is swept offline, so the
    /// items become claimable again.
    pub async fn release_for_parent(&self, parent_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE work_items SET status = 'new'
             WHERE parent_id = $1 AND status = 'in_progress'",
        )
        .bind(parent_id)
        .execute(self.ctx.pool())
        .await
        .ctx("release work items")?;
        Ok(result.rows_affected())
    }

    /// Item counts for one parent job.
    pub async fn counts(&self, parent_id: Uuid) -> Result<ItemCounts> {
        sqlx::query_as::<_, ItemCounts>(
            "SELECT
                 COUNT(*)::BIGINT AS total,
                 COUNT(*) FILTER (WHERE status = 'completed')::BIGINT AS completed,
                 COUNT(*) FILTER (WHERE status = 'failed')::BIGINT AS failed
             FROM work_items
             WHERE parent_id = $1",
        )
        .bind(parent_id)
        .fetch_one(self.ctx.pool())
        .await
        .ctx("work item counts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_to_ceiling_and_resets() {
        let mut backoff = PollBackoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn item_counts_terminal_check() {
        let done = ItemCounts {
            total: 4,
            completed: 3,
            failed: 1,
        };
        assert!(done.all_terminal());

        let pending = ItemCounts {
            total: 4,
            completed: 3,
            failed: 0,
        };
        assert!(!pending.all_terminal());

        // A parent with no items never rolls up
        assert!(!ItemCounts::default().all_terminal());
    }
}
