//! Typed repositories over the Postgres pool.
//!
//! All durable state lives here; the cache is strictly read-through and the
//! broker is notification-only, so the repositories are the source of truth
//! for every component.

pub mod jobs;
pub mod listings;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod queue;
pub mod results;
pub mod workers;

use sqlx::PgPool;

use crate::db::jobs::JobOps;
use crate::db::listings::ListingOps;
use crate::db::queue::QueueOps;
use crate::db::results::ResultOps;
use crate::db::workers::WorkerOps;

/// Database context handing out per-entity repositories.
#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
}

impl DbContext {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Outer job operations.
    pub fn jobs(&self) -> JobOps<'_> {
        JobOps::new(self)
    }

    /// Inner work-item queue operations.
    pub fn queue(&self) -> QueueOps<'_> {
        QueueOps::new(self)
    }

    /// Worker registry operations.
    pub fn workers(&self) -> WorkerOps<'_> {
        WorkerOps::new(self)
    }

    /// Raw result operations.
    pub fn results(&self) -> ResultOps<'_> {
        ResultOps::new(self)
    }

    /// Normalized listing operations.
    pub fn listings(&self) -> ListingOps<'_> {
        ListingOps::new(self)
    }
}
