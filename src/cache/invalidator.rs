//! Event-driven cache invalidation.
//!
//! Maps domain events onto the key patterns they make stale. Called after
//! the mutating transaction commits; a failed delete is logged and ignored,
//! so cache trouble never fails the originating request.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::{Cache, keys};

#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn Cache>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// New results were ingested for a job.
    pub async fn on_results(&self, job_id: Uuid) {
        self.delete_patterns(&[
            &format!("cache:dashboard:results:{job_id}:*"),
            "cache:dashboard:results:all:*",
            "cache:dashboard:search:*",
            keys::DASHBOARD_STATS,
            "bl:count:*",
            keys::BL_STATS,
            &keys::job_count(job_id),
        ])
        .await;
    }

    /// A job changed status (claim, pause, resume, complete, ...).
    pub async fn on_job_status(&self, job_id: Uuid) {
        self.delete_patterns(&[
            &keys::job_detail(job_id),
            "cache:dashboard:jobs:list:*",
            keys::JOBS_STATS,
        ])
        .await;
    }

    /// A job was created or deleted: status keys plus dashboard stats.
    pub async fn on_job_lifecycle(&self, job_id: Uuid) {
        self.delete_patterns(&[
            &keys::job_detail(job_id),
            "cache:dashboard:jobs:list:*",
            keys::JOBS_STATS,
            keys::DASHBOARD_STATS,
        ])
        .await;
    }

    /// The liveness sweep released an unknown set of jobs; drop every
    /// job-shaped key at once.
    pub async fn on_sweep(&self) {
        self.delete_patterns(&["cache:dashboard:jobs:*", keys::DASHBOARD_STATS])
            .await;
    }

    async fn delete_patterns(&self, patterns: &[&str]) {
        for pattern in patterns {
            if let Err(error) = self.cache.delete_by_pattern(pattern).await {
                warn!(pattern, %error, "cache invalidation failed");
            }
        }
    }
}
