//! Read-path cache.
//!
//! Entries are opaque serialized payloads under namespaced keys; readers go
//! through [`Cache`] and never branch on which implementation is behind it.
//! When the backing store is unreachable at startup the no-op variant is
//! substituted and every consumer silently degrades to fresh reads.

pub mod invalidator;
pub mod noop;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

/// Key/value cache with glob pattern deletion.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// Delete every key matching a glob pattern; returns the number removed.
    async fn delete_by_pattern(&self, pattern: &str) -> anyhow::Result<u64>;
    async fn close(&self);
}

// ── Key namespace ───────────────────────────────────────────────────

/// Cache key builders. Query-shaped keys embed a fingerprint of their
/// filter parameters so distinct queries never collide.
pub mod keys {
    use uuid::Uuid;

    pub const DASHBOARD_STATS: &str = "cache:dashboard:stats";
    pub const JOBS_STATS: &str = "cache:dashboard:jobs:stats";
    pub const BL_STATS: &str = "bl:stats";
    pub const BL_TOTAL_APPROX: &str = "bl:total:approx";

    pub fn jobs_list(fingerprint: &str) -> String {
        format!("cache:dashboard:jobs:list:{fingerprint}")
    }

    pub fn job_detail(id: Uuid) -> String {
        format!("cache:dashboard:jobs:{id}")
    }

    pub fn results(job_id: Uuid, fingerprint: &str) -> String {
        format!("cache:dashboard:results:{job_id}:{fingerprint}")
    }

    pub fn results_all(fingerprint: &str) -> String {
        format!("cache:dashboard:results:all:{fingerprint}")
    }

    pub fn search(fingerprint: &str) -> String {
        format!("cache:dashboard:search:{fingerprint}")
    }

    pub fn count(fingerprint: &str) -> String {
        format!("bl:count:{fingerprint}")
    }

    pub fn job_count(job_id: Uuid) -> String {
        format!("bl:jobcount:{job_id}")
    }
}

// ── Default TTLs ────────────────────────────────────────────────────

pub mod ttl {
    use std::time::Duration;

    pub const STATS: Duration = Duration::from_secs(30);
    pub const JOBS_LIST: Duration = Duration::from_secs(60);
    pub const JOB_DETAIL: Duration = Duration::from_secs(120);
    pub const RESULTS: Duration = Duration::from_secs(60);
    pub const SEARCH: Duration = Duration::from_secs(30);
    pub const COUNT: Duration = Duration::from_secs(60);
    pub const STATS_AGGREGATE: Duration = Duration::from_secs(120);
    pub const CATEGORY_LIST: Duration = Duration::from_secs(300);
}

/// Deterministic fingerprint of filter parameters, used to namespace cached
/// query results.
pub fn fingerprint(parts: &[&str]) -> String {
    let joined = parts.join("\x1f");
    format!("{:016x}", rapidhash::v3::rapidhash_v3(joined.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let a = fingerprint(&["1", "20", "running"]);
        let b = fingerprint(&["1", "20", "running"]);
        let c = fingerprint(&["20", "1", "running"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn fingerprint_separator_prevents_concat_collisions() {
        // "ab" + "c" must not fingerprint like "a" + "bc"
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
    }
}
