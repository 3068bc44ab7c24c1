//! No-op cache, substituted when no cache backend is configured or the
//! backend is unreachable at startup. Every read misses; every write and
//! delete succeeds.

use std::time::Duration;

use async_trait::async_trait;

use super::Cache;

pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn close(&self) {}
}
