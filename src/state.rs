//! Application state shared across components (web, monitor, services).

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::cache::invalidator::CacheInvalidator;
use crate::db::DbContext;
use crate::jobs::JobService;
use crate::registry::WorkerRegistry;
use crate::web::auth::AuthConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: DbContext,
    pub cache: Arc<dyn Cache>,
    pub invalidator: CacheInvalidator,
    pub jobs: JobService,
    pub registry: WorkerRegistry,
    pub auth: AuthConfig,
    pub download_timeout: Duration,
    pub max_body_bytes: usize,
}
