use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;

use mapharvest::cache::invalidator::CacheInvalidator;
use mapharvest::cache::noop::NoopCache;
use mapharvest::db::{DbContext, migrate};
use mapharvest::jobs::{CreateJobRequest, JobService};
use mapharvest::registry::WorkerRegistry;

/// Bring a fresh test database to the current schema.
pub async fn setup(pool: &PgPool) -> DbContext {
    migrate::run(pool).await.expect("migration failed");
    DbContext::new(pool.clone())
}

/// Service pair wired to a no-op cache.
pub fn services(db: &DbContext) -> (JobService, WorkerRegistry) {
    let invalidator = CacheInvalidator::new(Arc::new(NoopCache));
    (
        JobService::new(db.clone(), invalidator.clone(), None),
        WorkerRegistry::new(db.clone(), invalidator),
    )
}

/// A minimal create-job request with defaults for everything else.
pub fn job_request(name: &str, keywords: &[&str]) -> CreateJobRequest {
    let body = json!({
        "name": name,
        "keywords": keywords,
    });
    serde_json::from_value(body).expect("valid job request")
}

/// A scraped place document in the shape workers submit.
pub fn place_doc(title: &str) -> serde_json::Value {
    json!({
        "title": title,
        "place_id": format!("place-{title}"),
        "category": "Coffee shop",
        "categories": ["Coffee shop", "Cafe"],
        "address": "Jl. Contoh No. 1",
        "complete_address": {
            "street": "Jl. Contoh No. 1",
            "city": "Jakarta",
            "state": "DKI Jakarta",
            "postal_code": "10110",
            "country": "ID"
        },
        "phone": "+62 21 000 000",
        "web_site": "https://example.com",
        "latitude": -6.21462,
        "longitude": "106.84513",
        "review_count": 42,
        "review_rating": 4.5
    })
}

/// Backdate a worker's heartbeat so the sweep considers it stale.
pub async fn age_worker_heartbeat(pool: &PgPool, worker_id: &str, seconds: i64) {
    sqlx::query(
        "UPDATE workers SET last_heartbeat = NOW() - make_interval(secs => $2::double precision)
         WHERE id = $1",
    )
    .bind(worker_id)
    .bind(seconds as f64)
    .execute(pool)
    .await
    .expect("age heartbeat");
}
