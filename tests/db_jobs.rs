#[allow(dead_code)]
mod helpers;

use mapharvest::db::models::{JobStatus, ScrapeConfig};
use sqlx::PgPool;

// ── claim_pending ───────────────────────────────────────────────────

#[sqlx::test(migrations = false)]
async fn claim_empty_queue_returns_none(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let claimed = db.jobs().claim_pending("w1").await.unwrap();
    assert!(claimed.is_none());
}

#[sqlx::test(migrations = false)]
async fn claim_assigns_worker_and_marks_running(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let config = ScrapeConfig::default();
    let job = db
        .jobs()
        .create("coffee", 0, &["cafe jakarta".to_owned()], &config)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.started_at.is_none());

    let claimed = db
        .jobs()
        .claim_pending("w1")
        .await
        .unwrap()
        .expect("job should be claimable");

    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
    assert!(claimed.started_at.is_some());
}

#[sqlx::test(migrations = false)]
async fn claim_orders_by_priority_then_age(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let config = ScrapeConfig::default();

    let low_old = db
        .jobs()
        .create("low-old", 1, &["a".to_owned()], &config)
        .await
        .unwrap();
    let high = db
        .jobs()
        .create("high", 9, &["b".to_owned()], &config)
        .await
        .unwrap();
    let low_new = db
        .jobs()
        .create("low-new", 1, &["c".to_owned()], &config)
        .await
        .unwrap();

    let first = db.jobs().claim_pending("w1").await.unwrap().unwrap();
    assert_eq!(first.id, high.id, "highest priority first");

    let second = db.jobs().claim_pending("w1").await.unwrap().unwrap();
    assert_eq!(second.id, low_old.id, "oldest within a priority first");

    let third = db.jobs().claim_pending("w1").await.unwrap().unwrap();
    assert_eq!(third.id, low_new.id);
}

#[sqlx::test(migrations = false)]
async fn concurrent_claims_hand_out_each_job_once(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let config = ScrapeConfig::default();
    db.jobs()
        .create("solo", 0, &["kw".to_owned()], &config)
        .await
        .unwrap();

    let db1 = db.clone();
    let db2 = db.clone();
    let (a, b) = tokio::join!(
        async move { db1.jobs().claim_pending("w1").await.unwrap() },
        async move { db2.jobs().claim_pending("w2").await.unwrap() },
    );

    // Exactly one of the two concurrent claimers wins
    assert!(a.is_some() ^ b.is_some());
}

#[sqlx::test(migrations = false)]
async fn claim_skips_non_claimable_statuses(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let config = ScrapeConfig::default();
    let job = db
        .jobs()
        .create("coffee", 0, &["kw".to_owned()], &config)
        .await
        .unwrap();
    db.jobs()
        .update_status(job.id, JobStatus::Cancelled, None)
        .await
        .unwrap();

    assert!(db.jobs().claim_pending("w1").await.unwrap().is_none());
}

// ── release ─────────────────────────────────────────────────────────

#[sqlx::test(migrations = false)]
async fn release_returns_job_to_pending(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let config = ScrapeConfig::default();
    db.jobs()
        .create("coffee", 0, &["kw".to_owned()], &config)
        .await
        .unwrap();
    let claimed = db.jobs().claim_pending("w1").await.unwrap().unwrap();

    let released = db.jobs().release(claimed.id).await.unwrap().unwrap();
    assert_eq!(released.status, JobStatus::Pending);
    assert!(released.worker_id.is_none());
    assert!(released.started_at.is_none());

    // Claimable again
    assert!(db.jobs().claim_pending("w2").await.unwrap().is_some());
}

// ── stats / progress ────────────────────────────────────────────────

#[sqlx::test(migrations = false)]
async fn stats_count_per_status(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let config = ScrapeConfig::default();

    for name in ["a", "b", "c"] {
        db.jobs()
            .create(name, 0, &["kw".to_owned()], &config)
            .await
            .unwrap();
    }
    db.jobs().claim_pending("w1").await.unwrap().unwrap();

    let stats = db.jobs().stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.completed, 0);
}

#[sqlx::test(migrations = false)]
async fn update_progress_leaves_untouched_fields(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let config = ScrapeConfig::default();
    let job = db
        .jobs()
        .create("coffee", 0, &["kw".to_owned()], &config)
        .await
        .unwrap();

    db.jobs()
        .update_progress(job.id, Some(18), None, None)
        .await
        .unwrap();
    db.jobs()
        .update_progress(job.id, None, Some(7), Some(2))
        .await
        .unwrap();

    let job = db.jobs().get(job.id).await.unwrap().unwrap();
    assert_eq!(job.total_places, 18);
    assert_eq!(job.scraped_places, 7);
    assert_eq!(job.failed_places, 2);
}

#[sqlx::test(migrations = false)]
async fn terminal_status_stamps_completed_at(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let config = ScrapeConfig::default();
    let job = db
        .jobs()
        .create("coffee", 0, &["kw".to_owned()], &config)
        .await
        .unwrap();
    db.jobs().claim_pending("w1").await.unwrap();

    let done = db
        .jobs()
        .update_status(job.id, JobStatus::Completed, None)
        .await
        .unwrap()
        .unwrap();
    assert!(done.completed_at.is_some());
}
