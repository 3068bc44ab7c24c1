#[allow(dead_code)]
mod helpers;

use mapharvest::db::models::{JobStatus, PayloadType};
use mapharvest::error::Error;
use mapharvest::jobs::SubmitResultsRequest;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

// ── Fan-out ─────────────────────────────────────────────────────────

#[sqlx::test(migrations = false)]
async fn create_fans_out_one_item_per_keyword(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);

    let job = jobs
        .create(helpers::job_request(
            "coffee",
            &["cafe jakarta", "coffee bandung"],
        ))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.total_places, 2);
    assert_eq!(job.scraped_places, 0);

    let counts = db.queue().counts(job.id).await.unwrap();
    assert_eq!(counts.total, 2);

    let items = db.queue().fetch_batch(10).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.parent_id == Some(job.id)));
    assert!(items.iter().all(|i| i.payload_type == PayloadType::Search));
}

#[sqlx::test(migrations = false)]
async fn coverage_mode_multiplies_by_grid_tiles(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);

    let request = serde_json::from_value(json!({
        "name": "area sweep",
        "keywords": ["cafe", "restaurant"],
        "coverage_mode": true,
        "bounding_box": {
            "min_lat": -7.0, "min_lon": 106.0,
            "max_lat": -6.0, "max_lon": 108.0
        }
    }))
    .unwrap();

    let job = jobs.create(request).await.unwrap();
    // 2 keywords × default 3×3 grid
    assert_eq!(job.total_places, 18);
}

#[sqlx::test(migrations = false)]
async fn create_rejects_empty_inputs(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);

    let err = jobs
        .create(helpers::job_request("", &["kw"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = jobs
        .create(helpers::job_request("named", &["", "   "]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[sqlx::test(migrations = false)]
async fn config_defaults_are_applied(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);

    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();
    let config = &job.config.0;
    assert_eq!(config.lang, "en");
    assert_eq!(config.zoom, 15);
    assert_eq!(config.radius, 10_000);
    assert_eq!(config.depth, 10);
    assert_eq!(config.max_time_seconds, 600);
}

// ── State machine ───────────────────────────────────────────────────

#[sqlx::test(migrations = false)]
async fn pause_resume_cancel_follow_the_graph(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);

    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();
    db.jobs().claim_pending("w1").await.unwrap().unwrap();

    let paused = jobs.pause(job.id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);

    let resumed = jobs.resume(job.id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Running);

    let cancelled = jobs.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
}

#[sqlx::test(migrations = false)]
async fn illegal_transitions_mutate_nothing(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);

    // pause requires running
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();
    let err = jobs.pause(job.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(jobs.get(job.id).await.unwrap().status, JobStatus::Pending);

    // terminal states are final
    let done = jobs.cancel(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Cancelled);
    let err = jobs.resume(job.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(jobs.get(job.id).await.unwrap().status, JobStatus::Cancelled);
}

// ── Result ingest & progress ────────────────────────────────────────

#[sqlx::test(migrations = false)]
async fn submit_results_updates_progress_from_stored_count(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    let batch = SubmitResultsRequest {
        worker_id: "w1".to_owned(),
        results: vec![helpers::place_doc("A"), helpers::place_doc("B")],
        job_id: Some(job.id),
    };
    let inserted = jobs.submit_results(job.id, batch).await.unwrap();
    assert_eq!(inserted, 2);
    assert_eq!(jobs.get(job.id).await.unwrap().scraped_places, 2);

    // Re-submitting the same batch is a no-op for progress
    let batch = SubmitResultsRequest {
        worker_id: "w1".to_owned(),
        results: vec![helpers::place_doc("A"), helpers::place_doc("B")],
        job_id: None,
    };
    let inserted = jobs.submit_results(job.id, batch).await.unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(jobs.get(job.id).await.unwrap().scraped_places, 2);
}

#[sqlx::test(migrations = false)]
async fn submit_results_guards_job_id_mismatch(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    let batch = SubmitResultsRequest {
        worker_id: "w1".to_owned(),
        results: vec![helpers::place_doc("A")],
        job_id: Some(Uuid::new_v4()),
    };
    let err = jobs.submit_results(job.id, batch).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(db.results().count(Some(job.id)).await.unwrap(), 0);
}

#[sqlx::test(migrations = false)]
async fn submit_results_to_missing_job_is_not_found(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);

    let batch = SubmitResultsRequest {
        worker_id: "w1".to_owned(),
        results: vec![helpers::place_doc("A")],
        job_id: None,
    };
    let err = jobs.submit_results(Uuid::new_v4(), batch).await.unwrap_err();
    assert!(matches!(err, Error::NotFound("job")));
}

// ── Roll-up ─────────────────────────────────────────────────────────

#[sqlx::test(migrations = false)]
async fn job_completes_when_all_items_are_terminal(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["a", "b"]))
        .await
        .unwrap();
    db.jobs().claim_pending("w1").await.unwrap().unwrap();

    let items = db.queue().fetch_batch(10).await.unwrap();
    assert_eq!(items.len(), 2);

    // First item failing does not finish the job
    jobs.finish_item(items[0].id, job.id, false).await.unwrap();
    let current = jobs.get(job.id).await.unwrap();
    assert_eq!(current.status, JobStatus::Running);
    assert_eq!(current.failed_places, 1);

    // Second item succeeding completes it (failed items count as terminal)
    jobs.finish_item(items[1].id, job.id, true).await.unwrap();
    let done = jobs.get(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
}

#[sqlx::test(migrations = false)]
async fn job_fails_when_no_item_succeeded(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["a", "b"]))
        .await
        .unwrap();
    db.jobs().claim_pending("w1").await.unwrap().unwrap();

    let items = db.queue().fetch_batch(10).await.unwrap();
    for item in &items {
        jobs.finish_item(item.id, job.id, false).await.unwrap();
    }

    let failed = jobs.get(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.failed_places, 2);
}
