#[allow(dead_code)]
mod helpers;

use mapharvest::db::models::ValidationStatus;
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = false)]
async fn ingest_projects_listing_fields(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    let inserted = db
        .results()
        .create_batch(job.id, &[helpers::place_doc("Kopi Tuku")])
        .await
        .unwrap();
    assert_eq!(inserted.len(), 1);

    let listings = db.listings().list_by_job(job.id, 10, 0).await.unwrap();
    assert_eq!(listings.len(), 1);
    let listing = &listings[0];
    assert_eq!(listing.title, "Kopi Tuku");
    assert_eq!(listing.address_city.as_deref(), Some("Jakarta"));
    assert_eq!(listing.website.as_deref(), Some("https://example.com"));
    // latitude arrives as a number, longitude as a string; both parse
    assert!((listing.latitude.unwrap() - -6.21462).abs() < 1e-9);
    assert!((listing.longitude.unwrap() - 106.84513).abs() < 1e-9);
    assert_eq!(listing.review_count, 42);
    assert_eq!(listing.review_rating, Some(4.5));
    assert_eq!(listing.categories, vec!["Coffee shop", "Cafe"]);
}

#[sqlx::test(migrations = false)]
async fn missing_title_defaults_to_unknown(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    db.results()
        .create_batch(job.id, &[json!({"place_id": "x"})])
        .await
        .unwrap();

    let listings = db.listings().list_by_job(job.id, 10, 0).await.unwrap();
    assert_eq!(listings[0].title, "Unknown");
}

#[sqlx::test(migrations = false)]
async fn validated_email_is_canonicalized_and_acceptable(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    // Same address twice with different casing plus one API validation
    let doc = json!({
        "title": "X",
        "emails": ["A@X.com", "a@x.com"],
        "email_validations": [{
            "email": "A@X.com",
            "status": "valid",
            "score": 85,
            "deliverable": true,
            "disposable": false,
            "role_account": false,
            "validated_at": "2026-07-01T00:00:00Z"
        }]
    });
    db.results().create_batch(job.id, &[doc]).await.unwrap();

    let listings = db.listings().list_by_job(job.id, 10, 0).await.unwrap();
    let emails = db.listings().emails_for(listings[0].id).await.unwrap();

    // One email row, one junction row, canonical lowercase address
    assert_eq!(emails.len(), 1);
    let email = &emails[0];
    assert_eq!(email.address, "a@x.com");
    assert_eq!(email.domain, "x.com");
    assert_eq!(email.local_part, "a");
    assert_eq!(email.validation_status, ValidationStatus::ApiValid);
    assert_eq!(email.is_acceptable, Some(true));
    assert_eq!(email.api_score, Some(85));
}

#[sqlx::test(migrations = false)]
async fn unvalidated_email_is_locally_valid(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    let doc = json!({"title": "X", "emails": ["  Info@Shop.example  ", ""]});
    db.results().create_batch(job.id, &[doc]).await.unwrap();

    let listings = db.listings().list_by_job(job.id, 10, 0).await.unwrap();
    let emails = db.listings().emails_for(listings[0].id).await.unwrap();
    assert_eq!(emails.len(), 1, "empty entries are skipped");
    assert_eq!(emails[0].address, "info@shop.example");
    assert_eq!(emails[0].validation_status, ValidationStatus::LocalValid);
    assert_eq!(emails[0].is_acceptable, Some(true));
    assert_eq!(emails[0].local_validation_passed, Some(true));
}

#[sqlx::test(migrations = false)]
async fn shared_email_deduplicates_across_listings(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    let doc_a = json!({"title": "A", "emails": ["shared@x.com"]});
    let doc_b = json!({"title": "B", "emails": ["SHARED@x.com"]});
    db.results()
        .create_batch(job.id, &[doc_a, doc_b])
        .await
        .unwrap();

    let (email_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM emails")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(email_count, 1);

    let (occurrences,): (i32,) =
        sqlx::query_as("SELECT occurrence_count FROM emails WHERE address = 'shared@x.com'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(occurrences, 2);

    let (links,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM listing_emails")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(links, 2, "one junction row per listing");
}

#[sqlx::test(migrations = false)]
async fn api_error_degrades_without_failing_ingest(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    let doc = json!({
        "title": "X",
        "emails": ["oops@x.com"],
        "email_validations": [{"email": "oops@x.com", "status": "api_error"}]
    });
    let inserted = db.results().create_batch(job.id, &[doc]).await.unwrap();
    assert_eq!(inserted.len(), 1, "ingest succeeds despite upstream error");

    let (status, acceptable): (ValidationStatus, Option<bool>) = sqlx::query_as(
        "SELECT validation_status, is_acceptable FROM emails WHERE address = 'oops@x.com'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, ValidationStatus::ApiError);
    // No local validation either: acceptability is unknown
    assert_eq!(acceptable, None);
}

#[sqlx::test(migrations = false)]
async fn duplicate_batches_are_idempotent(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    let doc = helpers::place_doc("Kopi Tuku");
    let first = db
        .results()
        .create_batch(job.id, &[doc.clone()])
        .await
        .unwrap();
    let second = db.results().create_batch(job.id, &[doc]).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 0, "duplicate payloads are skipped");
    assert_eq!(db.results().count(Some(job.id)).await.unwrap(), 1);

    let (listing_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM listings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(listing_count, 1);
}

#[sqlx::test(migrations = false)]
async fn raw_results_paginate_stably_by_id(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    let docs: Vec<_> = (0..5).map(|i| helpers::place_doc(&format!("P{i}"))).collect();
    db.results().create_batch(job.id, &docs).await.unwrap();

    let first = db.results().list_by_job(job.id, 3, 0).await.unwrap();
    let second = db.results().list_by_job(job.id, 3, 3).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 2);
    // Append-only ids, monotone across pages
    assert!(first.last().unwrap().id < second[0].id);

    assert_eq!(db.results().list_all(10, 0).await.unwrap().len(), 5);
}

#[sqlx::test(migrations = false)]
async fn reader_never_sees_raw_result_without_listing(pool: PgPool) {
    let db = helpers::setup(&pool).await;
    let (jobs, _) = helpers::services(&db);
    let job = jobs
        .create(helpers::job_request("coffee", &["kw"]))
        .await
        .unwrap();

    db.results()
        .create_batch(job.id, &[helpers::place_doc("A"), helpers::place_doc("B")])
        .await
        .unwrap();

    // Every committed raw result has its 1-to-1 listing
    let (orphans,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM raw_results r
         LEFT JOIN listings l ON l.raw_result_id = r.id
         WHERE l.id IS NULL",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(orphans, 0);
}
