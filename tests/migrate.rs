#[allow(dead_code)]
mod helpers;

use mapharvest::db::migrate::{self, SchemaState};
use sqlx::PgPool;

async fn history(pool: &PgPool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM migration_history ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = false)]
async fn fresh_database_installs_everything(pool: PgPool) {
    let state = migrate::run(&pool).await.unwrap();
    assert_eq!(state, SchemaState::Fresh);

    for table in [
        "scrape_jobs",
        "work_items",
        "workers",
        "raw_results",
        "listings",
        "emails",
        "listing_emails",
        "migration_history",
    ] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "{table} should exist after migration");
    }

    assert_eq!(history(&pool).await, vec!["fresh_install".to_owned()]);
}

#[sqlx::test(migrations = false)]
async fn rerun_against_current_schema_is_a_noop(pool: PgPool) {
    migrate::run(&pool).await.unwrap();
    let before = history(&pool).await;

    let state = migrate::run(&pool).await.unwrap();
    assert_eq!(state, SchemaState::Current);
    assert_eq!(history(&pool).await, before, "no new history rows");
}

#[sqlx::test(migrations = false)]
async fn legacy_inner_queue_gains_outer_tables(pool: PgPool) {
    // A CLI-era database: only the work item queue, no parent column
    sqlx::query(
        "DO $$ BEGIN
             CREATE TYPE payload_type AS ENUM ('search', 'place', 'email');
         EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "DO $$ BEGIN
             CREATE TYPE work_item_status AS ENUM ('new', 'in_progress', 'completed', 'failed');
         EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TABLE work_items (
             id BIGSERIAL PRIMARY KEY,
             priority INT NOT NULL DEFAULT 0,
             payload_type payload_type NOT NULL,
             payload BYTEA NOT NULL,
             status work_item_status NOT NULL DEFAULT 'new',
             created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
         )",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO work_items (payload_type, payload) VALUES ('search', '\\x00'::bytea)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let state = migrate::run(&pool).await.unwrap();
    assert_eq!(state, SchemaState::OnlyInner);

    // Legacy row survives with a null parent
    let (parent,): (Option<uuid::Uuid>,) =
        sqlx::query_as("SELECT parent_id FROM work_items LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(parent.is_none());

    assert_eq!(history(&pool).await, vec!["add_outer_job_tables".to_owned()]);

    // And the next run settles to current
    assert_eq!(migrate::run(&pool).await.unwrap(), SchemaState::Current);
}

#[sqlx::test(migrations = false)]
async fn unlinked_tables_get_linked(pool: PgPool) {
    // Both tables exist but items do not reference jobs
    sqlx::query(
        "DO $$ BEGIN
             CREATE TYPE job_status AS ENUM
                 ('pending', 'queued', 'running', 'paused', 'completed', 'failed', 'cancelled');
         EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TABLE scrape_jobs (
             id UUID PRIMARY KEY,
             name TEXT NOT NULL,
             status job_status NOT NULL DEFAULT 'pending',
             priority INT NOT NULL DEFAULT 0,
             keywords TEXT[] NOT NULL,
             created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
         )",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "DO $$ BEGIN
             CREATE TYPE payload_type AS ENUM ('search', 'place', 'email');
         EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "DO $$ BEGIN
             CREATE TYPE work_item_status AS ENUM ('new', 'in_progress', 'completed', 'failed');
         EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TABLE work_items (
             id BIGSERIAL PRIMARY KEY,
             priority INT NOT NULL DEFAULT 0,
             payload_type payload_type NOT NULL,
             payload BYTEA NOT NULL,
             status work_item_status NOT NULL DEFAULT 'new',
             created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
         )",
    )
    .execute(&pool)
    .await
    .unwrap();

    let state = migrate::run(&pool).await.unwrap();
    assert_eq!(state, SchemaState::BothUnlinked);

    let linked: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.columns
         WHERE table_name = 'work_items' AND column_name = 'parent_id')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(linked);

    assert_eq!(
        history(&pool).await,
        vec!["link_work_items_to_jobs".to_owned()]
    );
}

#[sqlx::test(migrations = false)]
async fn generated_email_columns_are_engine_computed(pool: PgPool) {
    migrate::run(&pool).await.unwrap();

    // Writing a generated column must be rejected by the engine
    let err = sqlx::query("INSERT INTO emails (address, domain) VALUES ('a@x.com', 'forged')")
        .execute(&pool)
        .await;
    assert!(err.is_err(), "generated columns must not be writable");

    sqlx::query("INSERT INTO emails (address) VALUES ('a@x.com')")
        .execute(&pool)
        .await
        .unwrap();
    let (domain, local_part): (String, String) =
        sqlx::query_as("SELECT domain, local_part FROM emails WHERE address = 'a@x.com'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(domain, "x.com");
    assert_eq!(local_part, "a");
}
