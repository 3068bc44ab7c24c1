//! One-shot schema migration run at startup.
//!
//! Introspects the database, classifies it into one of five shapes, and
//! applies additive DDL (`IF NOT EXISTS` throughout) to reach the current
//! layout. Each applied transition is recorded in `migration_history`.
//! Failures roll back and abort startup; re-running against a current
//! database performs no DDL at all.

use sqlx::PgPool;
use tracing::info;

use crate::error::{Result, StorageContext};

/// Shape of an existing database, as detected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// Nothing of ours exists yet.
    Fresh,
    /// Outer job table and legacy inner queue both exist, but the inner
    /// items do not reference their parent jobs yet.
    BothUnlinked,
    /// Only the legacy CLI work-item queue exists.
    OnlyInner,
    /// Only the outer job table exists.
    OnlyOuter,
    /// Everything is in place.
    Current,
}

impl SchemaState {
    /// Name recorded in `migration_history` for the transition out of
    /// this state. `Current` records nothing.
    fn transition_name(&self) -> Option<&'static str> {
        match self {
            Self::Fresh => Some("fresh_install"),
            Self::BothUnlinked => Some("link_work_items_to_jobs"),
            Self::OnlyInner => Some("add_outer_job_tables"),
            Self::OnlyOuter => Some("add_work_item_queue"),
            Self::Current => None,
        }
    }
}

/// Detect the schema shape and evolve it to the current layout.
///
/// Returns the state that was detected (useful for logging and tests).
pub async fn run(pool: &PgPool) -> Result<SchemaState> {
    let state = detect(pool).await?;

    let Some(name) = state.transition_name() else {
        info!("schema already current, no migration needed");
        return Ok(state);
    };

    info!(state = ?state, migration = name, "migrating schema");

    let mut tx = pool.begin().await.ctx("begin migration")?;

    // All DDL is additive and idempotent, so every non-current shape can
    // take the same bundle; the detected state only names the transition.
    for statement in DDL_STATEMENTS {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .ctx("apply migration ddl")?;
    }

    sqlx::query("INSERT INTO migration_history (name) VALUES ($1)")
        .bind(name)
        .execute(&mut *tx)
        .await
        .ctx("record migration")?;

    tx.commit().await.ctx("commit migration")?;

    info!(migration = name, "schema migration applied");
    Ok(state)
}

/// Classify the existing schema.
async fn detect(pool: &PgPool) -> Result<SchemaState> {
    let outer = table_exists(pool, "scrape_jobs").await?;
    let inner = table_exists(pool, "work_items").await?;

    let state = match (outer, inner) {
        (false, false) => SchemaState::Fresh,
        (true, false) => SchemaState::OnlyOuter,
        (false, true) => SchemaState::OnlyInner,
        (true, true) => {
            let linked = column_exists(pool, "work_items", "parent_id").await?;
            let complete = linked
                && table_exists(pool, "listings").await?
                && table_exists(pool, "emails").await?
                && table_exists(pool, "listing_emails").await?
                && table_exists(pool, "workers").await?
                && table_exists(pool, "raw_results").await?
                && table_exists(pool, "migration_history").await?;
            if complete {
                SchemaState::Current
            } else if linked {
                // Linked but missing ancillary tables; treat like a fresh
                // install of the remainder.
                SchemaState::Fresh
            } else {
                SchemaState::BothUnlinked
            }
        }
    };

    Ok(state)
}

async fn table_exists(pool: &PgPool, table: &str) -> Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name = $1
         )",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .ctx("introspect tables")
}

async fn column_exists(pool: &PgPool, table: &str, column: &str) -> Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM information_schema.columns
             WHERE table_schema = current_schema()
               AND table_name = $1 AND column_name = $2
         )",
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await
    .ctx("introspect columns")
}

/// The target layout, expressed as idempotent additive DDL.
///
/// `CREATE TYPE` has no `IF NOT EXISTS` form, so enum creation is wrapped in
/// a `duplicate_object` handler. The foreign key from `work_items` to
/// `scrape_jobs` is only guaranteed on fresh installs; when linking a legacy
/// queue the column and index are added without a constraint so that orphan
/// legacy rows cannot fail the migration.
const DDL_STATEMENTS: &[&str] = &[
    // Enum types
    "DO $$ BEGIN
         CREATE TYPE job_status AS ENUM
             ('pending', 'queued', 'running', 'paused', 'completed', 'failed', 'cancelled');
     EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    "DO $$ BEGIN
         CREATE TYPE work_item_status AS ENUM ('new', 'in_progress', 'completed', 'failed');
     EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    "DO $$ BEGIN
         CREATE TYPE payload_type AS ENUM ('search', 'place', 'email');
     EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    "DO $$ BEGIN
         CREATE TYPE worker_status AS ENUM ('idle', 'busy', 'offline');
     EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    "DO $$ BEGIN
         CREATE TYPE validation_status AS ENUM
             ('pending', 'local_valid', 'local_invalid', 'api_valid',
              'api_invalid', 'api_error', 'api_skipped');
     EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    "DO $$ BEGIN
         CREATE TYPE email_source AS ENUM ('website', 'google_maps');
     EXCEPTION WHEN duplicate_object THEN NULL; END $$",
    // Outer jobs
    "CREATE TABLE IF NOT EXISTS scrape_jobs (
         id UUID PRIMARY KEY,
         name TEXT NOT NULL,
         status job_status NOT NULL DEFAULT 'pending',
         priority INT NOT NULL DEFAULT 0,
         keywords TEXT[] NOT NULL,
         config JSONB NOT NULL DEFAULT '{}'::jsonb,
         total_places INT NOT NULL DEFAULT 0,
         scraped_places INT NOT NULL DEFAULT 0,
         failed_places INT NOT NULL DEFAULT 0,
         worker_id TEXT,
         created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
         updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
         started_at TIMESTAMPTZ,
         completed_at TIMESTAMPTZ,
         error_message TEXT
     )",
    // Columns a pre-orchestrator job table may be missing
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS config JSONB NOT NULL DEFAULT '{}'::jsonb",
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS total_places INT NOT NULL DEFAULT 0",
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS scraped_places INT NOT NULL DEFAULT 0",
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS failed_places INT NOT NULL DEFAULT 0",
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS worker_id TEXT",
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()",
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS started_at TIMESTAMPTZ",
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS completed_at TIMESTAMPTZ",
    "ALTER TABLE scrape_jobs ADD COLUMN IF NOT EXISTS error_message TEXT",
    "CREATE INDEX IF NOT EXISTS idx_scrape_jobs_claim
         ON scrape_jobs (priority DESC, created_at ASC) WHERE status IN ('pending', 'queued')",
    "CREATE INDEX IF NOT EXISTS idx_scrape_jobs_status ON scrape_jobs (status)",
    // Inner work items
    "CREATE TABLE IF NOT EXISTS work_items (
         id BIGSERIAL PRIMARY KEY,
         priority INT NOT NULL DEFAULT 0,
         payload_type payload_type NOT NULL,
         payload BYTEA NOT NULL,
         status work_item_status NOT NULL DEFAULT 'new',
         parent_id UUID REFERENCES scrape_jobs(id) ON DELETE CASCADE,
         created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
     )",
    "ALTER TABLE work_items ADD COLUMN IF NOT EXISTS parent_id UUID",
    "CREATE INDEX IF NOT EXISTS idx_work_items_claim
         ON work_items (priority DESC, created_at ASC) WHERE status = 'new'",
    "CREATE INDEX IF NOT EXISTS idx_work_items_parent ON work_items (parent_id)",
    // Workers
    "CREATE TABLE IF NOT EXISTS workers (
         id TEXT PRIMARY KEY,
         hostname TEXT NOT NULL DEFAULT '',
         status worker_status NOT NULL DEFAULT 'idle',
         current_job_id UUID,
         jobs_completed BIGINT NOT NULL DEFAULT 0,
         places_scraped BIGINT NOT NULL DEFAULT 0,
         last_heartbeat TIMESTAMPTZ NOT NULL DEFAULT NOW()
     )",
    // Raw results
    "CREATE TABLE IF NOT EXISTS raw_results (
         id BIGSERIAL PRIMARY KEY,
         job_id UUID NOT NULL REFERENCES scrape_jobs(id) ON DELETE CASCADE,
         payload JSONB NOT NULL,
         created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
     )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_raw_results_dedup
         ON raw_results (job_id, md5(payload::text))",
    "CREATE INDEX IF NOT EXISTS idx_raw_results_job ON raw_results (job_id, id)",
    // Normalized listings
    "CREATE TABLE IF NOT EXISTS listings (
         id BIGSERIAL PRIMARY KEY,
         raw_result_id BIGINT NOT NULL UNIQUE REFERENCES raw_results(id) ON DELETE CASCADE,
         job_id UUID NOT NULL,
         place_id TEXT,
         cid TEXT,
         data_id TEXT,
         title TEXT NOT NULL,
         category TEXT,
         categories TEXT[] NOT NULL DEFAULT '{}',
         address TEXT,
         address_street TEXT,
         address_city TEXT,
         address_state TEXT,
         address_postal_code TEXT,
         address_country TEXT,
         phone TEXT,
         website TEXT,
         latitude DOUBLE PRECISION,
         longitude DOUBLE PRECISION,
         review_count INT NOT NULL DEFAULT 0,
         review_rating NUMERIC(3,1),
         status TEXT,
         price_range TEXT,
         description TEXT,
         created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
         updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
     )",
    "CREATE INDEX IF NOT EXISTS idx_listings_job ON listings (job_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_listings_city ON listings (address_city)",
    "CREATE INDEX IF NOT EXISTS idx_listings_category ON listings (category)",
    // Emails; domain, local_part and is_acceptable are engine-computed
    "CREATE TABLE IF NOT EXISTS emails (
         id BIGSERIAL PRIMARY KEY,
         address TEXT NOT NULL UNIQUE,
         domain TEXT GENERATED ALWAYS AS (split_part(address, '@', 2)) STORED,
         local_part TEXT GENERATED ALWAYS AS (split_part(address, '@', 1)) STORED,
         validation_status validation_status NOT NULL DEFAULT 'pending',
         local_validation_passed BOOLEAN,
         local_validation_reason TEXT,
         api_score INT,
         api_deliverable BOOLEAN,
         api_disposable BOOLEAN,
         api_role_account BOOLEAN,
         api_free_email BOOLEAN,
         api_catch_all BOOLEAN,
         api_reason TEXT,
         api_validated_at TIMESTAMPTZ,
         is_acceptable BOOLEAN GENERATED ALWAYS AS (
             CASE validation_status
                 WHEN 'api_valid' THEN TRUE
                 WHEN 'api_invalid' THEN FALSE
                 WHEN 'api_error' THEN local_validation_passed
                 WHEN 'api_skipped' THEN local_validation_passed
                 WHEN 'local_valid' THEN TRUE
                 WHEN 'local_invalid' THEN FALSE
                 ELSE NULL
             END
         ) STORED,
         first_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
         last_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
         occurrence_count INT NOT NULL DEFAULT 1
     )",
    // Listing/email junction
    "CREATE TABLE IF NOT EXISTS listing_emails (
         id BIGSERIAL PRIMARY KEY,
         listing_id BIGINT NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
         email_id BIGINT NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
         source email_source NOT NULL DEFAULT 'website',
         position INT NOT NULL DEFAULT 0,
         discovered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
         UNIQUE (listing_id, email_id)
     )",
    // Append-only migration record
    "CREATE TABLE IF NOT EXISTS migration_history (
         id SERIAL PRIMARY KEY,
         name TEXT NOT NULL,
         executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
     )",
];
