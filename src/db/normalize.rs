//! Normalization of raw scraped documents into relational rows.
//!
//! Runs inside the same transaction as the raw result insert, so a reader
//! can never observe a raw result without its derived listing. External
//! validation results embedded in the document degrade to `api_error`
//! rather than failing ingest.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::models::ValidationStatus;
use crate::error::{Result, StorageContext};

/// Project one raw document into listing, email and junction rows.
pub(crate) async fn project(
    conn: &mut PgConnection,
    job_id: Uuid,
    raw_result_id: i64,
    doc: &Value,
) -> Result<()> {
    let listing_id = upsert_listing(conn, job_id, raw_result_id, doc).await?;
    link_emails(conn, listing_id, doc).await?;
    Ok(())
}

// ── Listing projection ──────────────────────────────────────────────

async fn upsert_listing(
    conn: &mut PgConnection,
    job_id: Uuid,
    raw_result_id: i64,
    doc: &Value,
) -> Result<i64> {
    let title = str_field(doc, "title").unwrap_or_else(|| "Unknown".to_owned());
    let categories: Vec<String> = doc
        .get("categories")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let address = doc.get("complete_address");

    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO listings (
             raw_result_id, job_id, place_id, cid, data_id, title,
             category, categories, address,
             address_street, address_city, address_state,
             address_postal_code, address_country,
             phone, website, latitude, longitude,
             review_count, review_rating, status, price_range, description
         ) VALUES (
             $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
             $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
         )
         ON CONFLICT (raw_result_id) DO UPDATE SET
             title = EXCLUDED.title,
             updated_at = NOW()
         RETURNING id",
    )
    .bind(raw_result_id)
    .bind(job_id)
    .bind(str_field(doc, "place_id"))
    .bind(str_field(doc, "cid"))
    .bind(str_field(doc, "data_id"))
    .bind(title)
    .bind(str_field(doc, "category"))
    .bind(&categories)
    .bind(str_field(doc, "address"))
    .bind(address.and_then(|a| str_field(a, "street")))
    .bind(address.and_then(|a| str_field(a, "city")))
    .bind(address.and_then(|a| str_field(a, "state")))
    .bind(address.and_then(|a| str_field(a, "postal_code")))
    .bind(address.and_then(|a| str_field(a, "country")))
    .bind(str_field(doc, "phone"))
    .bind(str_field(doc, "web_site"))
    .bind(f64_field(doc, "latitude"))
    .bind(f64_field(doc, "longitude"))
    .bind(i64_field(doc, "review_count").unwrap_or(0) as i32)
    .bind(f64_field(doc, "review_rating"))
    .bind(str_field(doc, "status"))
    .bind(str_field(doc, "price_range"))
    .bind(str_field(doc, "description"))
    .fetch_one(conn)
    .await
    .ctx("upsert listing")?;

    Ok(id)
}

// ── Email projection ────────────────────────────────────────────────

/// One entry of the document's `email_validations[]` array.
#[derive(Debug, Clone, serde::Deserialize)]
struct ValidationRecord {
    email: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    score: i32,
    #[serde(default)]
    deliverable: bool,
    #[serde(default)]
    disposable: bool,
    #[serde(default)]
    role_account: bool,
    #[serde(default)]
    free_email: bool,
    #[serde(default)]
    catch_all: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    validated_at: Option<DateTime<Utc>>,
}

impl ValidationRecord {
    /// Classify the upstream verdict.
    fn validation_status(&self) -> ValidationStatus {
        if self.status == "api_error" {
            ValidationStatus::ApiError
        } else if self.status == "valid"
            && self.deliverable
            && !self.disposable
            && !self.role_account
            && self.score >= 70
        {
            ValidationStatus::ApiValid
        } else {
            ValidationStatus::ApiInvalid
        }
    }
}

async fn link_emails(conn: &mut PgConnection, listing_id: i64, doc: &Value) -> Result<()> {
    let Some(emails) = doc.get("emails").and_then(Value::as_array) else {
        return Ok(());
    };

    // Validation results are keyed by canonical address.
    let validations: std::collections::HashMap<String, ValidationRecord> = doc
        .get("email_validations")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value::<ValidationRecord>(v.clone()).ok())
                .map(|r| (r.email.trim().to_lowercase(), r))
                .collect()
        })
        .unwrap_or_default();

    let mut position = 0i32;
    for raw in emails.iter().filter_map(Value::as_str) {
        let address = raw.trim().to_lowercase();
        if address.is_empty() {
            continue;
        }

        let email_id = match validations.get(&address) {
            Some(validation) => upsert_validated_email(conn, &address, validation).await?,
            None => upsert_local_email(conn, &address).await?,
        };

        sqlx::query(
            "INSERT INTO listing_emails (listing_id, email_id, source, position)
             VALUES ($1, $2, 'website', $3)
             ON CONFLICT (listing_id, email_id) DO NOTHING",
        )
        .bind(listing_id)
        .bind(email_id)
        .bind(position)
        .execute(&mut *conn)
        .await
        .ctx("link listing email")?;

        position += 1;
    }

    Ok(())
}

/// Upsert an email carrying API validation results.
///
/// On conflict the occurrence counter and last-seen always advance; the API
/// fields are refreshed only when the incoming record carries a non-null
/// validated-at, so a stale submission cannot clobber a newer verdict.
async fn upsert_validated_email(
    conn: &mut PgConnection,
    address: &str,
    validation: &ValidationRecord,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO emails (
             address, validation_status, api_score, api_deliverable, api_disposable,
             api_role_account, api_free_email, api_catch_all, api_reason, api_validated_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (address) DO UPDATE SET
             occurrence_count = emails.occurrence_count + 1,
             last_seen = NOW(),
             validation_status = CASE WHEN EXCLUDED.api_validated_at IS NOT NULL
                 THEN EXCLUDED.validation_status ELSE emails.validation_status END,
             api_score = CASE WHEN EXCLUDED.api_validated_at IS NOT NULL
                 THEN EXCLUDED.api_score ELSE emails.api_score END,
             api_deliverable = CASE WHEN EXCLUDED.api_validated_at IS NOT NULL
                 THEN EXCLUDED.api_deliverable ELSE emails.api_deliverable END,
             api_disposable = CASE WHEN EXCLUDED.api_validated_at IS NOT NULL
                 THEN EXCLUDED.api_disposable ELSE emails.api_disposable END,
             api_role_account = CASE WHEN EXCLUDED.api_validated_at IS NOT NULL
                 THEN EXCLUDED.api_role_account ELSE emails.api_role_account END,
             api_free_email = CASE WHEN EXCLUDED.api_validated_at IS NOT NULL
                 THEN EXCLUDED.api_free_email ELSE emails.api_free_email END,
             api_catch_all = CASE WHEN EXCLUDED.api_validated_at IS NOT NULL
                 THEN EXCLUDED.api_catch_all ELSE emails.api_catch_all END,
             api_reason = CASE WHEN EXCLUDED.api_validated_at IS NOT NULL
                 THEN EXCLUDED.api_reason ELSE emails.api_reason END,
             api_validated_at = COALESCE(EXCLUDED.api_validated_at, emails.api_validated_at)
         RETURNING id",
    )
    .bind(address)
    .bind(validation.validation_status())
    .bind(validation.score)
    .bind(validation.deliverable)
    .bind(validation.disposable)
    .bind(validation.role_account)
    .bind(validation.free_email)
    .bind(validation.catch_all)
    .bind(&validation.reason)
    .bind(validation.validated_at)
    .fetch_one(conn)
    .await
    .ctx("upsert validated email")?;

    Ok(id)
}

/// Upsert an email with no API validation attached: locally valid by default.
async fn upsert_local_email(conn: &mut PgConnection, address: &str) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO emails (address, validation_status, local_validation_passed)
         VALUES ($1, 'local_valid', TRUE)
         ON CONFLICT (address) DO UPDATE SET
             occurrence_count = emails.occurrence_count + 1,
             last_seen = NOW()
         RETURNING id",
    )
    .bind(address)
    .fetch_one(conn)
    .await
    .ctx("upsert local email")?;

    Ok(id)
}

// ── Field extraction helpers ────────────────────────────────────────

fn str_field(doc: &Value, key: &str) -> Option<String> {
    doc.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Floats arrive either as JSON numbers or as numeric strings.
fn f64_field(doc: &Value, key: &str) -> Option<f64> {
    match doc.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn i64_field(doc: &Value, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn f64_field_accepts_numbers_and_strings() {
        let doc = json!({"a": -6.21462, "b": "106.84513", "c": "x", "d": null});
        assert_eq!(f64_field(&doc, "a"), Some(-6.21462));
        assert_eq!(f64_field(&doc, "b"), Some(106.84513));
        assert_eq!(f64_field(&doc, "c"), None);
        assert_eq!(f64_field(&doc, "d"), None);
    }

    #[test]
    fn str_field_trims_and_drops_empty() {
        let doc = json!({"a": "  hi  ", "b": "   ", "c": 3});
        assert_eq!(str_field(&doc, "a").as_deref(), Some("hi"));
        assert_eq!(str_field(&doc, "b"), None);
        assert_eq!(str_field(&doc, "c"), None);
    }

    fn validation(status: &str, score: i32, deliverable: bool) -> ValidationRecord {
        ValidationRecord {
            email: "a@x.com".to_owned(),
            status: status.to_owned(),
            score,
            deliverable,
            disposable: false,
            role_account: false,
            free_email: false,
            catch_all: false,
            reason: None,
            validated_at: None,
        }
    }

    #[test]
    fn api_valid_requires_all_conditions() {
        assert_eq!(
            validation("valid", 85, true).validation_status(),
            ValidationStatus::ApiValid
        );
        // Below the score floor
        assert_eq!(
            validation("valid", 69, true).validation_status(),
            ValidationStatus::ApiInvalid
        );
        // Not deliverable
        assert_eq!(
            validation("valid", 85, false).validation_status(),
            ValidationStatus::ApiInvalid
        );
        // Upstream error degrades, never fails ingest
        assert_eq!(
            validation("api_error", 0, false).validation_status(),
            ValidationStatus::ApiError
        );
    }

    #[test]
    fn disposable_and_role_accounts_rejected() {
        let mut v = validation("valid", 90, true);
        v.disposable = true;
        assert_eq!(v.validation_status(), ValidationStatus::ApiInvalid);

        let mut v = validation("valid", 90, true);
        v.role_account = true;
        assert_eq!(v.validation_status(), ValidationStatus::ApiInvalid);
    }
}
