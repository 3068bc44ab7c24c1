//! Normalized listing repository (read path).

use futures::TryStreamExt;
use futures::stream::BoxStream;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::db::DbContext;
use crate::db::models::{Email, Listing, ListingFilter, ListingStats};
use crate::error::{Result, StorageContext};

/// Rows fetched per round-trip while streaming.
const STREAM_CHUNK: i64 = 500;

/// Explicit column list: `review_rating` is NUMERIC(3,1) in the schema and
/// is read back as a float.
const LISTING_COLUMNS: &str = "id, raw_result_id, job_id, place_id, cid, data_id, title, \
     category, categories, address, address_street, address_city, address_state, \
     address_postal_code, address_country, phone, website, latitude, longitude, \
     review_count, review_rating::float8 AS review_rating, status, price_range, \
     description, created_at, updated_at";

/// Listing operations.
pub struct ListingOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ListingOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    fn filtered(base: &str, filter: &ListingFilter) -> QueryBuilder<'static, sqlx::Postgres> {
        let mut qb = QueryBuilder::new(base.to_owned());
        qb.push(" WHERE TRUE");
        if let Some(job_id) = filter.job_id {
            qb.push(" AND job_id = ").push_bind(job_id);
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search);
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR address ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(category) = &filter.category {
            qb.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(city) = &filter.city {
            qb.push(" AND address_city = ").push_bind(city.clone());
        }
        if let Some(has_website) = filter.has_website {
            if has_website {
                qb.push(" AND website IS NOT NULL");
            } else {
                qb.push(" AND website IS NULL");
            }
        }
        qb
    }

    /// List listings matching the filter, stable pagination by id.
    pub async fn list(&self, filter: &ListingFilter) -> Result<Vec<Listing>> {
        let mut qb = Self::filtered(&format!("SELECT {LISTING_COLUMNS} FROM listings"), filter);
        qb.push(" ORDER BY id LIMIT ").push_bind(filter.limit);
        qb.push(" OFFSET ").push_bind(filter.offset);
        qb.build_query_as::<Listing>()
            .fetch_all(self.ctx.pool())
            .await
            .ctx("list listings")
    }

    pub async fn count(&self, filter: &ListingFilter) -> Result<i64> {
        Self::filtered("SELECT COUNT(*) FROM listings", filter)
            .build_query_scalar::<i64>()
            .fetch_one(self.ctx.pool())
            .await
            .ctx("count listings")
    }

    pub async fn list_by_job(&self, job_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Listing>> {
        sqlx::query_as::<_, Listing>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings
             WHERE job_id = $1 ORDER BY id LIMIT $2 OFFSET $3"
        ))
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await
        .ctx("list listings by job")
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Listing>> {
        sqlx::query_as::<_, Listing>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.ctx.pool())
        .await
        .ctx("get listing")
    }

    /// Distinct non-null categories, alphabetical.
    pub async fn categories(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT category FROM listings
             WHERE category IS NOT NULL ORDER BY category",
        )
        .fetch_all(self.ctx.pool())
        .await
        .ctx("listing categories")
    }

    /// Distinct non-null cities, alphabetical.
    pub async fn cities(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT address_city FROM listings
             WHERE address_city IS NOT NULL ORDER BY address_city",
        )
        .fetch_all(self.ctx.pool())
        .await
        .ctx("listing cities")
    }

    pub async fn stats(&self) -> Result<ListingStats> {
        sqlx::query_as::<_, ListingStats>(
            "SELECT
                 COUNT(*)::BIGINT AS total,
                 COUNT(*) FILTER (WHERE website IS NOT NULL)::BIGINT AS with_website,
                 COUNT(*) FILTER (WHERE phone IS NOT NULL)::BIGINT AS with_phone,
                 (SELECT COUNT(DISTINCT listing_id) FROM listing_emails)::BIGINT AS with_email,
                 AVG(review_rating)::float8 AS avg_rating
             FROM listings",
        )
        .fetch_one(self.ctx.pool())
        .await
        .ctx("listing stats")
    }

    /// Stream listings, optionally restricted to one job, ordered by id.
    ///
    /// Keyset pagination under the hood, so the stream owns its pool handle
    /// and can outlive the repository borrow (e.g. as a response body).
    pub fn stream(&self, job_id: Option<Uuid>) -> BoxStream<'static, Result<Listing>> {
        let pool = self.ctx.pool().clone();
        let stream = futures::stream::try_unfold((pool, 0i64), move |(pool, last_id)| async move {
            let rows: Vec<Listing> = sqlx::query_as(&format!(
                "SELECT {LISTING_COLUMNS} FROM listings
                 WHERE id > $1 AND ($2::uuid IS NULL OR job_id = $2)
                 ORDER BY id LIMIT $3"
            ))
            .bind(last_id)
            .bind(job_id)
            .bind(STREAM_CHUNK)
            .fetch_all(&pool)
            .await
            .ctx("stream listings")?;

            match rows.last() {
                None => Ok::<_, crate::error::Error>(None),
                Some(last) => {
                    let next = last.id;
                    Ok(Some((
                        futures::stream::iter(rows.into_iter().map(Ok)),
                        (pool, next),
                    )))
                }
            }
        });
        Box::pin(stream.try_flatten())
    }

    /// Emails linked to one listing, in discovery order.
    pub async fn emails_for(&self, listing_id: i64) -> Result<Vec<Email>> {
        sqlx::query_as::<_, Email>(
            "SELECT e.* FROM emails e
             JOIN listing_emails le ON le.email_id = e.id
             WHERE le.listing_id = $1
             ORDER BY le.position",
        )
        .bind(listing_id)
        .fetch_all(self.ctx.pool())
        .await
        .ctx("listing emails")
    }
}
