//! Database operations for `scan_points`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `scan_points` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanPointRow {
    pub id: i64,
    pub scan_job_id: Uuid,
    pub keyword: String,
    pub position: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub rank: Option<i32>,
    pub matched_url: Option<String>,
    pub match_tier: Option<String>,
    /// Serialized `Vec<Competitor>`.
    pub competitors: serde_json::Value,
    pub scanned_at: DateTime<Utc>,
}

/// One scanned grid point for [`upsert_scan_points`].
#[derive(Debug, Clone)]
pub struct NewScanPoint {
    pub position: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub rank: Option<i32>,
    pub matched_url: Option<String>,
    pub match_tier: Option<String>,
    pub competitors: serde_json::Value,
}

/// Upserts a batch of points for one keyword of a job in a single round
/// trip. Re-scanning a position overwrites its previous result.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn upsert_scan_points(
    pool: &PgPool,
    scan_job_id: Uuid,
    keyword: &str,
    points: &[NewScanPoint],
) -> Result<u64, DbError> {
    if points.is_empty() {
        return Ok(0);
    }

    let mut positions: Vec<i32> = Vec::with_capacity(points.len());
    let mut latitudes: Vec<f64> = Vec::with_capacity(points.len());
    let mut longitudes: Vec<f64> = Vec::with_capacity(points.len());
    let mut distances: Vec<f64> = Vec::with_capacity(points.len());
    let mut ranks: Vec<Option<i32>> = Vec::with_capacity(points.len());
    let mut matched_urls: Vec<Option<String>> = Vec::with_capacity(points.len());
    let mut match_tiers: Vec<Option<String>> = Vec::with_capacity(points.len());
    let mut competitors: Vec<serde_json::Value> = Vec::with_capacity(points.len());

    for point in points {
        positions.push(point.position);
        latitudes.push(point.latitude);
        longitudes.push(point.longitude);
        distances.push(point.distance_km);
        ranks.push(point.rank);
        matched_urls.push(point.matched_url.clone());
        match_tiers.push(point.match_tier.clone());
        competitors.push(point.competitors.clone());
    }

    let result = sqlx::query(
        "INSERT INTO scan_points \
             (scan_job_id, keyword, position, latitude, longitude, distance_km, \
              rank, matched_url, match_tier, competitors) \
         SELECT $1, $2, * FROM UNNEST(\
              $3::int4[], $4::float8[], $5::float8[], $6::float8[], \
              $7::int4[], $8::text[], $9::text[], $10::jsonb[]) \
         ON CONFLICT (scan_job_id, keyword, position) DO UPDATE SET \
             latitude     = EXCLUDED.latitude, \
             longitude    = EXCLUDED.longitude, \
             distance_km  = EXCLUDED.distance_km, \
             rank         = EXCLUDED.rank, \
             matched_url  = EXCLUDED.matched_url, \
             match_tier   = EXCLUDED.match_tier, \
             competitors  = EXCLUDED.competitors, \
             scanned_at   = NOW()",
    )
    .bind(scan_job_id)
    .bind(keyword)
    .bind(&positions)
    .bind(&latitudes)
    .bind(&longitudes)
    .bind(&distances)
    .bind(&ranks)
    .bind(&matched_urls)
    .bind(&match_tiers)
    .bind(&competitors)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// All stored points of a job, ordered by keyword then position.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_scan_points(
    pool: &PgPool,
    scan_job_id: Uuid,
) -> Result<Vec<ScanPointRow>, DbError> {
    let rows = sqlx::query_as::<_, ScanPointRow>(
        "SELECT id, scan_job_id, keyword, position, latitude, longitude, distance_km, \
                rank, matched_url, match_tier, competitors, scanned_at \
         FROM scan_points \
         WHERE scan_job_id = $1 \
         ORDER BY keyword, position",
    )
    .bind(scan_job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
