//! Database operations for `scan_heatmaps`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `scan_heatmaps` table. `payload` holds the full
/// serialized `HeatmapData`; the score columns are copies for querying.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanHeatmapRow {
    pub id: i64,
    pub scan_job_id: Uuid,
    pub keyword: String,
    pub visibility_score: f64,
    pub average_rank: f64,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inserts or replaces the heatmap of one keyword of a job.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn upsert_scan_heatmap(
    pool: &PgPool,
    scan_job_id: Uuid,
    keyword: &str,
    visibility_score: f64,
    average_rank: f64,
    payload: &serde_json::Value,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO scan_heatmaps \
             (scan_job_id, keyword, visibility_score, average_rank, payload) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (scan_job_id, keyword) DO UPDATE SET \
             visibility_score = EXCLUDED.visibility_score, \
             average_rank     = EXCLUDED.average_rank, \
             payload          = EXCLUDED.payload, \
             updated_at       = NOW()",
    )
    .bind(scan_job_id)
    .bind(keyword)
    .bind(visibility_score)
    .bind(average_rank)
    .bind(payload)
    .execute(pool)
    .await?;

    Ok(())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_scan_heatmaps(
    pool: &PgPool,
    scan_job_id: Uuid,
) -> Result<Vec<ScanHeatmapRow>, DbError> {
    let rows = sqlx::query_as::<_, ScanHeatmapRow>(
        "SELECT id, scan_job_id, keyword, visibility_score, average_rank, payload, \
                created_at, updated_at \
         FROM scan_heatmaps \
         WHERE scan_job_id = $1 \
         ORDER BY id",
    )
    .bind(scan_job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
