//! Database operations for `scan_jobs`.
//!
//! Every status change is guarded in SQL on the statuses it may leave, so a
//! terminal job can never be moved again. A guard miss surfaces as
//! [`DbError::InvalidScanTransition`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

const SCAN_JOB_COLUMNS: &str = "id, account_id, business, grid_size, radius_km, keywords, \
     status, progress, estimated_cost, error_message, created_at, started_at, completed_at, \
     updated_at";

/// A row from the `scan_jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanJobRow {
    pub id: Uuid,
    pub account_id: String,
    /// Serialized `BusinessIdentity` snapshot.
    pub business: serde_json::Value,
    pub grid_size: i16,
    pub radius_km: f64,
    pub keywords: Vec<String>,
    pub status: String,
    /// Serialized `ScanProgress`.
    pub progress: serde_json::Value,
    pub estimated_cost: Decimal,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`insert_scan_job`]. Jobs are always inserted as `pending`.
#[derive(Debug, Clone)]
pub struct NewScanJob<'a> {
    pub id: Uuid,
    pub account_id: &'a str,
    pub business: serde_json::Value,
    pub grid_size: i16,
    pub radius_km: f64,
    pub keywords: &'a [String],
    pub progress: serde_json::Value,
    pub estimated_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Inserts a new job in `pending` status and returns the stored row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails, including a duplicate id.
pub async fn insert_scan_job(pool: &PgPool, job: &NewScanJob<'_>) -> Result<ScanJobRow, DbError> {
    let row = sqlx::query_as::<_, ScanJobRow>(&format!(
        "INSERT INTO scan_jobs \
             (id, account_id, business, grid_size, radius_km, keywords, status, progress, \
              estimated_cost, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9) \
         RETURNING {SCAN_JOB_COLUMNS}"
    ))
    .bind(job.id)
    .bind(job.account_id)
    .bind(&job.business)
    .bind(job.grid_size)
    .bind(job.radius_km)
    .bind(job.keywords)
    .bind(&job.progress)
    .bind(job.estimated_cost)
    .bind(job.created_at)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Moves a job into (or keeps it in) `scanning` and records its progress.
///
/// `started_at` is only written the first time.
///
/// # Errors
///
/// Returns [`DbError::InvalidScanTransition`] unless the job is `pending` or
/// `scanning`, or [`DbError::Sqlx`] if the update fails.
pub async fn mark_scan_job_scanning(
    pool: &PgPool,
    id: Uuid,
    started_at: DateTime<Utc>,
    progress: &serde_json::Value,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scan_jobs \
         SET status = 'scanning', started_at = COALESCE(started_at, $2), progress = $3, \
             updated_at = NOW() \
         WHERE id = $1 AND status IN ('pending', 'scanning')",
    )
    .bind(id)
    .bind(started_at)
    .bind(progress)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidScanTransition {
            id,
            expected_status: "pending or scanning",
        });
    }

    Ok(())
}

/// Marks a running job `complete`.
///
/// # Errors
///
/// Returns [`DbError::InvalidScanTransition`] unless the job is `scanning`,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn complete_scan_job(
    pool: &PgPool,
    id: Uuid,
    completed_at: DateTime<Utc>,
    progress: &serde_json::Value,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scan_jobs \
         SET status = 'complete', completed_at = $2, progress = $3, updated_at = NOW() \
         WHERE id = $1 AND status = 'scanning'",
    )
    .bind(id)
    .bind(completed_at)
    .bind(progress)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidScanTransition {
            id,
            expected_status: "scanning",
        });
    }

    Ok(())
}

/// Marks a queued or running job `failed` with a reason.
///
/// # Errors
///
/// Returns [`DbError::InvalidScanTransition`] if the job already finished,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn fail_scan_job(
    pool: &PgPool,
    id: Uuid,
    error_message: &str,
    completed_at: DateTime<Utc>,
    progress: &serde_json::Value,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scan_jobs \
         SET status = 'failed', error_message = $2, completed_at = $3, progress = $4, \
             updated_at = NOW() \
         WHERE id = $1 AND status IN ('pending', 'scanning')",
    )
    .bind(id)
    .bind(error_message)
    .bind(completed_at)
    .bind(progress)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidScanTransition {
            id,
            expected_status: "pending or scanning",
        });
    }

    Ok(())
}

/// Marks a queued or running job `cancelled`.
///
/// # Errors
///
/// Returns [`DbError::InvalidScanTransition`] if the job already finished,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn cancel_scan_job(
    pool: &PgPool,
    id: Uuid,
    completed_at: DateTime<Utc>,
    progress: &serde_json::Value,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scan_jobs \
         SET status = 'cancelled', completed_at = $2, progress = $3, updated_at = NOW() \
         WHERE id = $1 AND status IN ('pending', 'scanning')",
    )
    .bind(id)
    .bind(completed_at)
    .bind(progress)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidScanTransition {
            id,
            expected_status: "pending or scanning",
        });
    }

    Ok(())
}

/// # Errors
///
/// Returns [`DbError::NotFound`] if no job has the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_scan_job(pool: &PgPool, id: Uuid) -> Result<ScanJobRow, DbError> {
    let row = sqlx::query_as::<_, ScanJobRow>(&format!(
        "SELECT {SCAN_JOB_COLUMNS} FROM scan_jobs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Current status of a job, or `None` if it does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_scan_job_status(pool: &PgPool, id: Uuid) -> Result<Option<String>, DbError> {
    let status = sqlx::query_scalar::<_, String>("SELECT status FROM scan_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(status)
}

/// Returns the most recent `limit` jobs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_scan_jobs(pool: &PgPool, limit: i64) -> Result<Vec<ScanJobRow>, DbError> {
    let rows = sqlx::query_as::<_, ScanJobRow>(&format!(
        "SELECT {SCAN_JOB_COLUMNS} FROM scan_jobs \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Jobs still `pending` or `scanning`, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_unfinished_scan_jobs(pool: &PgPool) -> Result<Vec<ScanJobRow>, DbError> {
    let rows = sqlx::query_as::<_, ScanJobRow>(&format!(
        "SELECT {SCAN_JOB_COLUMNS} FROM scan_jobs \
         WHERE status IN ('pending', 'scanning') \
         ORDER BY created_at ASC, id ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
