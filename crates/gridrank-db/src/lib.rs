//! Postgres persistence for scan jobs, their grid points and heatmaps, and
//! per-account scan allowances.

pub mod pool;
pub mod scan_heatmaps;
pub mod scan_jobs;
pub mod scan_points;
pub mod usage;

use thiserror::Error;
use uuid::Uuid;

pub use pool::{
    connect_pool, connect_pool_from_env, health_check, ping, run_migrations, PoolConfig,
};
pub use scan_heatmaps::{list_scan_heatmaps, upsert_scan_heatmap, ScanHeatmapRow};
pub use scan_jobs::{
    cancel_scan_job, complete_scan_job, fail_scan_job, get_scan_job, get_scan_job_status,
    insert_scan_job, list_scan_jobs, list_unfinished_scan_jobs, mark_scan_job_scanning, NewScanJob, ScanJobRow,
};
pub use scan_points::{list_scan_points, upsert_scan_points, NewScanPoint, ScanPointRow};
pub use usage::{deduct_allowance, get_remaining_allowance, grant_allowance};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("record not found")]
    NotFound,
    #[error("database schema is missing table {0}; run migrations")]
    SchemaMissing(&'static str),
    /// A guarded status update matched no row.
    #[error("scan job {id} is not in an expected status ({expected_status})")]
    InvalidScanTransition {
        id: Uuid,
        expected_status: &'static str,
    },
    #[error("account {account_id} has {remaining} scans remaining")]
    InsufficientAllowance { account_id: String, remaining: i64 },
    #[error("stored payload could not be decoded: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_allowance_names_the_account() {
        let err = DbError::InsufficientAllowance {
            account_id: "acct-9".to_string(),
            remaining: 0,
        };
        assert_eq!(err.to_string(), "account acct-9 has 0 scans remaining");
    }

    #[test]
    fn schema_missing_points_at_migrations() {
        let err = DbError::SchemaMissing("scan_jobs");
        assert!(err.to_string().contains("run migrations"));
    }
}
