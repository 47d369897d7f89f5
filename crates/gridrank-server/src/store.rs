//! Postgres-backed implementations of the scan engine's persistence seams.

use chrono::Utc;
use gridrank_core::{
    BusinessIdentity, GridPoint, GridSize, HeatmapData, RankObservation, ScanConfig, ScanStatus,
};
use gridrank_db::{DbError, NewScanJob, NewScanPoint, ScanJobRow, ScanPointRow};
use gridrank_scan::{Lifecycle, ScanError, ScanJob, ScanStore, ScanSummary, UsageLedger};
use sqlx::PgPool;
use uuid::Uuid;

fn store_error(err: impl std::fmt::Display) -> ScanError {
    ScanError::Store(err.to_string())
}

#[derive(Debug, Clone)]
pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Turns a guard miss into the transition the caller attempted.
    async fn transition_error(&self, id: Uuid, to: ScanStatus, err: DbError) -> ScanError {
        let DbError::InvalidScanTransition { .. } = err else {
            return store_error(err);
        };
        match gridrank_db::get_scan_job_status(&self.pool, id).await {
            Ok(Some(current)) => match current.parse::<ScanStatus>() {
                Ok(from) => ScanError::InvalidTransition { from, to },
                Err(e) => store_error(e),
            },
            Ok(None) => ScanError::NotFound(id),
            Err(e) => store_error(e),
        }
    }
}

impl ScanStore for PgScanStore {
    async fn create_job(&self, job: &ScanJob) -> Result<(), ScanError> {
        let new_job = NewScanJob {
            id: job.id,
            account_id: &job.account_id,
            business: serde_json::to_value(&job.business).map_err(store_error)?,
            grid_size: i16::from(u8::from(job.config.grid_size)),
            radius_km: job.config.radius_km,
            keywords: &job.config.keywords,
            progress: serde_json::to_value(&job.progress).map_err(store_error)?,
            estimated_cost: job.estimated_cost,
            created_at: job.created_at(),
        };
        gridrank_db::insert_scan_job(&self.pool, &new_job)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn update_job(&self, job: &ScanJob) -> Result<(), ScanError> {
        let progress = serde_json::to_value(&job.progress).map_err(store_error)?;
        let status = job.status();
        let now = Utc::now();

        let result = match status {
            // Nothing mutable is stored for a queued job; only check it is
            // still queued.
            ScanStatus::Pending => {
                return match gridrank_db::get_scan_job_status(&self.pool, job.id)
                    .await
                    .map_err(store_error)?
                {
                    Some(current) if current == ScanStatus::Pending.as_str() => Ok(()),
                    Some(current) => Err(ScanError::InvalidTransition {
                        from: current.parse().map_err(store_error)?,
                        to: status,
                    }),
                    None => Err(ScanError::NotFound(job.id)),
                };
            }
            ScanStatus::Scanning => {
                gridrank_db::mark_scan_job_scanning(
                    &self.pool,
                    job.id,
                    job.started_at().unwrap_or(now),
                    &progress,
                )
                .await
            }
            ScanStatus::Complete => {
                gridrank_db::complete_scan_job(
                    &self.pool,
                    job.id,
                    job.completed_at().unwrap_or(now),
                    &progress,
                )
                .await
            }
            ScanStatus::Failed => {
                gridrank_db::fail_scan_job(
                    &self.pool,
                    job.id,
                    job.error_message().unwrap_or_default(),
                    job.completed_at().unwrap_or(now),
                    &progress,
                )
                .await
            }
            ScanStatus::Cancelled => {
                gridrank_db::cancel_scan_job(
                    &self.pool,
                    job.id,
                    job.completed_at().unwrap_or(now),
                    &progress,
                )
                .await
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.transition_error(job.id, status, e).await),
        }
    }

    async fn save_points(
        &self,
        job_id: Uuid,
        keyword: &str,
        points: &[GridPoint],
    ) -> Result<(), ScanError> {
        let rows = points
            .iter()
            .map(new_scan_point)
            .collect::<Result<Vec<_>, _>>()?;
        gridrank_db::upsert_scan_points(&self.pool, job_id, keyword, &rows)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn save_heatmap(&self, job_id: Uuid, heatmap: &HeatmapData) -> Result<(), ScanError> {
        let payload = serde_json::to_value(heatmap).map_err(store_error)?;
        gridrank_db::upsert_scan_heatmap(
            &self.pool,
            job_id,
            &heatmap.keyword,
            heatmap.visibility_score,
            heatmap.average_rank,
            &payload,
        )
        .await
        .map_err(store_error)
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<ScanJob>, ScanError> {
        let row = match gridrank_db::get_scan_job(&self.pool, id).await {
            Ok(row) => row,
            Err(DbError::NotFound) => return Ok(None),
            Err(e) => return Err(store_error(e)),
        };
        let mut job = job_from_row(row)?;

        let points = gridrank_db::list_scan_points(&self.pool, id)
            .await
            .map_err(store_error)?;
        for point in points {
            job.record_observation(observation_from_row(point)?);
        }

        let heatmaps = gridrank_db::list_scan_heatmaps(&self.pool, id)
            .await
            .map_err(store_error)?;
        for heatmap in heatmaps {
            job.set_heatmap(serde_json::from_value(heatmap.payload).map_err(store_error)?);
        }

        Ok(Some(job))
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<ScanSummary>, ScanError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = gridrank_db::list_scan_jobs(&self.pool, limit)
            .await
            .map_err(store_error)?;

        rows.into_iter().map(summary_from_row).collect()
    }

    async fn list_unfinished(&self) -> Result<Vec<ScanSummary>, ScanError> {
        gridrank_db::list_unfinished_scan_jobs(&self.pool)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(summary_from_row)
            .collect()
    }
}

fn summary_from_row(row: ScanJobRow) -> Result<ScanSummary, ScanError> {
    Ok(ScanSummary {
        id: row.id,
        business_name: row.business["name"].as_str().unwrap_or_default().to_string(),
        account_id: row.account_id,
        status: row.status.parse().map_err(store_error)?,
        progress: serde_json::from_value(row.progress).map_err(store_error)?,
        estimated_cost: row.estimated_cost,
        created_at: row.created_at,
        completed_at: row.completed_at,
    })
}

fn new_scan_point(point: &GridPoint) -> Result<NewScanPoint, ScanError> {
    Ok(NewScanPoint {
        position: i32::try_from(point.position).map_err(store_error)?,
        latitude: point.coordinate.lat,
        longitude: point.coordinate.lng,
        distance_km: point.distance_km,
        rank: point.rank.map(i32::try_from).transpose().map_err(store_error)?,
        matched_url: point.matched_url.clone(),
        match_tier: point.match_tier.map(|tier| tier.as_str().to_string()),
        competitors: serde_json::to_value(&point.competitors).map_err(store_error)?,
    })
}

fn job_from_row(row: ScanJobRow) -> Result<ScanJob, ScanError> {
    let business: BusinessIdentity = serde_json::from_value(row.business).map_err(store_error)?;
    let grid_size = u8::try_from(row.grid_size)
        .map_err(store_error)
        .and_then(|size| GridSize::try_from(size).map_err(store_error))?;
    let config = ScanConfig {
        grid_size,
        radius_km: row.radius_km,
        keywords: row.keywords,
    };
    let lifecycle = Lifecycle {
        status: row.status.parse().map_err(store_error)?,
        error_message: row.error_message,
        created_at: row.created_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
    };

    let mut job = ScanJob::restore(
        row.id,
        row.account_id,
        business,
        config,
        row.estimated_cost,
        lifecycle,
    );
    job.progress = serde_json::from_value(row.progress).map_err(store_error)?;
    Ok(job)
}

fn observation_from_row(row: ScanPointRow) -> Result<RankObservation, ScanError> {
    Ok(RankObservation {
        keyword: row.keyword,
        position: u32::try_from(row.position).map_err(store_error)?,
        rank: row.rank.map(u32::try_from).transpose().map_err(store_error)?,
        matched_url: row.matched_url,
        match_tier: row
            .match_tier
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(store_error)?,
        competitors: serde_json::from_value(row.competitors).map_err(store_error)?,
    })
}

#[derive(Debug, Clone)]
pub struct PgUsageLedger {
    pool: PgPool,
}

impl PgUsageLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UsageLedger for PgUsageLedger {
    async fn remaining(&self, account_id: &str) -> Result<i64, ScanError> {
        gridrank_db::get_remaining_allowance(&self.pool, account_id)
            .await
            .map_err(|e| ScanError::Usage(e.to_string()))
    }

    async fn deduct(&self, account_id: &str, units: i64) -> Result<i64, ScanError> {
        match gridrank_db::deduct_allowance(&self.pool, account_id, units).await {
            Ok(remaining) => Ok(remaining),
            Err(DbError::InsufficientAllowance {
                account_id,
                remaining,
            }) => Err(ScanError::InsufficientAllowance {
                account_id,
                remaining,
            }),
            Err(e) => Err(ScanError::Usage(e.to_string())),
        }
    }
}
