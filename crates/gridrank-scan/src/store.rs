//! Persistence seam for scan jobs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use gridrank_core::{GridPoint, HeatmapData, RankObservation};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ScanError;
use crate::job::{ScanJob, ScanSummary};

/// Where scan jobs, their points, and heatmaps are stored.
///
/// `update_job` must refuse every write to a job whose stored status is
/// terminal, returning [`ScanError::InvalidTransition`] with the stored
/// status as `from`.
pub trait ScanStore: Send + Sync {
    fn create_job(&self, job: &ScanJob) -> impl Future<Output = Result<(), ScanError>> + Send;

    /// Persists status, lifecycle timestamps, error message, and progress.
    fn update_job(&self, job: &ScanJob) -> impl Future<Output = Result<(), ScanError>> + Send;

    /// Upserts scanned points for one keyword.
    fn save_points(
        &self,
        job_id: Uuid,
        keyword: &str,
        points: &[GridPoint],
    ) -> impl Future<Output = Result<(), ScanError>> + Send;

    fn save_heatmap(
        &self,
        job_id: Uuid,
        heatmap: &HeatmapData,
    ) -> impl Future<Output = Result<(), ScanError>> + Send;

    fn load_job(&self, id: Uuid) -> impl Future<Output = Result<Option<ScanJob>, ScanError>> + Send;

    /// Most recent jobs first.
    fn list_jobs(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScanSummary>, ScanError>> + Send;

    /// Every `Pending` or `Scanning` job, oldest first.
    fn list_unfinished(&self) -> impl Future<Output = Result<Vec<ScanSummary>, ScanError>> + Send;
}

impl<S: ScanStore> ScanStore for Arc<S> {
    fn create_job(&self, job: &ScanJob) -> impl Future<Output = Result<(), ScanError>> + Send {
        S::create_job(self, job)
    }

    fn update_job(&self, job: &ScanJob) -> impl Future<Output = Result<(), ScanError>> + Send {
        S::update_job(self, job)
    }

    fn save_points(
        &self,
        job_id: Uuid,
        keyword: &str,
        points: &[GridPoint],
    ) -> impl Future<Output = Result<(), ScanError>> + Send {
        S::save_points(self, job_id, keyword, points)
    }

    fn save_heatmap(
        &self,
        job_id: Uuid,
        heatmap: &HeatmapData,
    ) -> impl Future<Output = Result<(), ScanError>> + Send {
        S::save_heatmap(self, job_id, heatmap)
    }

    fn load_job(&self, id: Uuid) -> impl Future<Output = Result<Option<ScanJob>, ScanError>> + Send {
        S::load_job(self, id)
    }

    fn list_jobs(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScanSummary>, ScanError>> + Send {
        S::list_jobs(self, limit)
    }

    fn list_unfinished(&self) -> impl Future<Output = Result<Vec<ScanSummary>, ScanError>> + Send {
        S::list_unfinished(self)
    }
}

/// The observation a scanned grid point represents.
#[must_use]
pub fn observation_from_point(keyword: &str, point: &GridPoint) -> RankObservation {
    RankObservation {
        keyword: keyword.to_string(),
        position: point.position,
        rank: point.rank,
        matched_url: point.matched_url.clone(),
        match_tier: point.match_tier,
        competitors: point.competitors.clone(),
    }
}

/// In-process store for tests and one-shot CLI scans.
#[derive(Debug, Default)]
pub struct MemoryScanStore {
    jobs: RwLock<HashMap<Uuid, ScanJob>>,
}

impl MemoryScanStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScanStore for MemoryScanStore {
    async fn create_job(&self, job: &ScanJob) -> Result<(), ScanError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(ScanError::Store(format!("scan {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &ScanJob) -> Result<(), ScanError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get_mut(&job.id).ok_or(ScanError::NotFound(job.id))?;
        let (from, to) = (stored.status(), job.status());
        if from.is_terminal() {
            return Err(ScanError::InvalidTransition { from, to });
        }
        // Points, heatmaps, and the ledger arrive through their own calls.
        let mut updated = job.clone();
        updated.grids = std::mem::take(&mut stored.grids);
        updated.observations = std::mem::take(&mut stored.observations);
        updated.heatmaps = std::mem::take(&mut stored.heatmaps);
        *stored = updated;
        Ok(())
    }

    async fn save_points(
        &self,
        job_id: Uuid,
        keyword: &str,
        points: &[GridPoint],
    ) -> Result<(), ScanError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get_mut(&job_id).ok_or(ScanError::NotFound(job_id))?;
        for point in points {
            stored.record_observation(observation_from_point(keyword, point));
        }
        Ok(())
    }

    async fn save_heatmap(&self, job_id: Uuid, heatmap: &HeatmapData) -> Result<(), ScanError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get_mut(&job_id).ok_or(ScanError::NotFound(job_id))?;
        stored.set_heatmap(heatmap.clone());
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<ScanJob>, ScanError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<ScanSummary>, ScanError> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<ScanSummary> = jobs.values().map(ScanSummary::from).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn list_unfinished(&self) -> Result<Vec<ScanSummary>, ScanError> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<ScanSummary> = jobs
            .values()
            .filter(|job| !job.status().is_terminal())
            .map(ScanSummary::from)
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use gridrank_core::{BusinessIdentity, Coordinate, GridSize, ScanConfig, ScanStatus};
    use rust_decimal::Decimal;

    use super::*;

    fn job() -> ScanJob {
        ScanJob::create(
            "acct-1",
            BusinessIdentity::new("Joe's Pizza", Coordinate::new(40.73, -74.0)),
            ScanConfig {
                grid_size: GridSize::Three,
                radius_km: 1.0,
                keywords: vec!["pizza".into()],
            },
            Decimal::ZERO,
        )
    }

    #[tokio::test]
    async fn points_survive_job_updates() {
        let store = MemoryScanStore::new();
        let mut job = job();
        store.create_job(&job).await.unwrap();

        let mut point = job.grids[0].points[0].clone();
        point.rank = Some(4);
        store.save_points(job.id, "pizza", &[point]).await.unwrap();

        job.start().unwrap();
        job.progress.points_completed = 1;
        store.update_job(&job).await.unwrap();

        let loaded = store.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), ScanStatus::Scanning);
        assert_eq!(loaded.progress.points_completed, 1);
        assert_eq!(loaded.grids[0].points[0].rank, Some(4));
        assert_eq!(loaded.observations.len(), 1);
    }

    #[tokio::test]
    async fn refuses_to_leave_terminal_status() {
        let store = MemoryScanStore::new();
        let mut job = job();
        store.create_job(&job).await.unwrap();

        let mut cancelled = job.clone();
        cancelled.cancel().unwrap();
        store.update_job(&cancelled).await.unwrap();

        job.start().unwrap();
        let err = store.update_job(&job).await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::InvalidTransition {
                from: ScanStatus::Cancelled,
                to: ScanStatus::Scanning
            }
        ));
    }

    #[tokio::test]
    async fn terminal_job_refuses_repeat_writes() {
        let store = MemoryScanStore::new();
        let mut job = job();
        store.create_job(&job).await.unwrap();
        job.start().unwrap();
        store.update_job(&job).await.unwrap();

        let mut reported = job.clone();
        reported.fail("provider account suspended").unwrap();
        store.update_job(&reported).await.unwrap();

        job.fail("invalid scan transition").unwrap();
        let err = store.update_job(&job).await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::InvalidTransition {
                from: ScanStatus::Failed,
                to: ScanStatus::Failed
            }
        ));
        let stored = store.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message(), Some("provider account suspended"));
    }

    #[tokio::test]
    async fn unfinished_lists_only_live_jobs_oldest_first() {
        let store = MemoryScanStore::new();
        let queued = job();
        store.create_job(&queued).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut running = job();
        store.create_job(&running).await.unwrap();
        running.start().unwrap();
        store.update_job(&running).await.unwrap();
        let mut cancelled = job();
        store.create_job(&cancelled).await.unwrap();
        cancelled.cancel().unwrap();
        store.update_job(&cancelled).await.unwrap();

        let ids: Vec<Uuid> = store
            .list_unfinished()
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![queued.id, running.id]);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = MemoryScanStore::new();
        assert!(store.load_job(Uuid::new_v4()).await.unwrap().is_none());
        assert!(matches!(
            store.update_job(&job()).await,
            Err(ScanError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let store = MemoryScanStore::new();
        let first = job();
        store.create_job(&first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = job();
        store.create_job(&second).await.unwrap();

        let listed = store.list_jobs(1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);
    }
}
