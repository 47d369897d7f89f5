//! Drives one scan job from `Pending` to a terminal state.
//!
//! Keywords run in order; each keyword's grid is walked in fixed-size
//! batches. Within a batch the distinct cache misses are queried
//! concurrently and joined before progress advances. Pacing applies between
//! batches, never between the queries of one batch.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use gridrank_core::{Coordinate, GridPoint, HeatmapData, RankObservation, ScanProgress};
use gridrank_provider::{zoom_for_radius, RankingProvider, SearchItem, SearchRequest};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, ResultCache};
use crate::error::ScanError;
use crate::events::{ScanEvent, ScanEvents};
use crate::heatmap::aggregate;
use crate::job::ScanJob;
use crate::matcher::{top_competitors, EntityMatcher};
use crate::settings::ScanSettings;
use crate::store::ScanStore;
use crate::usage::UsageLedger;

/// Units charged against the account per completed scan.
const UNITS_PER_SCAN: i64 = 1;

pub struct ScanOrchestrator<P, S, U> {
    provider: Arc<P>,
    store: Arc<S>,
    usage: Arc<U>,
    matcher: EntityMatcher,
    settings: ScanSettings,
    events: ScanEvents,
}

impl<P, S, U> ScanOrchestrator<P, S, U>
where
    P: RankingProvider,
    S: ScanStore,
    U: UsageLedger,
{
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        store: Arc<S>,
        usage: Arc<U>,
        settings: ScanSettings,
        events: ScanEvents,
    ) -> Self {
        Self {
            provider,
            store,
            usage,
            matcher: EntityMatcher::new(settings.overlap_threshold),
            settings,
            events,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Runs `job` with a fresh result cache.
    ///
    /// # Errors
    ///
    /// - [`ScanError::Cancelled`] when `cancel` fires; the job is persisted
    ///   as `Cancelled`.
    /// - [`ScanError::Superseded`] when the stored job was finalized by
    ///   another caller mid-run; nothing further is written or published.
    /// - Store or transition errors; the job is marked `Failed` (best effort)
    ///   and the error is returned.
    pub async fn run(
        &self,
        job: &mut ScanJob,
        cancel: &CancellationToken,
    ) -> Result<Vec<HeatmapData>, ScanError> {
        let mut cache = ResultCache::new();
        self.run_with_cache(job, cancel, &mut cache).await
    }

    /// Runs `job` against a caller-owned cache.
    ///
    /// # Errors
    ///
    /// See [`ScanOrchestrator::run`].
    pub async fn run_with_cache(
        &self,
        job: &mut ScanJob,
        cancel: &CancellationToken,
        cache: &mut ResultCache,
    ) -> Result<Vec<HeatmapData>, ScanError> {
        match self.execute(job, cancel, cache).await {
            Ok(heatmaps) => Ok(heatmaps),
            Err(e @ (ScanError::Cancelled(_) | ScanError::Superseded { .. })) => {
                if let ScanError::Superseded { status, .. } = &e {
                    tracing::info!(
                        job_id = %job.id,
                        %status,
                        "scan finalized elsewhere; stopping run"
                    );
                }
                Err(e)
            }
            Err(e) => {
                self.fail_run_best_effort(job, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &mut ScanJob,
        cancel: &CancellationToken,
        cache: &mut ResultCache,
    ) -> Result<Vec<HeatmapData>, ScanError> {
        if cancel.is_cancelled() {
            return Err(self.cancel_run(job).await);
        }

        job.start()?;
        self.persist(job).await?;

        let keywords = job.config.keywords.clone();
        let total_keywords = u32::try_from(keywords.len()).unwrap_or(u32::MAX);
        let zoom = zoom_for_radius(job.config.radius_km);
        let batch_size = self.settings.batch_size.max(1);

        tracing::info!(
            job_id = %job.id,
            business = %job.business.name,
            keywords = total_keywords,
            points = job.config.point_count(),
            grid = %job.config.grid_size,
            "scan started"
        );
        self.events.publish(ScanEvent::Started {
            job_id: job.id,
            total_keywords,
        });

        let mut first_batch = true;
        for (keyword_index, keyword) in keywords.iter().enumerate() {
            job.progress = ScanProgress {
                current_keyword_index: u32::try_from(keyword_index).unwrap_or(u32::MAX),
                total_keywords,
                current_keyword: Some(keyword.clone()),
                points_completed: 0,
            };

            let targets: Vec<(u32, Coordinate)> = job
                .grid(keyword)
                .ok_or_else(|| ScanError::UnknownKeyword {
                    job_id: job.id,
                    keyword: keyword.clone(),
                })?
                .points
                .iter()
                .map(|p| (p.position, p.coordinate))
                .collect();

            for (batch_index, batch) in targets.chunks(batch_size).enumerate() {
                if !first_batch {
                    tokio::select! {
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(self.settings.batch_delay) => {}
                    }
                }
                first_batch = false;
                if cancel.is_cancelled() {
                    return Err(self.cancel_run(job).await);
                }

                let observations = self.process_batch(job, keyword, batch, zoom, cache).await;
                for observation in observations {
                    job.record_observation(observation);
                }

                let scanned: Vec<GridPoint> = job
                    .grid(keyword)
                    .map(|g| {
                        g.points
                            .iter()
                            .filter(|p| batch.iter().any(|(pos, _)| *pos == p.position))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                self.store.save_points(job.id, keyword, &scanned).await?;

                job.progress.points_completed += u32::try_from(batch.len()).unwrap_or(u32::MAX);
                self.persist(job).await?;

                tracing::debug!(
                    job_id = %job.id,
                    keyword = %keyword,
                    batch = batch_index,
                    points_completed = job.progress.points_completed,
                    "batch complete"
                );
                self.events.publish(ScanEvent::Progress {
                    job_id: job.id,
                    progress: job.progress.clone(),
                });
            }

            let heatmap = {
                let grid = job.grid(keyword).ok_or_else(|| ScanError::UnknownKeyword {
                    job_id: job.id,
                    keyword: keyword.clone(),
                })?;
                aggregate(keyword, &grid.points, &job.observations)
            };
            self.store.save_heatmap(job.id, &heatmap).await?;

            tracing::info!(
                job_id = %job.id,
                keyword = %keyword,
                ranking = heatmap.points_ranking,
                top3 = heatmap.top3_count,
                visibility = heatmap.visibility_score,
                "keyword aggregated"
            );
            self.events.publish(ScanEvent::KeywordCompleted {
                job_id: job.id,
                keyword: keyword.clone(),
                visibility_score: heatmap.visibility_score,
            });
            job.set_heatmap(heatmap);
        }

        job.complete()?;
        self.persist(job).await?;

        if let Err(e) = self.usage.deduct(&job.account_id, UNITS_PER_SCAN).await {
            tracing::warn!(
                job_id = %job.id,
                account_id = %job.account_id,
                error = %e,
                "scan completed but usage deduction failed"
            );
        }

        let stats = cache.stats();
        tracing::info!(
            job_id = %job.id,
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            "scan complete"
        );
        self.events.publish(ScanEvent::Completed { job_id: job.id });

        Ok(job.heatmaps.clone())
    }

    /// Resolves one batch into observations. Provider failures become
    /// null-rank observations and never abort the batch.
    async fn process_batch(
        &self,
        job: &ScanJob,
        keyword: &str,
        batch: &[(u32, Coordinate)],
        zoom: u8,
        cache: &mut ResultCache,
    ) -> Vec<RankObservation> {
        let keys: Vec<CacheKey> = batch
            .iter()
            .map(|(_, coordinate)| CacheKey::new(keyword, *coordinate))
            .collect();

        let mut resolved: HashMap<CacheKey, Option<Arc<[SearchItem]>>> = HashMap::new();
        let mut misses: Vec<(CacheKey, Coordinate)> = Vec::new();
        for (key, (_, coordinate)) in keys.iter().zip(batch) {
            if resolved.contains_key(key) || misses.iter().any(|(k, _)| k == key) {
                continue;
            }
            match cache.get(key) {
                Some(items) => {
                    resolved.insert(key.clone(), Some(items));
                }
                None => misses.push((key.clone(), *coordinate)),
            }
        }

        let results = join_all(misses.into_iter().map(|(key, coordinate)| {
            let request = SearchRequest {
                keyword: keyword.to_string(),
                coordinate,
                zoom,
                language: self.settings.language.clone(),
                device: self.settings.device,
            };
            async move {
                let result = self.provider.search(&request).await;
                (key, coordinate, result)
            }
        }))
        .await;

        for (key, coordinate, result) in results {
            match result {
                Ok(items) => {
                    let items: Arc<[SearchItem]> = Arc::from(items);
                    cache.put(key.clone(), Arc::clone(&items));
                    resolved.insert(key, Some(items));
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        keyword,
                        coordinate = %coordinate,
                        error = %e,
                        "provider query failed; recording point as unranked"
                    );
                    resolved.insert(key, None);
                }
            }
        }

        batch
            .iter()
            .zip(&keys)
            .map(|((position, _), key)| match resolved.get(key).cloned().flatten() {
                Some(items) => {
                    let outcome = self.matcher.match_business(&items, &job.business);
                    RankObservation {
                        keyword: keyword.to_string(),
                        position: *position,
                        rank: outcome.rank,
                        matched_url: outcome.url,
                        match_tier: outcome.tier,
                        competitors: top_competitors(&items),
                    }
                }
                None => RankObservation::no_data(keyword, *position),
            })
            .collect()
    }

    /// Writes `job`, reporting a terminal stored status as
    /// [`ScanError::Superseded`].
    async fn persist(&self, job: &ScanJob) -> Result<(), ScanError> {
        match self.store.update_job(job).await {
            Err(ScanError::InvalidTransition { from, .. }) if from.is_terminal() => {
                Err(ScanError::Superseded {
                    job_id: job.id,
                    status: from,
                })
            }
            other => other,
        }
    }

    async fn cancel_run(&self, job: &mut ScanJob) -> ScanError {
        if let Err(e) = job.cancel() {
            return e;
        }
        match self.persist(job).await {
            Ok(()) => {}
            Err(e @ ScanError::Superseded { .. }) => return e,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to persist cancelled scan");
            }
        }
        tracing::info!(
            job_id = %job.id,
            keyword_index = job.progress.current_keyword_index,
            points_completed = job.progress.points_completed,
            "scan cancelled"
        );
        self.events.publish(ScanEvent::Cancelled { job_id: job.id });
        ScanError::Cancelled(job.id)
    }

    async fn fail_run_best_effort(&self, job: &mut ScanJob, error: &ScanError) {
        tracing::error!(job_id = %job.id, error = %error, "scan failed");
        if job.fail(error.to_string()).is_err() {
            return;
        }
        match self.persist(job).await {
            Ok(()) => {}
            Err(ScanError::Superseded { status, .. }) => {
                tracing::debug!(
                    job_id = %job.id,
                    %status,
                    "failure not recorded; scan already finalized"
                );
                return;
            }
            Err(mark_err) => {
                tracing::error!(
                    job_id = %job.id,
                    error = %mark_err,
                    "failed to mark scan as failed"
                );
            }
        }
        self.events.publish(ScanEvent::Failed {
            job_id: job.id,
            error: error.to_string(),
        });
    }
}
