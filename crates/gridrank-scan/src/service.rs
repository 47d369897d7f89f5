//! Control surface for scans: validation, queueing, background workers,
//! status queries, and cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use gridrank_core::{
    estimate_cost, BusinessIdentity, HeatmapData, Keyword, ScanConfig, ScanStatus,
};
use gridrank_provider::RankingProvider;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ScanError;
use crate::events::{ScanEvent, ScanEvents};
use crate::job::{ScanJob, ScanSummary};
use crate::orchestrator::ScanOrchestrator;
use crate::settings::ScanSettings;
use crate::store::ScanStore;
use crate::usage::UsageLedger;

const QUEUE_CAPACITY: usize = 64;

/// Error recorded on scans that were running when the previous process
/// stopped.
pub const INTERRUPTED_REASON: &str = "interrupted by restart";

/// What [`ScanService::recover`] did with the jobs it found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    pub requeued: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub account_id: String,
    pub business: BusinessIdentity,
    pub config: ScanConfig,
}

/// Shared handle to the scan engine. Cloning is cheap.
pub struct ScanService<P, S, U> {
    inner: Arc<Inner<P, S, U>>,
}

impl<P, S, U> Clone for ScanService<P, S, U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<P, S, U> {
    orchestrator: ScanOrchestrator<P, S, U>,
    store: Arc<S>,
    usage: Arc<U>,
    settings: ScanSettings,
    events: ScanEvents,
    queue: mpsc::Sender<Uuid>,
    receiver: Mutex<mpsc::Receiver<Uuid>>,
    /// Cancellation tokens of queued and running jobs.
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

impl<P, S, U> ScanService<P, S, U>
where
    P: RankingProvider + 'static,
    S: ScanStore + 'static,
    U: UsageLedger + 'static,
{
    #[must_use]
    pub fn new(provider: Arc<P>, store: Arc<S>, usage: Arc<U>, settings: ScanSettings) -> Self {
        let events = ScanEvents::new();
        let (queue, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let orchestrator = ScanOrchestrator::new(
            provider,
            Arc::clone(&store),
            Arc::clone(&usage),
            settings.clone(),
            events.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                store,
                usage,
                settings,
                events,
                queue,
                receiver: Mutex::new(receiver),
                tokens: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawns `max_concurrent_scans` workers draining the queue. They exit
    /// after [`ScanService::shutdown`].
    #[must_use]
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.inner.settings.max_concurrent_scans.max(1))
            .map(|worker| {
                let service = self.clone();
                tokio::spawn(async move { service.worker_loop(worker).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize) {
        tracing::debug!(worker, "scan worker started");
        loop {
            let next = {
                let mut receiver = self.inner.receiver.lock().await;
                tokio::select! {
                    () = self.inner.shutdown.cancelled() => None,
                    id = receiver.recv() => id,
                }
            };
            let Some(job_id) = next else {
                break;
            };
            self.process(job_id).await;
        }
        tracing::debug!(worker, "scan worker stopped");
    }

    /// Runs one queued job to completion.
    async fn process(&self, job_id: Uuid) {
        let token = self
            .inner
            .tokens
            .lock()
            .await
            .entry(job_id)
            .or_default()
            .clone();

        if token.is_cancelled() {
            tracing::debug!(%job_id, "skipping cancelled scan");
        } else {
            match self.inner.store.load_job(job_id).await {
                Ok(Some(mut job)) if job.status() == ScanStatus::Pending => {
                    match self.inner.orchestrator.run(&mut job, &token).await {
                        Ok(_) | Err(ScanError::Cancelled(_) | ScanError::Superseded { .. }) => {}
                        Err(e) => {
                            tracing::error!(%job_id, error = %e, "scan run failed");
                        }
                    }
                }
                Ok(Some(job)) => {
                    tracing::debug!(%job_id, status = %job.status(), "skipping non-pending scan");
                }
                Ok(None) => {
                    tracing::error!(%job_id, "queued scan not found in store");
                }
                Err(e) => {
                    tracing::error!(%job_id, error = %e, "failed to load queued scan");
                }
            }
        }

        self.inner.tokens.lock().await.remove(&job_id);
    }

    /// Validates and enqueues a scan, returning its id.
    ///
    /// Keywords are trimmed and de-duplicated case-insensitively before
    /// validation. Nothing is persisted when validation fails.
    ///
    /// # Errors
    ///
    /// - [`ScanError::InvalidConfig`] for an empty business name, invalid
    ///   coordinates, no usable keywords, or a bad radius.
    /// - [`ScanError::InsufficientAllowance`] when the account has no scans
    ///   left.
    /// - Store errors from creating the job; [`ScanError::QueueClosed`]
    ///   after shutdown.
    pub async fn start_scan(&self, request: ScanRequest) -> Result<Uuid, ScanError> {
        let ScanRequest {
            account_id,
            business,
            mut config,
        } = request;

        if business.name.trim().is_empty() {
            return Err(ScanError::InvalidConfig(
                "business name must be non-empty".to_string(),
            ));
        }
        if !business.coordinate.is_valid() {
            return Err(ScanError::InvalidConfig(format!(
                "business coordinate {} is out of range",
                business.coordinate
            )));
        }
        let keywords: Vec<Keyword> = config.keywords.iter().map(Keyword::active).collect();
        config.keywords = Keyword::active_texts(&keywords);
        config.validate()?;

        let remaining = self.inner.usage.remaining(&account_id).await?;
        if remaining < 1 {
            return Err(ScanError::InsufficientAllowance {
                account_id,
                remaining,
            });
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(ScanError::QueueClosed);
        }

        let cost = self.estimate_cost(
            config.point_count(),
            u32::try_from(config.keywords.len()).unwrap_or(u32::MAX),
        );
        let job = ScanJob::create(account_id, business, config, cost);
        let job_id = job.id;
        self.inner.store.create_job(&job).await?;
        self.inner
            .tokens
            .lock()
            .await
            .insert(job_id, CancellationToken::new());

        if self.inner.queue.send(job_id).await.is_err() {
            self.inner.tokens.lock().await.remove(&job_id);
            return Err(ScanError::QueueClosed);
        }

        tracing::info!(
            %job_id,
            account_id = %job.account_id,
            business = %job.business.name,
            estimated_cost = %cost,
            "scan queued"
        );
        self.inner.events.publish(ScanEvent::Queued { job_id });
        Ok(job_id)
    }

    /// # Errors
    ///
    /// [`ScanError::NotFound`] for an unknown id, or a store error.
    pub async fn get_scan_status(&self, job_id: Uuid) -> Result<ScanJob, ScanError> {
        self.inner
            .store
            .load_job(job_id)
            .await?
            .ok_or(ScanError::NotFound(job_id))
    }

    /// # Errors
    ///
    /// - [`ScanError::NotFound`] for an unknown scan.
    /// - [`ScanError::UnknownKeyword`] if `keyword` is not part of the scan.
    /// - [`ScanError::NotReady`] until the keyword has been aggregated.
    pub async fn get_heatmap(&self, job_id: Uuid, keyword: &str) -> Result<HeatmapData, ScanError> {
        let job = self.get_scan_status(job_id).await?;
        if !job.has_keyword(keyword) {
            return Err(ScanError::UnknownKeyword {
                job_id,
                keyword: keyword.to_string(),
            });
        }
        job.heatmap(keyword)
            .cloned()
            .ok_or_else(|| ScanError::NotReady {
                job_id,
                keyword: keyword.to_string(),
            })
    }

    /// # Errors
    ///
    /// Store errors only.
    pub async fn list_scans(&self, limit: usize) -> Result<Vec<ScanSummary>, ScanError> {
        self.inner.store.list_jobs(limit).await
    }

    #[must_use]
    pub fn estimate_cost(&self, point_count: u32, keyword_count: u32) -> Decimal {
        estimate_cost(point_count, keyword_count, self.inner.settings.cost_per_query)
    }

    /// Requests cancellation. A queued job is cancelled immediately; a
    /// running one stops before its next batch. A `Scanning` job with no
    /// worker in this process is cancelled in the store directly.
    ///
    /// # Errors
    ///
    /// - [`ScanError::NotFound`] for an unknown scan.
    /// - [`ScanError::InvalidTransition`] if the scan already finished.
    pub async fn cancel_scan(&self, job_id: Uuid) -> Result<(), ScanError> {
        let mut job = self.get_scan_status(job_id).await?;
        let status = job.status();
        if status.is_terminal() {
            return Err(ScanError::InvalidTransition {
                from: status,
                to: ScanStatus::Cancelled,
            });
        }

        let live = match self.inner.tokens.lock().await.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };

        if status == ScanStatus::Pending || !live {
            job.cancel()?;
            self.inner.store.update_job(&job).await?;
            self.inner.events.publish(ScanEvent::Cancelled { job_id });
        }
        tracing::info!(%job_id, %status, live, "scan cancellation requested");
        Ok(())
    }

    /// Marks a scan failed on behalf of an external caller and stops it.
    ///
    /// # Errors
    ///
    /// - [`ScanError::NotFound`] for an unknown scan.
    /// - [`ScanError::InvalidTransition`] if the scan already finished.
    pub async fn report_failure(&self, job_id: Uuid, reason: &str) -> Result<(), ScanError> {
        let mut job = self.get_scan_status(job_id).await?;
        job.fail(reason)?;
        self.inner.store.update_job(&job).await?;

        if let Some(token) = self.inner.tokens.lock().await.get(&job_id) {
            token.cancel();
        }
        tracing::warn!(%job_id, reason, "scan failure reported");
        self.inner.events.publish(ScanEvent::Failed {
            job_id,
            error: reason.to_string(),
        });
        Ok(())
    }

    /// Reconciles jobs left unfinished by an earlier process. `Scanning` jobs
    /// without a worker here are failed with [`INTERRUPTED_REASON`]; `Pending`
    /// jobs are queued again.
    ///
    /// Call after [`ScanService::spawn_workers`]: queueing waits for free
    /// capacity.
    ///
    /// # Errors
    ///
    /// Store errors from listing or updating jobs; [`ScanError::QueueClosed`]
    /// after shutdown.
    pub async fn recover(&self) -> Result<Recovery, ScanError> {
        let mut recovery = Recovery::default();

        for summary in self.inner.store.list_unfinished().await? {
            let job_id = summary.id;
            if self.inner.tokens.lock().await.contains_key(&job_id) {
                continue;
            }

            match summary.status {
                ScanStatus::Pending => {
                    self.inner
                        .tokens
                        .lock()
                        .await
                        .insert(job_id, CancellationToken::new());
                    if self.inner.queue.send(job_id).await.is_err() {
                        self.inner.tokens.lock().await.remove(&job_id);
                        return Err(ScanError::QueueClosed);
                    }
                    recovery.requeued += 1;
                }
                ScanStatus::Scanning => {
                    let mut job = self.get_scan_status(job_id).await?;
                    if job.fail(INTERRUPTED_REASON).is_err() {
                        continue;
                    }
                    match self.inner.store.update_job(&job).await {
                        Ok(()) => {}
                        Err(ScanError::InvalidTransition { from, .. }) if from.is_terminal() => {
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                    self.inner.events.publish(ScanEvent::Failed {
                        job_id,
                        error: INTERRUPTED_REASON.to_string(),
                    });
                    recovery.failed += 1;
                }
                _ => {}
            }
        }

        tracing::info!(
            requeued = recovery.requeued,
            failed = recovery.failed,
            "recovered unfinished scans"
        );
        Ok(recovery)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// Fires once [`ScanService::shutdown`] has been called.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    /// Stops accepting work, cancels every queued and running scan, and
    /// lets workers exit.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let tokens = self.inner.tokens.lock().await;
        for token in tokens.values() {
            token.cancel();
        }
        tracing::info!(in_flight = tokens.len(), "scan service shutting down");
    }
}
