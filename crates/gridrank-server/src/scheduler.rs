//! Cron-driven re-scans of tracked businesses.
//!
//! Every business in `businesses.yaml` with a `rescan_cron` gets one job
//! that submits a scan on behalf of [`SCHEDULER_ACCOUNT`].

use gridrank_core::BusinessConfig;
use gridrank_scan::ScanRequest;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::api::Scans;

/// Account charged for scheduled scans.
pub const SCHEDULER_ACCOUNT: &str = "scheduler";

/// Builds and starts the scheduler with one re-scan job per business that
/// declares a `rescan_cron`.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a cron expression is rejected, or the scheduler fails to start.
pub async fn build_scheduler(
    scans: Scans,
    businesses: &[BusinessConfig],
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let mut registered = 0_usize;
    for business in businesses {
        if let Some(cron) = business.rescan_cron.as_deref() {
            register_rescan_job(&scheduler, scans.clone(), business, cron).await?;
            registered += 1;
        }
    }
    tracing::info!(jobs = registered, "scheduler: registered re-scan jobs");

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_rescan_job(
    scheduler: &JobScheduler,
    scans: Scans,
    business: &BusinessConfig,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let slug = business.slug();
    let request = rescan_request(business);

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let scans = scans.clone();
        let request = request.clone();
        let slug = slug.clone();

        Box::pin(async move {
            match scans.start_scan(request).await {
                Ok(job_id) => {
                    tracing::info!(business = %slug, %job_id, "scheduler: re-scan queued");
                }
                Err(e) => {
                    tracing::error!(business = %slug, error = %e, "scheduler: re-scan rejected");
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    tracing::debug!(business = %business.slug(), cron, "scheduler: re-scan job added");
    Ok(())
}

/// The scan a scheduled run submits for `business`.
pub fn rescan_request(business: &BusinessConfig) -> ScanRequest {
    ScanRequest {
        account_id: SCHEDULER_ACCOUNT.to_string(),
        business: business.identity(),
        config: business.scan_config(),
    }
}
