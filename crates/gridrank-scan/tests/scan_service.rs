//! `ScanService` validation, queueing, and lifecycle controls.

use std::future::Future;
use std::sync::Arc;

use gridrank_core::{BusinessIdentity, Coordinate, GridSize, ScanConfig, ScanStatus};
use gridrank_provider::{ProviderError, RankingProvider, SearchItem, SearchRequest};
use gridrank_scan::{
    MemoryScanStore, MemoryUsageLedger, Recovery, ScanError, ScanEvent, ScanJob, ScanRequest,
    ScanService, ScanSettings, ScanStore, UsageLedger, INTERRUPTED_REASON,
};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

const ACCOUNT: &str = "acct-1";

struct TopRanked;

impl RankingProvider for TopRanked {
    fn search(
        &self,
        _request: &SearchRequest,
    ) -> impl Future<Output = Result<Vec<SearchItem>, ProviderError>> + Send {
        std::future::ready(Ok(vec![SearchItem {
            rank: 1,
            title: "Joe's Pizza".to_string(),
            domain: Some("joespizza.com".to_string()),
            url: Some("https://joespizza.com/".to_string()),
            cid: None,
            place_id: None,
        }]))
    }
}

/// Holds every query until the test releases permits.
struct Gated {
    gate: Arc<Semaphore>,
}

impl RankingProvider for Gated {
    fn search(
        &self,
        _request: &SearchRequest,
    ) -> impl Future<Output = Result<Vec<SearchItem>, ProviderError>> + Send {
        let gate = Arc::clone(&self.gate);
        async move {
            let _permit = gate.acquire().await;
            Ok(Vec::new())
        }
    }
}

type Service = ScanService<TopRanked, MemoryScanStore, MemoryUsageLedger>;
type GatedService = ScanService<Gated, MemoryScanStore, MemoryUsageLedger>;

fn service(allowance: i64) -> (Service, Arc<MemoryUsageLedger>) {
    let usage = Arc::new(MemoryUsageLedger::with_allowance(ACCOUNT, allowance));
    let service = ScanService::new(
        Arc::new(TopRanked),
        Arc::new(MemoryScanStore::new()),
        Arc::clone(&usage),
        ScanSettings::default(),
    );
    (service, usage)
}

fn gated_service(store: Arc<MemoryScanStore>) -> (GatedService, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let service = ScanService::new(
        Arc::new(Gated {
            gate: Arc::clone(&gate),
        }),
        store,
        Arc::new(MemoryUsageLedger::with_allowance(ACCOUNT, 2)),
        ScanSettings::default(),
    );
    (service, gate)
}

async fn wait_for_started(events: &mut broadcast::Receiver<ScanEvent>, id: uuid::Uuid) {
    loop {
        let event = events.recv().await.expect("event stream open");
        if matches!(event, ScanEvent::Started { job_id, .. } if job_id == id) {
            return;
        }
    }
}

/// Releases the gate, stops the service, and returns the events left for `id`.
async fn drain(
    service: &GatedService,
    gate: &Semaphore,
    workers: Vec<JoinHandle<()>>,
    events: &mut broadcast::Receiver<ScanEvent>,
    id: uuid::Uuid,
) -> Vec<ScanEvent> {
    gate.add_permits(1_000);
    service.shutdown().await;
    for worker in workers {
        worker.await.unwrap();
    }
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id() == id {
            seen.push(event);
        }
    }
    seen
}

fn request(keywords: &[&str], radius_km: f64) -> ScanRequest {
    ScanRequest {
        account_id: ACCOUNT.to_string(),
        business: BusinessIdentity::new("Joe's Pizza", Coordinate::new(40.7306, -74.0027)),
        config: ScanConfig {
            grid_size: GridSize::Three,
            radius_km,
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
        },
    }
}

#[tokio::test]
async fn rejects_invalid_requests_before_creating_a_job() {
    let (service, _) = service(5);

    let err = service.start_scan(request(&[], 2.0)).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidConfig(_)));

    let err = service.start_scan(request(&["  "], 2.0)).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidConfig(_)));

    let err = service.start_scan(request(&["pizza"], 0.0)).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidConfig(_)));

    let mut nameless = request(&["pizza"], 2.0);
    nameless.business.name = "   ".to_string();
    let err = service.start_scan(nameless).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidConfig(_)));

    assert!(service.list_scans(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejects_accounts_without_allowance() {
    let (service, _) = service(0);
    let err = service.start_scan(request(&["pizza"], 2.0)).await.unwrap_err();
    assert!(matches!(
        err,
        ScanError::InsufficientAllowance { remaining: 0, .. }
    ));
    assert!(service.list_scans(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn queued_scan_dedupes_keywords_and_prices_the_work() {
    let (service, _) = service(5);
    let id = service
        .start_scan(request(&["pizza", "Pizza ", "slice"], 2.0))
        .await
        .unwrap();

    let job = service.get_scan_status(id).await.unwrap();
    assert_eq!(job.status(), ScanStatus::Pending);
    assert_eq!(job.config.keywords, vec!["pizza", "slice"]);
    // 9 points x 2 keywords x 0.002
    assert_eq!(job.estimated_cost, Decimal::new(36, 3));

    let err = service.get_heatmap(id, "pizza").await.unwrap_err();
    assert!(matches!(err, ScanError::NotReady { .. }));
    let err = service.get_heatmap(id, "pasta").await.unwrap_err();
    assert!(matches!(err, ScanError::UnknownKeyword { .. }));
}

#[tokio::test]
async fn estimate_cost_uses_configured_unit_price() {
    let (service, _) = service(1);
    assert_eq!(service.estimate_cost(49, 3), Decimal::new(294, 3));
    assert_eq!(service.estimate_cost(0, 3), Decimal::ZERO);
}

#[tokio::test]
async fn unknown_scan_is_not_found() {
    let (service, _) = service(1);
    let id = uuid::Uuid::new_v4();
    assert!(matches!(
        service.get_scan_status(id).await,
        Err(ScanError::NotFound(_))
    ));
    assert!(matches!(
        service.cancel_scan(id).await,
        Err(ScanError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn worker_runs_queued_scan_to_completion() {
    let (service, usage) = service(2);
    let workers = service.spawn_workers();
    let mut events = service.subscribe();

    let id = service.start_scan(request(&["pizza"], 2.0)).await.unwrap();

    loop {
        let event = events.recv().await.expect("event stream open");
        if event.job_id() == id && event.is_terminal() {
            assert_eq!(event, ScanEvent::Completed { job_id: id });
            break;
        }
    }

    let job = service.get_scan_status(id).await.unwrap();
    assert_eq!(job.status(), ScanStatus::Complete);
    let heatmap = service.get_heatmap(id, "pizza").await.unwrap();
    assert_eq!(heatmap.top3_count, 9);
    assert!((heatmap.visibility_score - 100.0).abs() < 1e-9);
    assert_eq!(usage.remaining(ACCOUNT).await.unwrap(), 1);

    let err = service.cancel_scan(id).await.unwrap_err();
    assert!(matches!(
        err,
        ScanError::InvalidTransition {
            from: ScanStatus::Complete,
            ..
        }
    ));

    service.shutdown().await;
    for worker in workers {
        worker.await.unwrap();
    }
    assert!(matches!(
        service.start_scan(request(&["pizza"], 2.0)).await,
        Err(ScanError::QueueClosed)
    ));
}

#[tokio::test]
async fn pending_scan_can_be_cancelled() {
    let (service, _) = service(2);
    let id = service.start_scan(request(&["pizza"], 2.0)).await.unwrap();

    service.cancel_scan(id).await.unwrap();
    let job = service.get_scan_status(id).await.unwrap();
    assert_eq!(job.status(), ScanStatus::Cancelled);

    assert!(matches!(
        service.cancel_scan(id).await,
        Err(ScanError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn reported_failure_is_terminal() {
    let (service, _) = service(2);
    let id = service.start_scan(request(&["pizza"], 2.0)).await.unwrap();

    service
        .report_failure(id, "provider account suspended")
        .await
        .unwrap();
    let job = service.get_scan_status(id).await.unwrap();
    assert_eq!(job.status(), ScanStatus::Failed);
    assert_eq!(job.error_message(), Some("provider account suspended"));

    assert!(service.report_failure(id, "again").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn failure_reported_during_a_run_is_final() {
    let (service, gate) = gated_service(Arc::new(MemoryScanStore::new()));
    let workers = service.spawn_workers();
    let mut events = service.subscribe();
    let id = service.start_scan(request(&["pizza"], 2.0)).await.unwrap();
    wait_for_started(&mut events, id).await;

    service
        .report_failure(id, "provider account suspended")
        .await
        .unwrap();
    let seen = drain(&service, &gate, workers, &mut events, id).await;

    let job = service.get_scan_status(id).await.unwrap();
    assert_eq!(job.status(), ScanStatus::Failed);
    assert_eq!(job.error_message(), Some("provider account suspended"));
    assert_eq!(
        seen,
        vec![ScanEvent::Failed {
            job_id: id,
            error: "provider account suspended".to_string(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn running_scan_can_be_cancelled() {
    let (service, gate) = gated_service(Arc::new(MemoryScanStore::new()));
    let workers = service.spawn_workers();
    let mut events = service.subscribe();
    let id = service.start_scan(request(&["pizza"], 2.0)).await.unwrap();
    wait_for_started(&mut events, id).await;

    service.cancel_scan(id).await.unwrap();
    let seen = drain(&service, &gate, workers, &mut events, id).await;

    let job = service.get_scan_status(id).await.unwrap();
    assert_eq!(job.status(), ScanStatus::Cancelled);
    let terminal: Vec<&ScanEvent> = seen.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal, vec![&ScanEvent::Cancelled { job_id: id }]);
}

async fn orphaned_job(store: &MemoryScanStore, start: bool) -> ScanJob {
    let mut job = ScanJob::create(
        ACCOUNT,
        BusinessIdentity::new("Joe's Pizza", Coordinate::new(40.7306, -74.0027)),
        ScanConfig {
            grid_size: GridSize::Three,
            radius_km: 2.0,
            keywords: vec!["pizza".to_string()],
        },
        Decimal::ZERO,
    );
    store.create_job(&job).await.unwrap();
    if start {
        job.start().unwrap();
        store.update_job(&job).await.unwrap();
    }
    job
}

#[tokio::test]
async fn scanning_job_without_a_worker_is_cancelled_in_the_store() {
    let store = Arc::new(MemoryScanStore::new());
    let orphan = orphaned_job(&store, true).await;
    let (service, _gate) = gated_service(Arc::clone(&store));
    let mut events = service.subscribe();

    service.cancel_scan(orphan.id).await.unwrap();

    let job = service.get_scan_status(orphan.id).await.unwrap();
    assert_eq!(job.status(), ScanStatus::Cancelled);
    assert_eq!(
        events.try_recv().unwrap(),
        ScanEvent::Cancelled { job_id: orphan.id }
    );
}

#[tokio::test(start_paused = true)]
async fn recover_fails_orphaned_runs_and_requeues_pending_jobs() {
    let store = Arc::new(MemoryScanStore::new());
    let interrupted = orphaned_job(&store, true).await;
    let queued = orphaned_job(&store, false).await;
    let (service, gate) = gated_service(Arc::clone(&store));
    let workers = service.spawn_workers();
    let mut events = service.subscribe();

    let recovery = service.recover().await.unwrap();
    assert_eq!(
        recovery,
        Recovery {
            requeued: 1,
            failed: 1
        }
    );

    let job = service.get_scan_status(interrupted.id).await.unwrap();
    assert_eq!(job.status(), ScanStatus::Failed);
    assert_eq!(job.error_message(), Some(INTERRUPTED_REASON));

    wait_for_started(&mut events, queued.id).await;
    gate.add_permits(1_000);
    loop {
        let event = events.recv().await.expect("event stream open");
        if event.job_id() == queued.id && event.is_terminal() {
            assert_eq!(event, ScanEvent::Completed { job_id: queued.id });
            break;
        }
    }

    // nothing is left to reconcile
    assert_eq!(service.recover().await.unwrap(), Recovery::default());
    service.shutdown().await;
    for worker in workers {
        worker.await.unwrap();
    }
}
