//! Server-sent event stream of one scan's progress.

use std::{convert::Infallible, future::Future, time::Duration};

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    Extension,
};
use futures::stream::{self, BoxStream, StreamExt};
use gridrank_core::ScanStatus;
use gridrank_scan::{ScanEvent, ScanJob};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_scan_error, ApiError, AppState};

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Streams events for `scan_id` until its terminal event or server
/// shutdown. A scan that has already finished yields that terminal event
/// alone.
pub(super) async fn scan_events(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(scan_id): Path<Uuid>,
) -> Result<Sse<KeepAliveStream<EventStream>>, ApiError> {
    // Subscribe before reading the status so no transition is missed.
    let receiver = state.scans.subscribe();
    let job = state
        .scans
        .get_scan_status(scan_id)
        .await
        .map_err(|e| map_scan_error(req_id.0, &e))?;

    let stream: EventStream = match terminal_event(&job) {
        Some(event) => stream::iter(to_sse(&event).map(Ok)).boxed(),
        None => {
            let scans = state.scans.clone();
            let recheck = move || {
                let scans = scans.clone();
                async move {
                    scans
                        .get_scan_status(scan_id)
                        .await
                        .ok()
                        .as_ref()
                        .and_then(terminal_event)
                }
            };
            live_events(BroadcastStream::new(receiver), scan_id, recheck)
                .take_until(state.scans.shutdown_token().cancelled_owned())
                .boxed()
        }
    };

    Ok(Sse::new(stream).keep_alive(default_keep_alive()))
}

/// Forwards `scan_id`'s events until its terminal one. After a lag the job is
/// re-read through `recheck` and its terminal event is sent if it finished.
fn live_events<F, Fut>(
    receiver: BroadcastStream<ScanEvent>,
    scan_id: Uuid,
    recheck: F,
) -> impl futures::Stream<Item = Result<Event, Infallible>> + Send + 'static
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Option<ScanEvent>> + Send + 'static,
{
    stream::unfold(Some((receiver, recheck)), move |state| async move {
        let (mut receiver, recheck) = state?;
        loop {
            let event = match receiver.next().await? {
                Ok(event) if event.job_id() == scan_id => event,
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(%scan_id, error = %err, "scan event stream lagged");
                    match recheck().await {
                        Some(event) => event,
                        None => continue,
                    }
                }
            };
            let next = if event.is_terminal() {
                None
            } else {
                Some((receiver, recheck))
            };
            let sse = to_sse(&event).unwrap_or_else(|| Event::default().comment("skipped"));
            return Some((Ok(sse), next));
        }
    })
}

fn terminal_event(job: &ScanJob) -> Option<ScanEvent> {
    let job_id = job.id;
    match job.status() {
        ScanStatus::Complete => Some(ScanEvent::Completed { job_id }),
        ScanStatus::Cancelled => Some(ScanEvent::Cancelled { job_id }),
        ScanStatus::Failed => Some(ScanEvent::Failed {
            job_id,
            error: job.error_message().unwrap_or_default().to_string(),
        }),
        ScanStatus::Pending | ScanStatus::Scanning => None,
    }
}

fn to_sse(event: &ScanEvent) -> Option<Event> {
    match Event::default().event(event.name()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode scan event");
            None
        }
    }
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}
