//! Scan progress events, fanned out over a broadcast channel.

use gridrank_core::ScanProgress;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Queued {
        job_id: Uuid,
    },
    Started {
        job_id: Uuid,
        total_keywords: u32,
    },
    Progress {
        job_id: Uuid,
        progress: ScanProgress,
    },
    KeywordCompleted {
        job_id: Uuid,
        keyword: String,
        visibility_score: f64,
    },
    Completed {
        job_id: Uuid,
    },
    Failed {
        job_id: Uuid,
        error: String,
    },
    Cancelled {
        job_id: Uuid,
    },
}

impl ScanEvent {
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        match self {
            ScanEvent::Queued { job_id }
            | ScanEvent::Started { job_id, .. }
            | ScanEvent::Progress { job_id, .. }
            | ScanEvent::KeywordCompleted { job_id, .. }
            | ScanEvent::Completed { job_id }
            | ScanEvent::Failed { job_id, .. }
            | ScanEvent::Cancelled { job_id } => *job_id,
        }
    }

    /// Wire name, matching the serde tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ScanEvent::Queued { .. } => "queued",
            ScanEvent::Started { .. } => "started",
            ScanEvent::Progress { .. } => "progress",
            ScanEvent::KeywordCompleted { .. } => "keyword_completed",
            ScanEvent::Completed { .. } => "completed",
            ScanEvent::Failed { .. } => "failed",
            ScanEvent::Cancelled { .. } => "cancelled",
        }
    }

    /// `true` for the last event a job emits.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Completed { .. } | ScanEvent::Failed { .. } | ScanEvent::Cancelled { .. }
        )
    }
}

/// Publisher half of the progress channel. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct ScanEvents {
    sender: broadcast::Sender<ScanEvent>,
}

impl Default for ScanEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanEvents {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishes to current subscribers; dropped silently when there are none.
    pub fn publish(&self, event: ScanEvent) {
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }
}
