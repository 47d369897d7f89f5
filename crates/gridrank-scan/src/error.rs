use gridrank_core::{ConfigError, ScanStatus};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Rejected at scan start; nothing was created.
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),

    #[error("account '{account_id}' has insufficient scan allowance ({remaining} remaining)")]
    InsufficientAllowance { account_id: String, remaining: i64 },

    #[error("scan {0} not found")]
    NotFound(Uuid),

    #[error("keyword '{keyword}' is not part of scan {job_id}")]
    UnknownKeyword { job_id: Uuid, keyword: String },

    #[error("heatmap for keyword '{keyword}' of scan {job_id} is not ready")]
    NotReady { job_id: Uuid, keyword: String },

    #[error("invalid scan transition: {from} -> {to}")]
    InvalidTransition { from: ScanStatus, to: ScanStatus },

    #[error("scan {0} was cancelled")]
    Cancelled(Uuid),

    /// The stored job reached a terminal status through another caller
    /// while this run was still working on it.
    #[error("scan {job_id} was already finalized as {status}")]
    Superseded { job_id: Uuid, status: ScanStatus },

    /// Persistence backend failure.
    #[error("scan store error: {0}")]
    Store(String),

    #[error("usage ledger error: {0}")]
    Usage(String),

    #[error("scan queue is closed")]
    QueueClosed,
}

impl From<ConfigError> for ScanError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation(message) => ScanError::InvalidConfig(message),
            other => ScanError::InvalidConfig(other.to_string()),
        }
    }
}
