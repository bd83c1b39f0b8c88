//! Error types for the presence core.

use crate::storage::StorageError;

/// Top-level error type for the lifecycle controller and scheduler.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Persistence port failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Rejected input (past-dated reminder, bad cron expression, zero interval).
    #[error("invalid request: {0}")]
    Validation(String),

    /// A persisted job record whose schedule or payload blob cannot be decoded.
    #[error("corrupt job record {id}: {reason}")]
    CorruptJob {
        /// Id of the offending record.
        id: String,
        /// Decode failure description.
        reason: String,
    },

    /// Scheduler error (unknown job, bookkeeping failure).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Mailbox send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PresenceError>;
