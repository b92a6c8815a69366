//! Error taxonomy for a sync pass

use crate::models::MessageId;

/// A collaborator could not be reached at all
///
/// Adapters return this (wrapped in `anyhow::Error`) for transport-level
/// failures. The orchestrator looks for it in the error chain and aborts the
/// pass instead of treating the failure as a per-message problem.
#[derive(Debug, thiserror::Error)]
#[error("{service} unreachable: {reason}")]
pub struct Unreachable {
    pub service: &'static str,
    pub reason: String,
}

impl Unreachable {
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
        }
    }

    /// Whether `err` (or anything in its chain) is an `Unreachable`
    pub fn is_in(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.is::<Unreachable>())
    }
}

/// Failures of the durable cursor store
///
/// Always fatal for the current run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("state database migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("state database is corrupted: {0}")]
    Corrupt(String),

    #[error("state store lock poisoned")]
    Poisoned,
}

/// Errors surfaced by a sync pass
///
/// `Fetch` and `Append` are per-message: the orchestrator records them in the
/// report and keeps going. Every other variant aborts the pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("authentication failed: {0:#}")]
    Auth(anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to fetch message {id}: {reason}")]
    Fetch { id: MessageId, reason: String },

    #[error("failed to append message {id}: {reason}")]
    Append { id: MessageId, reason: String },

    #[error("record sink unavailable: {0:#}")]
    SinkUnavailable(anyhow::Error),

    #[error("mailbox unavailable: {0:#}")]
    MailboxUnavailable(anyhow::Error),
}

impl SyncError {
    /// Whether this error only affects a single message
    pub fn is_per_message(&self) -> bool {
        matches!(self, SyncError::Fetch { .. } | SyncError::Append { .. })
    }
}
