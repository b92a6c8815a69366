//! Storage trait definitions

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Cursor, MessageId};

/// Durable state backing duplicate prevention
///
/// Owns the cursor and the append-only set of processed message IDs. No
/// other component mutates either directly.
pub trait CursorStore: Send + Sync {
    /// Timestamp of the last successful run (epoch if never run)
    fn last_run_timestamp(&self) -> Result<DateTime<Utc>, StoreError>;

    /// Overwrite the last-run timestamp atomically
    fn set_last_run_timestamp(&self, ts: DateTime<Utc>) -> Result<(), StoreError>;

    /// Whether the message has already been recorded
    fn is_processed(&self, id: &MessageId) -> Result<bool, StoreError>;

    /// Record a message as handled; inserting a known ID is a no-op
    fn mark_processed(&self, id: &MessageId) -> Result<(), StoreError>;

    /// Number of processed message IDs
    fn processed_count(&self) -> Result<usize, StoreError>;

    /// Current cursor value
    fn cursor(&self) -> Result<Cursor, StoreError> {
        self.last_run_timestamp().map(Cursor::new)
    }
}
