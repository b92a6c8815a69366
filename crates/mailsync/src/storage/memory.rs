//! In-memory cursor store
//!
//! Used by tests and dry runs. Nothing survives the process.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::CursorStore;
use crate::error::StoreError;
use crate::models::MessageId;

/// In-memory implementation of CursorStore
pub struct InMemoryCursorStore {
    last_run: RwLock<Option<DateTime<Utc>>>,
    /// message ID -> processed_at
    processed: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryCursorStore {
    /// Create a new empty store (cursor at epoch)
    pub fn new() -> Self {
        Self {
            last_run: RwLock::new(None),
            processed: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store whose cursor starts at `ts`
    pub fn with_last_run(ts: DateTime<Utc>) -> Self {
        Self {
            last_run: RwLock::new(Some(ts)),
            processed: RwLock::new(HashMap::new()),
        }
    }

    /// Drop every processed ID, simulating loss of the state database
    pub fn forget_processed(&self) -> Result<(), StoreError> {
        self.processed
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .clear();
        Ok(())
    }
}

impl Default for InMemoryCursorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorStore for InMemoryCursorStore {
    fn last_run_timestamp(&self) -> Result<DateTime<Utc>, StoreError> {
        let last_run = self.last_run.read().map_err(|_| StoreError::Poisoned)?;
        Ok(last_run.unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    }

    fn set_last_run_timestamp(&self, ts: DateTime<Utc>) -> Result<(), StoreError> {
        *self.last_run.write().map_err(|_| StoreError::Poisoned)? = Some(ts);
        Ok(())
    }

    fn is_processed(&self, id: &MessageId) -> Result<bool, StoreError> {
        let processed = self.processed.read().map_err(|_| StoreError::Poisoned)?;
        Ok(processed.contains_key(id.as_str()))
    }

    fn mark_processed(&self, id: &MessageId) -> Result<(), StoreError> {
        let mut processed = self.processed.write().map_err(|_| StoreError::Poisoned)?;
        processed.entry(id.0.clone()).or_insert_with(Utc::now);
        Ok(())
    }

    fn processed_count(&self) -> Result<usize, StoreError> {
        let processed = self.processed.read().map_err(|_| StoreError::Poisoned)?;
        Ok(processed.len())
    }
}
