//! Incremental sync engine
//!
//! Each pass reads the cursor, searches the mailbox, filters duplicates,
//! appends new records to the sink, and advances the cursor only when every
//! candidate was handled. Passes can be retried safely.

mod filter;
mod memory;
mod orchestrator;
mod traits;

pub use filter::{DuplicateFilter, Layer, Verdict};
pub use memory::{MemoryMailbox, MemorySink, StaticCredentials};
pub use orchestrator::{
    DEFAULT_WINDOW_TOLERANCE_SECS, SyncOptions, SyncOrchestrator, SyncPhase, SyncReport, SyncStats,
};
pub use traits::{CredentialProvider, MailboxSource, RecordSink, Token};
