//! Mailsync - incremental mailbox to spreadsheet sync
//!
//! This crate provides:
//! - Domain models (candidate messages, normalized records, the cursor)
//! - A pure message normalizer
//! - Durable cursor store abstractions (SQLite and in-memory)
//! - A three-layer duplicate filter and the sync orchestrator
//! - Gmail and Google Sheets adapters with OAuth authentication
//!
//! The engine only talks to its collaborators through the traits in
//! [`sync`], so every part of a pass can be driven without network access.

pub mod config;
pub mod error;
pub mod google;
pub mod models;
pub mod normalize;
pub mod storage;
pub mod sync;

pub use crate::config::{GoogleCredentials, SyncConfig};
pub use error::{StoreError, SyncError, Unreachable};
pub use google::{GmailClient, GoogleAuth, SearchFilter, SheetsClient};
pub use models::{
    CandidateMessage, Cursor, EmailAddress, MessageId, MessageRef, MimePart, NaturalKey,
    NormalizedRecord, SHEET_HEADERS,
};
pub use normalize::{NormalizeOptions, normalize};
pub use storage::{CursorStore, InMemoryCursorStore, SqliteCursorStore};
pub use sync::{
    CredentialProvider, DuplicateFilter, MailboxSource, MemoryMailbox, MemorySink, RecordSink,
    StaticCredentials, SyncOptions, SyncOrchestrator, SyncPhase, SyncReport, SyncStats, Token,
};
