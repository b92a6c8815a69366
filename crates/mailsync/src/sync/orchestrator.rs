//! One sync pass: window → search → fetch → content lookup → record → commit
//!
//! The sink is asked about every fetched candidate in a single lookup, so a
//! pass costs one sheet read no matter how many messages it carries.
//!
//! The pass is at-least-once towards the sink and at-most-once per message
//! ID: a message is marked processed only after its row was appended, and
//! the cursor only moves when every candidate in the window was handled.

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use std::time::Instant;

use super::filter::{DuplicateFilter, Layer, Verdict};
use super::traits::{CredentialProvider, MailboxSource, RecordSink, Token};
use crate::error::{SyncError, Unreachable};
use crate::models::{CandidateMessage, Cursor, MessageRef, NormalizedRecord};
use crate::normalize::{NormalizeOptions, normalize};
use crate::storage::CursorStore;

/// Default backwards tolerance applied to the window start
pub const DEFAULT_WINDOW_TOLERANCE_SECS: i64 = 300;

/// Options controlling a sync pass
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How far before the cursor a message may be received and still count
    pub window_tolerance: Duration,
    pub normalize: NormalizeOptions,
    /// Clear the unread flag after a message is recorded
    pub mark_read: bool,
    /// Evaluate everything but write nothing (sink, store, or mailbox)
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            window_tolerance: Duration::seconds(DEFAULT_WINDOW_TOLERANCE_SECS),
            normalize: NormalizeOptions::default(),
            mark_read: true,
            dry_run: false,
        }
    }
}

/// States of a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    WindowComputed,
    Fetching,
    PerMessageLoop,
    Committing,
    Failed,
}

/// Counters from a sync pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// References returned by the mailbox search
    pub candidates: usize,
    /// Rejected by the window layer
    pub outside_window: usize,
    /// Rejected by the identity layer
    pub already_processed: usize,
    /// Rejected by the content layer
    pub duplicate_content: usize,
    /// Rows appended (or that would have been, in a dry run)
    pub recorded: usize,
    pub fetch_failures: usize,
    pub append_failures: usize,
    pub mark_read_failures: usize,
    pub duration_ms: u64,
}

/// Result of a pass that ran to completion
#[derive(Debug)]
pub struct SyncReport {
    pub stats: SyncStats,
    /// Per-message failures (`SyncError::Fetch` / `SyncError::Append`)
    pub failures: Vec<SyncError>,
    pub cursor_before: Cursor,
    pub cursor_after: Cursor,
    /// Exclusive end of the queried window
    pub window_end: DateTime<Utc>,
    pub phase: SyncPhase,
}

impl SyncReport {
    pub fn cursor_advanced(&self) -> bool {
        self.cursor_after != self.cursor_before
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives sync passes against explicit collaborators
pub struct SyncOrchestrator<'a> {
    credentials: &'a dyn CredentialProvider,
    mailbox: &'a dyn MailboxSource,
    sink: &'a dyn RecordSink,
    store: &'a dyn CursorStore,
    options: SyncOptions,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        credentials: &'a dyn CredentialProvider,
        mailbox: &'a dyn MailboxSource,
        sink: &'a dyn RecordSink,
        store: &'a dyn CursorStore,
        options: SyncOptions,
    ) -> Self {
        Self {
            credentials,
            mailbox,
            sink,
            store,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run one pass with the window ending now
    pub fn run(&self) -> Result<SyncReport, SyncError> {
        self.run_at(Utc::now())
    }

    /// Run one pass with the window ending at `now`
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let mut pass = Pass::new(now);

        match self.execute(&mut pass) {
            Ok(()) => {
                pass.enter(SyncPhase::Idle);
                pass.stats.duration_ms = pass.started.elapsed().as_millis() as u64;
                info!(
                    "[SYNC] Pass finished: {} recorded, {} failed, cursor {}",
                    pass.stats.recorded,
                    pass.failures.len(),
                    if pass.cursor_after != pass.cursor_before {
                        "advanced"
                    } else {
                        "held"
                    }
                );
                Ok(pass.into_report())
            }
            Err(e) => {
                pass.enter(SyncPhase::Failed);
                error!("[SYNC] Pass aborted, cursor untouched: {}", e);
                Err(e)
            }
        }
    }

    fn execute(&self, pass: &mut Pass) -> Result<(), SyncError> {
        let token = self
            .credentials
            .get_valid_token()
            .map_err(SyncError::Auth)?;

        let cursor = self.store.cursor()?;
        pass.cursor_before = cursor;
        pass.cursor_after = cursor;
        pass.enter(SyncPhase::WindowComputed);
        info!(
            "[SYNC] Window [{}, {})",
            cursor.last_run.to_rfc3339(),
            pass.now.to_rfc3339()
        );

        pass.enter(SyncPhase::Fetching);
        let refs = self.search(&token, cursor)?;
        pass.stats.candidates = refs.len();
        info!("[SYNC] {} candidate(s) in window", refs.len());

        pass.enter(SyncPhase::PerMessageLoop);
        let mut filter = DuplicateFilter::new(
            self.store,
            self.sink,
            &token,
            cursor,
            self.options.window_tolerance,
        );

        let mut fetched = Vec::with_capacity(refs.len());
        for msg_ref in &refs {
            if let Some(candidate) = self.fetch_one(pass, &filter, &token, msg_ref)? {
                let record = normalize(&candidate, &self.options.normalize);
                fetched.push((candidate, record));
            }
        }

        if self.lookup_existing(pass, &mut filter, &fetched)? {
            for (candidate, record) in &fetched {
                self.record_one(pass, &mut filter, &token, candidate, record)?;
            }
        }

        pass.enter(SyncPhase::Committing);
        self.commit(pass, cursor)
    }

    /// Search the mailbox and order the results oldest first
    fn search(&self, token: &Token, cursor: Cursor) -> Result<Vec<MessageRef>, SyncError> {
        let after = cursor.window_start(self.options.window_tolerance);
        debug!("[SYNC] Searching mailbox from {}", after.to_rfc3339());

        let mut refs = self
            .mailbox
            .search(token, after)
            .map_err(SyncError::MailboxUnavailable)?;

        refs.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        refs.dedup_by(|a, b| a.id == b.id);
        Ok(refs)
    }

    /// Run the window and identity layers, then fetch the body
    ///
    /// Returns `None` when the message was rejected or its fetch failed; both
    /// are recorded on `pass`. Anything returned as `Err` aborts the pass.
    fn fetch_one(
        &self,
        pass: &mut Pass,
        filter: &DuplicateFilter<'_>,
        token: &Token,
        msg_ref: &MessageRef,
    ) -> Result<Option<CandidateMessage>, SyncError> {
        // Cheap layers first so rejected messages are never fetched
        if !filter.in_window(msg_ref.received_at) {
            debug!("[SYNC] {} outside window", msg_ref.id);
            pass.stats.outside_window += 1;
            return Ok(None);
        }
        if !filter.is_new_id(&msg_ref.id)? {
            debug!("[SYNC] {} already processed", msg_ref.id);
            pass.stats.already_processed += 1;
            return Ok(None);
        }

        match self.mailbox.fetch_body(token, &msg_ref.id) {
            Ok(candidate) => Ok(Some(candidate)),
            Err(e) if Unreachable::is_in(&e) => Err(SyncError::MailboxUnavailable(e)),
            Err(e) => {
                pass.record_failure(SyncError::Fetch {
                    id: msg_ref.id.clone(),
                    reason: format!("{e:#}"),
                });
                Ok(None)
            }
        }
    }

    /// Ask the sink about every fetched candidate at once
    ///
    /// On an ordinary lookup failure each candidate is charged an append
    /// failure and `false` is returned, so nothing is written and the cursor
    /// holds. An unreachable sink aborts the pass.
    fn lookup_existing(
        &self,
        pass: &mut Pass,
        filter: &mut DuplicateFilter<'_>,
        fetched: &[(CandidateMessage, NormalizedRecord)],
    ) -> Result<bool, SyncError> {
        let keys = fetched.iter().map(|(_, record)| record.natural_key());
        match filter.preload(keys) {
            Ok(()) => Ok(true),
            Err(e) if Unreachable::is_in(&e) => Err(SyncError::SinkUnavailable(e)),
            Err(e) => {
                let reason = format!("duplicate lookup failed: {e:#}");
                for (candidate, _) in fetched {
                    pass.record_failure(SyncError::Append {
                        id: candidate.id.clone(),
                        reason: reason.clone(),
                    });
                }
                Ok(false)
            }
        }
    }

    /// Content check, append, then bookkeeping for one fetched candidate
    ///
    /// Per-message failures are recorded on `pass` and swallowed. Anything
    /// returned as `Err` aborts the pass.
    fn record_one(
        &self,
        pass: &mut Pass,
        filter: &mut DuplicateFilter<'_>,
        token: &Token,
        candidate: &CandidateMessage,
        record: &NormalizedRecord,
    ) -> Result<(), SyncError> {
        match filter.check_content(candidate, record) {
            Ok(Verdict::Accept) => {}
            Ok(Verdict::Reject(layer)) => {
                pass.count_rejection(layer);
                return Ok(());
            }
            Err(e) if e.is_per_message() => {
                pass.record_failure(e);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if self.options.dry_run {
            info!("[SYNC] (dry run) would record {}", record.natural_key());
            filter.remember(record.natural_key());
            pass.stats.recorded += 1;
            return Ok(());
        }

        match self.sink.append_rows(token, std::slice::from_ref(record)) {
            Ok(()) => {}
            Err(e) if Unreachable::is_in(&e) => return Err(SyncError::SinkUnavailable(e)),
            Err(e) => {
                pass.record_failure(SyncError::Append {
                    id: candidate.id.clone(),
                    reason: format!("{e:#}"),
                });
                return Ok(());
            }
        }

        filter.remember(record.natural_key());
        self.store.mark_processed(&candidate.id)?;
        pass.stats.recorded += 1;
        log_recorded(&candidate.id.0, record);

        if self.options.mark_read {
            match self.mailbox.mark_read(token, &candidate.id) {
                Ok(()) => {}
                Err(e) if Unreachable::is_in(&e) => {
                    return Err(SyncError::MailboxUnavailable(e));
                }
                Err(e) => {
                    warn!("[SYNC] Failed to mark {} read: {:#}", candidate.id, e);
                    pass.stats.mark_read_failures += 1;
                }
            }
        }

        Ok(())
    }

    /// Move the cursor to the end of the window, if the pass was clean
    fn commit(&self, pass: &mut Pass, cursor: Cursor) -> Result<(), SyncError> {
        if self.options.dry_run {
            debug!("[SYNC] Dry run: cursor left at {}", cursor.last_run.to_rfc3339());
            return Ok(());
        }

        if !pass.failures.is_empty() {
            warn!(
                "[SYNC] {} message(s) failed; holding cursor at {} so they are retried",
                pass.failures.len(),
                cursor.last_run.to_rfc3339()
            );
            return Ok(());
        }

        let next = cursor.advanced(pass.now);
        self.store.set_last_run_timestamp(next.last_run)?;
        pass.cursor_after = next;
        Ok(())
    }
}

fn log_recorded(id: &str, record: &NormalizedRecord) {
    info!(
        "[SYNC] Recorded {} from {} ({:?})",
        id, record.sender, record.subject
    );
}

/// Mutable bookkeeping for a pass in flight
struct Pass {
    now: DateTime<Utc>,
    started: Instant,
    phase: SyncPhase,
    stats: SyncStats,
    failures: Vec<SyncError>,
    cursor_before: Cursor,
    cursor_after: Cursor,
}

impl Pass {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            started: Instant::now(),
            phase: SyncPhase::Idle,
            stats: SyncStats::default(),
            failures: Vec::new(),
            cursor_before: Cursor::epoch(),
            cursor_after: Cursor::epoch(),
        }
    }

    fn enter(&mut self, next: SyncPhase) {
        debug!("[SYNC] {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn count_rejection(&mut self, layer: Layer) {
        match layer {
            Layer::Window => self.stats.outside_window += 1,
            Layer::Identity => self.stats.already_processed += 1,
            Layer::Content => self.stats.duplicate_content += 1,
        }
    }

    fn record_failure(&mut self, err: SyncError) {
        warn!("[SYNC] {}", err);
        match err {
            SyncError::Fetch { .. } => self.stats.fetch_failures += 1,
            _ => self.stats.append_failures += 1,
        }
        self.failures.push(err);
    }

    fn into_report(self) -> SyncReport {
        SyncReport {
            stats: self.stats,
            failures: self.failures,
            cursor_before: self.cursor_before,
            cursor_after: self.cursor_after,
            window_end: self.now,
            phase: self.phase,
        }
    }
}
