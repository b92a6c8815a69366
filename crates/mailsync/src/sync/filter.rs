//! Layered duplicate detection
//!
//! A candidate must pass three checks, cheapest first:
//!
//! 1. window: received no earlier than the cursor minus the tolerance
//! 2. identity: message ID not in the cursor store
//! 3. content: natural key not already in the sink
//!
//! The content layer is redundant with identity on purpose. It is what keeps
//! the sheet clean when the state database is lost or reset.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashSet;

use super::traits::{RecordSink, Token};
use crate::error::{SyncError, Unreachable};
use crate::models::{CandidateMessage, Cursor, MessageId, NaturalKey, NormalizedRecord};
use crate::storage::CursorStore;

/// The check that turned a candidate away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Window,
    Identity,
    Content,
}

/// Outcome of running the filter on one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Layer),
}

impl Verdict {
    pub fn is_accept(self) -> bool {
        self == Verdict::Accept
    }
}

/// Three-layer duplicate filter for a single sync pass
pub struct DuplicateFilter<'a> {
    store: &'a dyn CursorStore,
    sink: &'a dyn RecordSink,
    token: &'a Token,
    cursor: Cursor,
    tolerance: Duration,
    /// Keys whose sink status is known for this pass
    looked_up: HashSet<NaturalKey>,
    /// Subset of `looked_up` the sink already holds
    existing: HashSet<NaturalKey>,
    /// Keys appended earlier in this pass (the sink may lag behind writes)
    recorded: HashSet<NaturalKey>,
}

impl<'a> DuplicateFilter<'a> {
    pub fn new(
        store: &'a dyn CursorStore,
        sink: &'a dyn RecordSink,
        token: &'a Token,
        cursor: Cursor,
        tolerance: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            token,
            cursor,
            tolerance,
            looked_up: HashSet::new(),
            existing: HashSet::new(),
            recorded: HashSet::new(),
        }
    }

    /// Layer 1: is the receipt time inside the window?
    pub fn in_window(&self, received_at: DateTime<Utc>) -> bool {
        self.cursor.admits(received_at, self.tolerance)
    }

    /// Layer 2: has this message ID not been recorded yet?
    pub fn is_new_id(&self, id: &MessageId) -> Result<bool, SyncError> {
        Ok(!self.store.is_processed(id)?)
    }

    /// Look up a batch of natural keys in the sink with a single query
    ///
    /// Keys already looked up this pass are skipped; nothing is sent when
    /// none remain. The raw collaborator error is returned so the caller
    /// can charge it to every message in the batch.
    pub fn preload(&mut self, keys: impl IntoIterator<Item = NaturalKey>) -> anyhow::Result<()> {
        let pending: HashSet<NaturalKey> = keys
            .into_iter()
            .filter(|key| !self.looked_up.contains(key))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let found = self.sink.query_existing(self.token, &pending)?;
        debug!(
            "[FILTER] {} of {} key(s) already in sink",
            found.len(),
            pending.len()
        );
        self.existing.extend(found);
        self.looked_up.extend(pending);
        Ok(())
    }

    /// Layer 3: is the natural key absent from the sink?
    ///
    /// Served from the preloaded keys when possible, otherwise from a
    /// single-key lookup. A lookup failure is charged to the message (it is
    /// retried next run) unless the sink is unreachable, which aborts the
    /// pass.
    pub fn is_new_content(
        &mut self,
        id: &MessageId,
        record: &NormalizedRecord,
    ) -> Result<bool, SyncError> {
        let key = record.natural_key();
        if self.recorded.contains(&key) {
            return Ok(false);
        }

        if !self.looked_up.contains(&key) {
            self.preload([key.clone()])
                .map_err(|e| lookup_error(id, e))?;
        }
        Ok(!self.existing.contains(&key))
    }

    /// Content layer alone, for candidates that already passed layers 1 and 2
    pub fn check_content(
        &mut self,
        candidate: &CandidateMessage,
        record: &NormalizedRecord,
    ) -> Result<Verdict, SyncError> {
        if !self.is_new_content(&candidate.id, record)? {
            debug!(
                "[FILTER] {} duplicates existing row {}",
                candidate.id,
                record.natural_key()
            );
            return Ok(Verdict::Reject(Layer::Content));
        }
        Ok(Verdict::Accept)
    }

    /// Run all three layers, short-circuiting on the first rejection
    pub fn evaluate(
        &mut self,
        candidate: &CandidateMessage,
        record: &NormalizedRecord,
    ) -> Result<Verdict, SyncError> {
        if !self.in_window(candidate.received_at) {
            return Ok(Verdict::Reject(Layer::Window));
        }
        if !self.is_new_id(&candidate.id)? {
            return Ok(Verdict::Reject(Layer::Identity));
        }
        self.check_content(candidate, record)
    }

    /// Whether the candidate should be written to the sink
    pub fn should_record(
        &mut self,
        candidate: &CandidateMessage,
        record: &NormalizedRecord,
    ) -> Result<bool, SyncError> {
        self.evaluate(candidate, record).map(Verdict::is_accept)
    }

    /// Note a key that was just appended so later candidates in the same
    /// pass see it
    pub fn remember(&mut self, key: NaturalKey) {
        self.recorded.insert(key);
    }
}

/// Classify a failed sink lookup for one message
fn lookup_error(id: &MessageId, err: anyhow::Error) -> SyncError {
    if Unreachable::is_in(&err) {
        SyncError::SinkUnavailable(err)
    } else {
        SyncError::Append {
            id: id.clone(),
            reason: format!("duplicate lookup failed: {err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MimePart;
    use crate::normalize::{NormalizeOptions, normalize};
    use crate::storage::InMemoryCursorStore;
    use crate::sync::MemorySink;
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, h, 0, 0).unwrap()
    }

    fn candidate(id: &str, received_at: DateTime<Utc>) -> (CandidateMessage, NormalizedRecord) {
        let msg = CandidateMessage::builder(id)
            .from("Bob <bob@example.com>")
            .subject("Status")
            .body(MimePart::leaf("text/plain", "All green"))
            .received_at(received_at)
            .build();
        let record = normalize(&msg, &NormalizeOptions::default());
        (msg, record)
    }

    fn token() -> Token {
        Token::new("test", None)
    }

    #[test]
    fn test_accepts_new_message() {
        let store = InMemoryCursorStore::with_last_run(at(10, 0));
        let sink = MemorySink::new();
        let token = token();
        let mut filter = DuplicateFilter::new(
            &store,
            &sink,
            &token,
            store.cursor().unwrap(),
            Duration::minutes(5),
        );

        let (msg, record) = candidate("m1", at(11, 0));
        assert_eq!(filter.evaluate(&msg, &record).unwrap(), Verdict::Accept);
        assert!(filter.should_record(&msg, &record).unwrap());
    }

    #[test]
    fn test_window_layer_rejects_old_message() {
        let store = InMemoryCursorStore::with_last_run(at(10, 0));
        let sink = MemorySink::new();
        let token = token();
        let mut filter = DuplicateFilter::new(
            &store,
            &sink,
            &token,
            store.cursor().unwrap(),
            Duration::minutes(5),
        );

        let (msg, record) = candidate("m1", at(9, 12));
        assert_eq!(
            filter.evaluate(&msg, &record).unwrap(),
            Verdict::Reject(Layer::Window)
        );
        assert_eq!(sink.query_count(), 0);
    }

    #[test]
    fn test_identity_layer_rejects_processed_id() {
        let store = InMemoryCursorStore::new();
        store.mark_processed(&MessageId::new("m1")).unwrap();
        let sink = MemorySink::new();
        let token = token();
        let mut filter =
            DuplicateFilter::new(&store, &sink, &token, Cursor::epoch(), Duration::zero());

        let (msg, record) = candidate("m1", at(11, 0));
        assert_eq!(
            filter.evaluate(&msg, &record).unwrap(),
            Verdict::Reject(Layer::Identity)
        );
        // Identity short-circuits before the sink is consulted
        assert_eq!(sink.query_count(), 0);
    }

    #[test]
    fn test_content_layer_alone_rejects_duplicate() {
        // Store lost its processed set, but the sheet still has the row
        let store = InMemoryCursorStore::new();
        let sink = MemorySink::new();
        let (msg, record) = candidate("m1", at(11, 0));
        sink.seed(vec![record.clone()]);
        let token = token();
        let mut filter =
            DuplicateFilter::new(&store, &sink, &token, Cursor::epoch(), Duration::zero());

        assert_eq!(
            filter.evaluate(&msg, &record).unwrap(),
            Verdict::Reject(Layer::Content)
        );
    }

    #[test]
    fn test_remembered_key_rejects_without_sink_lookup() {
        let store = InMemoryCursorStore::new();
        let sink = MemorySink::new();
        let token = token();
        let mut filter =
            DuplicateFilter::new(&store, &sink, &token, Cursor::epoch(), Duration::zero());

        let (_, first) = candidate("m1", at(11, 0));
        filter.remember(first.natural_key());

        let (msg, record) = candidate("m2", at(11, 0));
        assert_eq!(
            filter.evaluate(&msg, &record).unwrap(),
            Verdict::Reject(Layer::Content)
        );
        assert_eq!(sink.query_count(), 0);
    }

    #[test]
    fn test_unreachable_sink_escalates() {
        let store = InMemoryCursorStore::new();
        let sink = MemorySink::new();
        sink.set_unreachable(true);
        let token = token();
        let mut filter =
            DuplicateFilter::new(&store, &sink, &token, Cursor::epoch(), Duration::zero());

        let (msg, record) = candidate("m1", at(11, 0));
        let err = filter.evaluate(&msg, &record).unwrap_err();
        assert!(matches!(err, SyncError::SinkUnavailable(_)));
    }

    #[test]
    fn test_failed_lookup_is_per_message() {
        let store = InMemoryCursorStore::new();
        let sink = MemorySink::new();
        sink.fail_queries(true);
        let token = token();
        let mut filter =
            DuplicateFilter::new(&store, &sink, &token, Cursor::epoch(), Duration::zero());

        let (msg, record) = candidate("m1", at(11, 0));
        let err = filter.evaluate(&msg, &record).unwrap_err();
        assert!(err.is_per_message());
    }

    #[test]
    fn test_preload_answers_content_checks_with_one_query() {
        let store = InMemoryCursorStore::new();
        let sink = MemorySink::new();
        let (_, seen) = candidate("m0", at(11, 0));
        sink.seed(vec![seen.clone()]);
        let token = token();
        let mut filter =
            DuplicateFilter::new(&store, &sink, &token, Cursor::epoch(), Duration::zero());

        let batch: Vec<_> = (1..=4)
            .map(|h| candidate(&format!("m{}", h), at(11, h)))
            .collect();
        let keys = batch
            .iter()
            .map(|(_, record)| record.natural_key())
            .chain([seen.natural_key()]);
        filter.preload(keys).unwrap();

        for (msg, record) in &batch {
            assert!(filter.check_content(msg, record).unwrap().is_accept());
        }
        let (dup, dup_record) = candidate("m9", at(11, 0));
        assert_eq!(
            filter.check_content(&dup, &dup_record).unwrap(),
            Verdict::Reject(Layer::Content)
        );
        assert_eq!(sink.query_count(), 1);

        // Already-known keys never trigger another lookup
        filter.preload([seen.natural_key()]).unwrap();
        assert_eq!(sink.query_count(), 1);
    }

    #[test]
    fn test_check_content_skips_identity_lookup() {
        // An ID the store knows is not consulted by the content-only check
        let store = InMemoryCursorStore::new();
        store.mark_processed(&MessageId::new("m1")).unwrap();
        let sink = MemorySink::new();
        let token = token();
        let mut filter =
            DuplicateFilter::new(&store, &sink, &token, Cursor::epoch(), Duration::zero());

        let (msg, record) = candidate("m1", at(11, 0));
        assert!(filter.check_content(&msg, &record).unwrap().is_accept());
    }
}
