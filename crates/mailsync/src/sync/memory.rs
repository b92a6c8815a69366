//! In-memory collaborators
//!
//! A scriptable mailbox and sink for exercising the sync engine without
//! network access. Failures can be injected per message or globally.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use super::traits::{CredentialProvider, MailboxSource, RecordSink, Token};
use crate::error::Unreachable;
use crate::models::{CandidateMessage, MessageId, MessageRef, NaturalKey, NormalizedRecord};

/// Credential provider that always hands out the same token
pub struct StaticCredentials {
    token: Option<Token>,
}

impl StaticCredentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            token: Some(Token::new(access_token, None)),
        }
    }

    /// A provider whose refresh and re-auth both fail
    pub fn failing() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn get_valid_token(&self) -> Result<Token> {
        self.token
            .clone()
            .ok_or_else(|| anyhow!("refresh and re-authentication both failed"))
    }
}

/// Mailbox backed by a vector of messages
///
/// `search` mimics Gmail's date-granular `after:` filter: anything received
/// on or after the calendar day of `after` is returned, unless the filter is
/// switched off with [`MemoryMailbox::ignore_dates`].
#[derive(Default)]
pub struct MemoryMailbox {
    messages: RefCell<Vec<CandidateMessage>>,
    read: RefCell<HashSet<MessageId>>,
    fetched: RefCell<Vec<MessageId>>,
    failing_fetches: RefCell<HashSet<MessageId>>,
    unreachable: Cell<bool>,
    ignore_dates: Cell<bool>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, message: CandidateMessage) {
        self.messages.borrow_mut().push(message);
    }

    /// Make `fetch_body` fail for this message
    pub fn fail_fetch(&self, id: &MessageId) {
        self.failing_fetches.borrow_mut().insert(id.clone());
    }

    pub fn clear_failures(&self) {
        self.failing_fetches.borrow_mut().clear();
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.set(unreachable);
    }

    /// Return every delivered message from `search`, like a provider that
    /// over-reports around the window boundary
    pub fn ignore_dates(&self) {
        self.ignore_dates.set(true);
    }

    /// IDs passed to `fetch_body`, in call order
    pub fn fetched(&self) -> Vec<MessageId> {
        self.fetched.borrow().clone()
    }

    pub fn is_read(&self, id: &MessageId) -> bool {
        self.read.borrow().contains(id)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.get() {
            return Err(Unreachable::new("mailbox", "connection refused").into());
        }
        Ok(())
    }
}

impl MailboxSource for MemoryMailbox {
    fn search(&self, _token: &Token, after: DateTime<Utc>) -> Result<Vec<MessageRef>> {
        self.check_reachable()?;
        let after_day = after.date_naive();

        Ok(self
            .messages
            .borrow()
            .iter()
            .filter(|m| self.ignore_dates.get() || m.received_at.date_naive() >= after_day)
            .map(|m| MessageRef::new(m.id.clone(), m.received_at))
            .collect())
    }

    fn fetch_body(&self, _token: &Token, id: &MessageId) -> Result<CandidateMessage> {
        self.check_reachable()?;
        self.fetched.borrow_mut().push(id.clone());

        if self.failing_fetches.borrow().contains(id) {
            return Err(anyhow!("HTTP 500 fetching {}", id));
        }

        self.messages
            .borrow()
            .iter()
            .find(|m| &m.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("message {} not found", id))
    }

    fn mark_read(&self, _token: &Token, id: &MessageId) -> Result<()> {
        self.check_reachable()?;
        self.read.borrow_mut().insert(id.clone());
        Ok(())
    }
}

/// Sink backed by a vector of rows
#[derive(Default)]
pub struct MemorySink {
    rows: RefCell<Vec<NormalizedRecord>>,
    failing_subjects: RefCell<HashSet<String>>,
    fail_queries: Cell<bool>,
    unreachable: Cell<bool>,
    queries: Cell<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate rows without going through `append_rows`
    pub fn seed(&self, rows: Vec<NormalizedRecord>) {
        self.rows.borrow_mut().extend(rows);
    }

    pub fn rows(&self) -> Vec<NormalizedRecord> {
        self.rows.borrow().clone()
    }

    /// Make `append_rows` fail for records with this subject
    pub fn fail_append_for_subject(&self, subject: impl Into<String>) {
        self.failing_subjects.borrow_mut().insert(subject.into());
    }

    pub fn clear_failures(&self) {
        self.failing_subjects.borrow_mut().clear();
        self.fail_queries.set(false);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.set(fail);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.set(unreachable);
    }

    /// Number of `query_existing` calls served
    pub fn query_count(&self) -> usize {
        self.queries.get()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.get() {
            return Err(Unreachable::new("sheets", "connection refused").into());
        }
        Ok(())
    }
}

impl RecordSink for MemorySink {
    fn query_existing(
        &self,
        _token: &Token,
        keys: &HashSet<NaturalKey>,
    ) -> Result<HashSet<NaturalKey>> {
        self.check_reachable()?;
        self.queries.set(self.queries.get() + 1);

        if self.fail_queries.get() {
            return Err(anyhow!("HTTP 429 reading existing rows"));
        }

        Ok(self
            .rows
            .borrow()
            .iter()
            .map(NormalizedRecord::natural_key)
            .filter(|key| keys.contains(key))
            .collect())
    }

    fn append_rows(&self, _token: &Token, rows: &[NormalizedRecord]) -> Result<()> {
        self.check_reachable()?;

        let failing = self.failing_subjects.borrow();
        if let Some(bad) = rows.iter().find(|r| failing.contains(&r.subject)) {
            return Err(anyhow!("HTTP 400 appending {:?}", bad.subject));
        }

        self.rows.borrow_mut().extend_from_slice(rows);
        Ok(())
    }
}
