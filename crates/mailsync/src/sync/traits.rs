//! Collaborator interfaces consumed by the sync engine
//!
//! Each collaborator receives the [`Token`] explicitly; nothing caches
//! credentials behind the engine's back.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::{CandidateMessage, MessageId, MessageRef, NaturalKey, NormalizedRecord};

/// OAuth access token handed out by a [`CredentialProvider`]
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Value for an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of valid access tokens
pub trait CredentialProvider {
    /// Return a token that is valid now, refreshing or re-authenticating
    /// as needed
    fn get_valid_token(&self) -> Result<Token>;
}

/// Mailbox the engine polls
///
/// Implementations report transport failures as
/// [`Unreachable`](crate::error::Unreachable).
pub trait MailboxSource {
    /// Candidate messages received on or after `after` (provider precision)
    fn search(&self, token: &Token, after: DateTime<Utc>) -> Result<Vec<MessageRef>>;

    /// Fetch the full message
    fn fetch_body(&self, token: &Token, id: &MessageId) -> Result<CandidateMessage>;

    /// Flag the message as read in the mailbox
    fn mark_read(&self, token: &Token, id: &MessageId) -> Result<()>;
}

/// Destination of normalized records
///
/// Implementations report transport failures as
/// [`Unreachable`](crate::error::Unreachable).
pub trait RecordSink {
    /// Subset of `keys` already present in the sink
    fn query_existing(&self, token: &Token, keys: &HashSet<NaturalKey>)
    -> Result<HashSet<NaturalKey>>;

    /// Append rows in order
    fn append_rows(&self, token: &Token, rows: &[NormalizedRecord]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_debug_redacts_secret() {
        let token = Token::new("ya29.super-secret", None);
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
        assert_eq!(token.bearer(), "Bearer ya29.super-secret");
    }
}
