//! Messages as they come out of the mailbox, before normalization

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Parse a header value like "John Doe <john@example.com>"
    ///
    /// Anything without angle brackets is taken verbatim (trimmed), so a
    /// malformed header still yields a stable sender value.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }
}

/// A message reference returned by a mailbox search
///
/// Carries the receipt time so the window check can run before the
/// (expensive) body fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: MessageId,
    pub received_at: DateTime<Utc>,
}

impl MessageRef {
    pub fn new(id: impl Into<MessageId>, received_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            received_at,
        }
    }
}

/// Email header (name-value pair)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// One node of a MIME tree with its body already transfer-decoded
///
/// `data` is `None` when the part has no body or the body could not be
/// decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimePart {
    pub mime_type: String,
    pub data: Option<String>,
    pub parts: Vec<MimePart>,
}

impl MimePart {
    pub fn leaf(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: Some(data.into()),
            parts: Vec::new(),
        }
    }

    pub fn multipart(mime_type: impl Into<String>, parts: Vec<MimePart>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: None,
            parts,
        }
    }

    /// Whether the part's MIME type starts with `prefix` (case-insensitive)
    pub fn is_type(&self, prefix: &str) -> bool {
        self.mime_type
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }

    /// Depth-first search for the first decodable part of the given type
    pub fn find(&self, prefix: &str) -> Option<&str> {
        if self.is_type(prefix)
            && let Some(data) = &self.data
        {
            return Some(data);
        }

        self.parts.iter().find_map(|part| part.find(prefix))
    }
}

/// A fully fetched message awaiting normalization
///
/// Transient: produced per fetch and never persisted.
#[derive(Debug, Clone)]
pub struct CandidateMessage {
    pub id: MessageId,
    pub headers: Vec<Header>,
    pub body: MimePart,
    /// Provider-generated plain-text excerpt (may be empty)
    pub snippet: String,
    pub received_at: DateTime<Utc>,
}

impl CandidateMessage {
    pub fn builder(id: impl Into<MessageId>) -> CandidateMessageBuilder {
        CandidateMessageBuilder::new(id.into())
    }

    /// Look up a header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Builder for creating CandidateMessage instances
pub struct CandidateMessageBuilder {
    id: MessageId,
    headers: Vec<Header>,
    body: MimePart,
    snippet: String,
    received_at: Option<DateTime<Utc>>,
}

impl CandidateMessageBuilder {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            headers: Vec::new(),
            body: MimePart::default(),
            snippet: String::new(),
            received_at: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn from(self, from: impl Into<String>) -> Self {
        self.header("From", from)
    }

    pub fn subject(self, subject: impl Into<String>) -> Self {
        self.header("Subject", subject)
    }

    pub fn body(mut self, body: MimePart) -> Self {
        self.body = body;
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn build(self) -> CandidateMessage {
        CandidateMessage {
            id: self.id,
            headers: self.headers,
            body: self.body,
            snippet: self.snippet,
            received_at: self.received_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}
