//! Gmail API HTTP client

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use log::debug;

use super::api::{GmailMessage, ListMessagesResponse, MessagePart, ModifyMessageRequest};
use super::request_error;
use crate::models::{CandidateMessage, MessageId, MessageRef, MimePart};
use crate::sync::{MailboxSource, Token};

const SERVICE: &str = "gmail";

/// Extra search restrictions applied on top of the unread-inbox query
#[derive(Debug, Clone)]
pub struct SearchFilter {
    /// Only messages whose subject contains this text
    pub subject: Option<String>,
    /// Skip noreply/no-reply senders
    pub exclude_noreply: bool,
    /// Upper bound on references returned by one search
    pub max_messages: usize,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            subject: None,
            exclude_noreply: true,
            max_messages: 100,
        }
    }
}

/// Gmail API client for the unread inbox
pub struct GmailClient {
    filter: SearchFilter,
}

impl GmailClient {
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Largest page `messages.list` accepts
    const MAX_PAGE_SIZE: usize = 500;

    pub fn new(filter: SearchFilter) -> Self {
        Self { filter }
    }

    /// Build the Gmail search expression for messages after `after`
    ///
    /// `after:` takes epoch seconds and is exclusive, so one second is
    /// subtracted to keep a message received exactly at `after`. A date
    /// (`YYYY/MM/DD`) would be read as midnight Pacific time.
    pub fn build_query(&self, after: DateTime<Utc>) -> String {
        let mut query = format!("in:inbox is:unread after:{}", after.timestamp() - 1);

        if let Some(subject) = self.filter.subject.as_deref().map(str::trim)
            && !subject.is_empty()
        {
            query.push_str(&format!(" subject:\"{}\"", subject.replace('"', "")));
        }
        if self.filter.exclude_noreply {
            query.push_str(" -from:noreply -from:no-reply");
        }

        query
    }

    /// One page of message references matching `query`
    fn list_messages(
        &self,
        token: &Token,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let mut url = format!(
            "{}/users/me/messages?q={}&maxResults={}",
            Self::BASE_URL,
            urlencoding::encode(query),
            max_results.clamp(1, Self::MAX_PAGE_SIZE)
        );

        if let Some(page) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(page)));
        }

        let mut response = ureq::get(&url)
            .header("Authorization", &token.bearer())
            .call()
            .map_err(|e| request_error(SERVICE, "list messages", e))?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")
    }

    /// Fetch a message in the given format (`minimal` or `full`)
    fn get_message(&self, token: &Token, id: &MessageId, format: &str) -> Result<GmailMessage> {
        let url = format!(
            "{}/users/me/messages/{}?format={}",
            Self::BASE_URL,
            urlencoding::encode(id.as_str()),
            format
        );

        let mut response = ureq::get(&url)
            .header("Authorization", &token.bearer())
            .call()
            .map_err(|e| request_error(SERVICE, "get message", e))?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse message response")
    }
}

impl MailboxSource for GmailClient {
    fn search(&self, token: &Token, after: DateTime<Utc>) -> Result<Vec<MessageRef>> {
        let query = self.build_query(after);
        debug!("[GMAIL] Searching: {}", query);

        let mut ids: Vec<String> = Vec::new();
        let mut page_token = None;

        while ids.len() < self.filter.max_messages {
            let remaining = self.filter.max_messages - ids.len();
            let page = self.list_messages(token, &query, remaining, page_token.as_deref())?;

            if let Some(messages) = page.messages {
                ids.extend(messages.into_iter().map(|m| m.id));
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        ids.truncate(self.filter.max_messages);

        // messages.list carries no dates; resolve each one cheaply
        ids.into_iter()
            .map(|id| {
                let id = MessageId::new(id);
                let message = self.get_message(token, &id, "minimal")?;
                Ok(MessageRef::new(id, parse_internal_date(&message.internal_date)?))
            })
            .collect()
    }

    fn fetch_body(&self, token: &Token, id: &MessageId) -> Result<CandidateMessage> {
        let message = self.get_message(token, id, "full")?;
        to_candidate(message)
    }

    fn mark_read(&self, token: &Token, id: &MessageId) -> Result<()> {
        let url = format!(
            "{}/users/me/messages/{}/modify",
            Self::BASE_URL,
            urlencoding::encode(id.as_str())
        );
        let request = ModifyMessageRequest {
            add_label_ids: Vec::new(),
            remove_label_ids: vec!["UNREAD".to_string()],
        };

        ureq::post(&url)
            .header("Authorization", &token.bearer())
            .send_json(&request)
            .map_err(|e| request_error(SERVICE, "mark read", e))?;

        Ok(())
    }
}

/// Gmail's `internalDate` is epoch milliseconds as a string
fn parse_internal_date(internal_date: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = internal_date
        .parse()
        .with_context(|| format!("Invalid internalDate {:?}", internal_date))?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .with_context(|| format!("internalDate {} out of range", millis))
}

/// Convert a `format=full` message into the engine's representation
fn to_candidate(message: GmailMessage) -> Result<CandidateMessage> {
    let received_at = parse_internal_date(&message.internal_date)?;
    let payload = message
        .payload
        .with_context(|| format!("Message {} has no payload", message.id))?;

    let mut builder = CandidateMessage::builder(message.id)
        .snippet(message.snippet)
        .received_at(received_at);
    for header in payload.headers.iter().flatten() {
        builder = builder.header(header.name.clone(), header.value.clone());
    }

    Ok(builder.body(to_mime_part(payload)).build())
}

fn to_mime_part(part: MessagePart) -> MimePart {
    MimePart {
        mime_type: part.mime_type.unwrap_or_default(),
        data: part
            .body
            .and_then(|b| b.data)
            .and_then(|data| decode_base64_body(&data)),
        parts: part
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(to_mime_part)
            .collect(),
    }
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    let decoders: [&base64::engine::GeneralPurpose; 4] = [
        &BASE64_URL_SAFE_NO_PAD,
        &BASE64_URL_SAFE,
        &BASE64_STANDARD,
        &BASE64_STANDARD_NO_PAD,
    ];

    decoders
        .iter()
        .filter_map(|decoder| decoder.decode(data).ok())
        .find_map(|bytes| String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::api::MessageBody;
    use chrono::TimeZone;

    fn client(subject: Option<&str>, exclude_noreply: bool) -> GmailClient {
        GmailClient::new(SearchFilter {
            subject: subject.map(str::to_string),
            exclude_noreply,
            max_messages: 20,
        })
    }

    fn part(mime_type: &str, text: Option<&str>, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_string()),
            filename: None,
            headers: None,
            body: text.map(|t| MessageBody {
                size: Some(t.len() as u32),
                data: Some(BASE64_URL_SAFE_NO_PAD.encode(t)),
            }),
            parts: if parts.is_empty() { None } else { Some(parts) },
        }
    }

    #[test]
    fn test_build_query_defaults() {
        let after = Utc.with_ymd_and_hms(2025, 1, 10, 15, 30, 0).unwrap();
        assert_eq!(
            client(None, true).build_query(after),
            "in:inbox is:unread after:1736522999 -from:noreply -from:no-reply"
        );
    }

    #[test]
    fn test_build_query_with_subject() {
        let after = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(
            client(Some("  Invoice \"Q1\" "), false).build_query(after),
            "in:inbox is:unread after:1740873599 subject:\"Invoice Q1\""
        );
        assert_eq!(
            client(Some("   "), false).build_query(after),
            "in:inbox is:unread after:1740873599"
        );
    }

    #[test]
    fn test_build_query_keeps_time_of_day() {
        // Minutes before midnight must not round to either calendar day
        let after = Utc.with_ymd_and_hms(2025, 1, 9, 23, 57, 0).unwrap();
        let query = client(None, false).build_query(after);
        let bound: i64 = query
            .rsplit("after:")
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap();
        assert_eq!(bound, after.timestamp() - 1);
    }

    #[test]
    fn test_parse_internal_date() {
        let ts = parse_internal_date("1736500000000").unwrap();
        assert_eq!(ts.timestamp(), 1_736_500_000);
        assert!(parse_internal_date("yesterday").is_err());
    }

    #[test]
    fn test_decode_base64_body() {
        assert_eq!(decode_base64_body("SGVsbG8").as_deref(), Some("Hello"));
        assert_eq!(decode_base64_body("SGVsbG8=").as_deref(), Some("Hello"));
        assert_eq!(decode_base64_body("!!!"), None);
    }

    #[test]
    fn test_to_candidate_builds_mime_tree() {
        let mut payload = part(
            "multipart/alternative",
            None,
            vec![
                part("text/plain", Some("Plain body"), vec![]),
                part("text/html", Some("<p>Html body</p>"), vec![]),
            ],
        );
        payload.headers = Some(vec![
            crate::google::api::Header {
                name: "From".to_string(),
                value: "Dana <dana@example.com>".to_string(),
            },
            crate::google::api::Header {
                name: "Subject".to_string(),
                value: "Quarterly".to_string(),
            },
        ]);
        let message = GmailMessage {
            id: "18c1".to_string(),
            label_ids: Some(vec!["UNREAD".to_string(), "INBOX".to_string()]),
            snippet: "Plain body".to_string(),
            internal_date: "1736500000000".to_string(),
            payload: Some(payload),
        };

        let candidate = to_candidate(message).unwrap();
        assert_eq!(candidate.id, MessageId::new("18c1"));
        assert_eq!(candidate.header("subject"), Some("Quarterly"));
        assert_eq!(candidate.received_at.timestamp(), 1_736_500_000);
        assert_eq!(candidate.body.parts.len(), 2);
        assert_eq!(candidate.body.find("text/plain"), Some("Plain body"));
        assert_eq!(candidate.body.find("text/html"), Some("<p>Html body</p>"));
    }

    #[test]
    fn test_to_candidate_requires_payload() {
        let message = GmailMessage {
            id: "x".to_string(),
            label_ids: None,
            snippet: String::new(),
            internal_date: "0".to_string(),
            payload: None,
        };
        assert!(to_candidate(message).is_err());
    }
}
