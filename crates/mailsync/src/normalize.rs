//! Message normalization
//!
//! Converts a fetched [`CandidateMessage`] into the [`NormalizedRecord`] that
//! becomes a spreadsheet row. Everything here is pure and deterministic: no
//! I/O, no clock, and no failure path. Malformed input degrades to a
//! best-effort record.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{CandidateMessage, EmailAddress, MimePart, NormalizedRecord};

/// Default cap, in characters, for the fallback body snippet
pub const DEFAULT_SNIPPET_CHARS: usize = 200;

/// Maximum characters Google Sheets accepts in a single cell
pub const SHEETS_CELL_LIMIT: usize = 50_000;

/// Knobs for normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Cap applied when no plain-text part exists
    pub snippet_chars: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            snippet_chars: DEFAULT_SNIPPET_CHARS,
        }
    }
}

/// Normalize a candidate message into a sheet record
pub fn normalize(message: &CandidateMessage, options: &NormalizeOptions) -> NormalizedRecord {
    NormalizedRecord {
        sender: extract_sender(message),
        subject: message
            .header("Subject")
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        received_at: format_timestamp(message.received_at),
        body_text: extract_body(&message.body, &message.snippet, options),
    }
}

/// Stable textual form of a receipt time
///
/// Second precision, UTC, `Z` suffix. The output doubles as part of the
/// natural key, so it must never change for a given instant.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Bare sender address from the `From` header
fn extract_sender(message: &CandidateMessage) -> String {
    message
        .header("From")
        .map(|from| EmailAddress::parse(from).email)
        .unwrap_or_default()
}

/// Pick the body text for a message
///
/// Plain text wins. Without it we fall back to a bounded snippet: the
/// provider's excerpt if there is one, else the HTML part reduced to text.
fn extract_body(body: &MimePart, snippet: &str, options: &NormalizeOptions) -> String {
    if let Some(text) = body.find("text/plain") {
        let text = text.trim();
        if !text.is_empty() {
            return truncate_chars(text, SHEETS_CELL_LIMIT);
        }
    }

    let fallback = if !snippet.trim().is_empty() {
        collapse_whitespace(&decode_html_entities(snippet))
    } else if let Some(html) = body.find("text/html") {
        html_to_text(html)
    } else {
        String::new()
    };

    truncate_chars(&fallback, options.snippet_chars)
}

/// Keep at most `max` characters (not bytes)
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Reduce HTML to readable text by dropping tags and non-visible elements
///
/// Strips tags and script/style bodies only; no layout is preserved.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let tag = &rest[start..];

        let Some(end) = tag.find('>') else {
            // Unterminated tag: drop the remainder
            rest = "";
            break;
        };

        let name = tag[1..end]
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        rest = &tag[end + 1..];

        if name == "script" || name == "style" {
            let closing = format!("</{name}");
            rest = match find_ignore_ascii_case(rest, &closing) {
                Some(pos) => rest[pos..].find('>').map_or("", |e| &rest[pos + e + 1..]),
                None => "",
            };
        }

        out.push(' ');
    }
    out.push_str(rest);

    collapse_whitespace(&decode_html_entities(&out))
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the HTML entities Gmail uses in snippets
fn decode_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 11, 9, 30, 15).unwrap()
    }

    fn message(body: MimePart, snippet: &str) -> CandidateMessage {
        CandidateMessage::builder("m1")
            .from("Alice Example <alice@example.com>")
            .subject("  Quarterly report \n")
            .body(body)
            .snippet(snippet)
            .received_at(received())
            .build()
    }

    #[test]
    fn test_normalize_plain_text_message() {
        let msg = message(MimePart::leaf("text/plain", "Hello team,\nsee attached.\n"), "");
        let record = normalize(&msg, &NormalizeOptions::default());

        assert_eq!(record.sender, "alice@example.com");
        assert_eq!(record.subject, "Quarterly report");
        assert_eq!(record.received_at, "2025-01-11T09:30:15Z");
        assert_eq!(record.body_text, "Hello team,\nsee attached.");
    }

    #[test]
    fn test_prefers_plain_part_in_multipart() {
        let body = MimePart::multipart(
            "multipart/alternative",
            vec![
                MimePart::leaf("text/html", "<p>Hello <b>team</b></p>"),
                MimePart::leaf("text/plain", "Hello team"),
            ],
        );
        let record = normalize(&message(body, "snippet text"), &NormalizeOptions::default());
        assert_eq!(record.body_text, "Hello team");
    }

    #[test]
    fn test_html_only_falls_back_to_capped_text() {
        let paragraph = "word ".repeat(100);
        let html = format!(
            "<html><head><style>p {{ color: red; }}</style></head><body><p>{paragraph}</p></body></html>"
        );
        let body = MimePart::multipart("multipart/alternative", vec![MimePart::leaf("text/html", html)]);
        let options = NormalizeOptions { snippet_chars: 200 };

        let record = normalize(&message(body, ""), &options);

        assert_eq!(record.body_text.chars().count(), 200);
        assert!(!record.body_text.contains('<'));
        assert!(!record.body_text.contains("color"));
        assert!(record.body_text.starts_with("word word"));
    }

    #[test]
    fn test_provider_snippet_used_before_html() {
        let body = MimePart::multipart(
            "multipart/alternative",
            vec![MimePart::leaf("text/html", "<p>ignored</p>")],
        );
        let record = normalize(
            &message(body, "Tom &amp; Jerry&#39;s   update"),
            &NormalizeOptions::default(),
        );
        assert_eq!(record.body_text, "Tom & Jerry's update");
    }

    #[test]
    fn test_snippet_is_capped() {
        let snippet = "x".repeat(500);
        let options = NormalizeOptions { snippet_chars: 42 };
        let record = normalize(&message(MimePart::default(), &snippet), &options);
        assert_eq!(record.body_text.len(), 42);
    }

    #[test]
    fn test_malformed_multipart_degrades() {
        // Parts whose bodies failed to decode, and an unterminated tag
        let body = MimePart::multipart(
            "multipart/mixed",
            vec![
                MimePart {
                    mime_type: "text/plain".to_string(),
                    data: None,
                    parts: Vec::new(),
                },
                MimePart::leaf("text/html", "Visible text <a href=\"broken"),
            ],
        );
        let record = normalize(&message(body, ""), &NormalizeOptions::default());
        assert_eq!(record.body_text, "Visible text");
    }

    #[test]
    fn test_missing_headers_yield_empty_fields() {
        let msg = CandidateMessage::builder("m2").received_at(received()).build();
        let record = normalize(&msg, &NormalizeOptions::default());
        assert_eq!(record.sender, "");
        assert_eq!(record.subject, "");
        assert_eq!(record.body_text, "");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let msg = message(MimePart::leaf("text/plain", "same"), "");
        let options = NormalizeOptions::default();
        assert_eq!(normalize(&msg, &options), normalize(&msg, &options));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_decode_html_entities() {
        let output = decode_html_entities("Hello &amp; welcome &lt;user&gt;");
        assert_eq!(output, "Hello & welcome <user>");
    }
}
