//! Normalized records written to the spreadsheet

use serde::{Deserialize, Serialize};

/// Column headers of the sink, in row order
pub const SHEET_HEADERS: [&str; 4] = ["Sender Email", "Subject", "Date", "Body"];

/// Canonical form of a message, one spreadsheet row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Bare sender address
    pub sender: String,
    /// Trimmed subject line
    pub subject: String,
    /// Receipt time in stable RFC 3339 form (`2025-01-11T09:30:00Z`)
    pub received_at: String,
    /// Plain-text body or bounded snippet
    pub body_text: String,
}

impl NormalizedRecord {
    /// The `(sender, subject, received_at)` tuple used for content dedup
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(&self.sender, &self.subject, &self.received_at)
    }

    /// Cell values in sheet column order
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.sender.clone(),
            self.subject.clone(),
            self.received_at.clone(),
            self.body_text.clone(),
        ]
    }
}

/// Content identity of a record, independent of the mailbox message ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub sender: String,
    pub subject: String,
    pub received_at: String,
}

impl NaturalKey {
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        received_at: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
            received_at: received_at.into(),
        }
    }

    /// Build a key from the leading cells of a sheet row
    ///
    /// Returns `None` for rows with fewer than three cells. Trailing empty
    /// cells are omitted by the Sheets API, so a row whose subject is empty
    /// but has a date still arrives with three cells.
    pub fn from_row(row: &[String]) -> Option<Self> {
        match row {
            [sender, subject, received_at, ..] => {
                Some(Self::new(sender.as_str(), subject.as_str(), received_at.as_str()))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {:?}, {})", self.sender, self.subject, self.received_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> NormalizedRecord {
        NormalizedRecord {
            sender: "alice@example.com".to_string(),
            subject: "Invoice".to_string(),
            received_at: "2025-01-11T09:30:00Z".to_string(),
            body_text: "Please pay".to_string(),
        }
    }

    #[test]
    fn test_row_matches_header_order() {
        let row = record().to_row();
        assert_eq!(row.len(), SHEET_HEADERS.len());
        assert_eq!(row[0], "alice@example.com");
        assert_eq!(row[2], "2025-01-11T09:30:00Z");
        assert_eq!(row[3], "Please pay");
    }

    #[test]
    fn test_natural_key_from_row() {
        let row = record().to_row();
        assert_eq!(NaturalKey::from_row(&row), Some(record().natural_key()));
    }

    #[test]
    fn test_natural_key_from_short_row() {
        let row = vec!["alice@example.com".to_string(), "Invoice".to_string()];
        assert_eq!(NaturalKey::from_row(&row), None);
    }

    #[test]
    fn test_natural_key_ignores_body() {
        let mut other = record();
        other.body_text = "Different body".to_string();
        assert_eq!(other.natural_key(), record().natural_key());
    }
}
