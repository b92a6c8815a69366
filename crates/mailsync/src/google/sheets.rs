//! Google Sheets API client

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashSet;

use super::api::{AppendValuesResponse, Spreadsheet, ValueRange};
use super::request_error;
use crate::models::{NaturalKey, NormalizedRecord, SHEET_HEADERS};
use crate::sync::{RecordSink, Token};

const SERVICE: &str = "sheets";

/// Sheets client bound to one tab of one spreadsheet
pub struct SheetsClient {
    spreadsheet_id: String,
    sheet_name: String,
}

impl SheetsClient {
    const BASE_URL: &'static str = "https://sheets.googleapis.com/v4/spreadsheets";

    pub fn new(spreadsheet_id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
        }
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    /// A1 notation for `cells` on this client's tab
    fn range(&self, cells: &str) -> String {
        a1_range(&self.sheet_name, cells)
    }

    fn values_url(&self, cells: &str) -> String {
        format!(
            "{}/{}/values/{}",
            Self::BASE_URL,
            urlencoding::encode(&self.spreadsheet_id),
            urlencoding::encode(&self.range(cells))
        )
    }

    /// Confirm the spreadsheet is reachable with this token, returning its title
    pub fn verify_access(&self, token: &Token) -> Result<String> {
        let url = format!(
            "{}/{}?fields=spreadsheetId,properties.title",
            Self::BASE_URL,
            urlencoding::encode(&self.spreadsheet_id)
        );

        let mut response = ureq::get(&url)
            .header("Authorization", &token.bearer())
            .call()
            .map_err(|e| request_error(SERVICE, "open spreadsheet", e))?;

        let sheet: Spreadsheet = response
            .body_mut()
            .read_json()
            .context("Failed to parse spreadsheet response")?;

        info!(
            "[SHEETS] Connected to {:?} ({})",
            sheet.properties.title, sheet.spreadsheet_id
        );
        Ok(sheet.properties.title)
    }

    /// Read a block of cells; missing rows and trailing blanks are omitted
    fn get_values(&self, token: &Token, cells: &str) -> Result<Vec<Vec<String>>> {
        let mut response = ureq::get(&self.values_url(cells))
            .header("Authorization", &token.bearer())
            .call()
            .map_err(|e| request_error(SERVICE, "read values", e))?;

        let values: ValueRange = response
            .body_mut()
            .read_json()
            .context("Failed to parse values response")?;

        Ok(values.values)
    }

    /// Write the column headers if the first row is empty
    ///
    /// Returns whether the header row was written.
    pub fn ensure_header(&self, token: &Token) -> Result<bool> {
        let existing = self.get_values(token, "A1:D1")?;
        if existing.iter().any(|row| row.iter().any(|cell| !cell.is_empty())) {
            debug!("[SHEETS] Header row already present");
            return Ok(false);
        }

        let body = ValueRange {
            range: Some(self.range("A1:D1")),
            values: vec![SHEET_HEADERS.iter().map(|h| h.to_string()).collect()],
        };

        ureq::put(&format!("{}?valueInputOption=RAW", self.values_url("A1:D1")))
            .header("Authorization", &token.bearer())
            .send_json(&body)
            .map_err(|e| request_error(SERVICE, "write header", e))?;

        info!("[SHEETS] Wrote header row");
        Ok(true)
    }
}

impl RecordSink for SheetsClient {
    fn query_existing(
        &self,
        token: &Token,
        keys: &HashSet<NaturalKey>,
    ) -> Result<HashSet<NaturalKey>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = self.get_values(token, "A2:C")?;
        Ok(existing_keys(&rows, keys))
    }

    fn append_rows(&self, token: &Token, rows: &[NormalizedRecord]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let body = ValueRange {
            range: None,
            values: rows.iter().map(NormalizedRecord::to_row).collect(),
        };

        let mut response = ureq::post(&format!(
            "{}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
            self.values_url("A:D")
        ))
        .header("Authorization", &token.bearer())
        .send_json(&body)
        .map_err(|e| request_error(SERVICE, "append rows", e))?;

        let appended: AppendValuesResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse append response")?;

        if let Some(updates) = appended.updates {
            debug!(
                "[SHEETS] Appended {} row(s) at {}",
                updates.updated_rows.unwrap_or(0),
                updates.updated_range.as_deref().unwrap_or("?")
            );
        }
        Ok(())
    }
}

/// Quote a tab name for A1 notation (`'My tab'!A1:D1`)
fn a1_range(sheet_name: &str, cells: &str) -> String {
    format!("'{}'!{}", sheet_name.replace('\'', "''"), cells)
}

/// Keys from `rows` that appear in `wanted`
fn existing_keys(rows: &[Vec<String>], wanted: &HashSet<NaturalKey>) -> HashSet<NaturalKey> {
    rows.iter()
        .filter_map(|row| NaturalKey::from_row(row))
        .filter(|key| wanted.contains(key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_a1_range_quotes_sheet_name() {
        assert_eq!(a1_range("Sheet1", "A2:C"), "'Sheet1'!A2:C");
        assert_eq!(a1_range("Bob's mail", "A1:D1"), "'Bob''s mail'!A1:D1");
    }

    #[test]
    fn test_values_url_encodes_range() {
        let client = SheetsClient::new("abc123", "Inbox Log");
        assert_eq!(
            client.values_url("A1:D1"),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/%27Inbox%20Log%27%21A1%3AD1"
        );
    }

    #[test]
    fn test_existing_keys_intersects() {
        let rows = vec![
            row(&["a@example.com", "Hello", "2025-01-11T09:00:00Z"]),
            row(&["b@example.com", "Other", "2025-01-11T10:00:00Z"]),
            row(&["short"]),
        ];
        let wanted = HashSet::from([
            NaturalKey::new("a@example.com", "Hello", "2025-01-11T09:00:00Z"),
            NaturalKey::new("c@example.com", "Missing", "2025-01-11T11:00:00Z"),
        ]);

        let found = existing_keys(&rows, &wanted);
        assert_eq!(found.len(), 1);
        assert!(found.contains(&NaturalKey::new(
            "a@example.com",
            "Hello",
            "2025-01-11T09:00:00Z"
        )));
    }

    #[test]
    fn test_empty_queries_skip_network() {
        let client = SheetsClient::new("abc123", "Sheet1");
        let token = Token::new("unused", None);
        assert!(client.query_existing(&token, &HashSet::new()).unwrap().is_empty());
        assert!(client.append_rows(&token, &[]).is_ok());
    }
}
