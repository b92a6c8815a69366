//! Configuration loading for mailsync
//!
//! OAuth client credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)
//!
//! Sync settings come from `sync.json` in the config directory, with a few
//! environment overrides applied on top.

use anyhow::{Context, Result, bail};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::google::SearchFilter;
use crate::normalize::{DEFAULT_SNIPPET_CHARS, NormalizeOptions};
use crate::sync::{DEFAULT_WINDOW_TOLERANCE_SECS, SyncOptions};

/// Credentials filename in the mailsync config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Sync settings filename in the mailsync config directory
pub const SYNC_CONFIG_FILE: &str = "sync.json";

/// Default cursor database filename in the mailsync config directory
const DATABASE_FILE: &str = "state.db";

/// Spreadsheet IDs that are really unfilled template values
const PLACEHOLDER_IDS: [&str; 3] = ["your_spreadsheet_id", "your_spreadsheet_id_here", "changeme"];

/// OAuth credentials for Google API access
#[derive(Debug, Clone)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GoogleCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials (for production builds)
    /// 2. JSON file (~/.config/mailsync/google-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Desktop ("installed") and "web" client types share a layout
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID")
            .context("GOOGLE_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .context("GOOGLE_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Default credentials file path (~/.config/mailsync/google-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// Settings for a sync pass and its adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// ID from the spreadsheet URL (`/spreadsheets/d/{id}/edit`)
    pub spreadsheet_id: String,
    /// Tab that receives rows
    pub sheet_name: String,
    /// Cursor database; defaults to `state.db` in the config directory
    pub database_path: Option<PathBuf>,
    pub snippet_chars: usize,
    pub window_tolerance_secs: i64,
    pub max_messages: usize,
    pub exclude_noreply: bool,
    pub subject_filter: Option<String>,
    pub mark_read: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            sheet_name: "Sheet1".to_string(),
            database_path: None,
            snippet_chars: DEFAULT_SNIPPET_CHARS,
            window_tolerance_secs: DEFAULT_WINDOW_TOLERANCE_SECS,
            max_messages: 100,
            exclude_noreply: true,
            subject_filter: None,
            mark_read: true,
        }
    }
}

impl SyncConfig {
    /// Load settings from `path`, or from `sync.json` in the config
    /// directory, then apply environment overrides
    ///
    /// A missing default file yields the defaults; a missing explicit path
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => config::load_json_file(path)?,
            None if config::config_exists(SYNC_CONFIG_FILE) => config::load_json(SYNC_CONFIG_FILE)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse sync config JSON")
    }

    /// Apply `MAILSYNC_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("MAILSYNC_SPREADSHEET_ID") {
            self.spreadsheet_id = id;
        }
        if let Some(name) = lookup("MAILSYNC_SHEET_NAME") {
            self.sheet_name = name;
        }
        if let Some(db) = lookup("MAILSYNC_DATABASE") {
            self.database_path = Some(PathBuf::from(db));
        }
    }

    /// Reject settings that cannot work before anything touches the network
    pub fn validate(&self) -> Result<()> {
        let id = self.spreadsheet_id.trim();
        if id.is_empty() {
            bail!(
                "No spreadsheet configured: set \"spreadsheet_id\" in {} or MAILSYNC_SPREADSHEET_ID",
                SYNC_CONFIG_FILE
            );
        }
        if PLACEHOLDER_IDS.iter().any(|p| id.eq_ignore_ascii_case(p)) {
            bail!("spreadsheet_id is still the placeholder {:?}", id);
        }
        if self.sheet_name.trim().is_empty() {
            bail!("sheet_name must not be empty");
        }
        if self.window_tolerance_secs < 0 {
            bail!(
                "window_tolerance_secs must not be negative (got {})",
                self.window_tolerance_secs
            );
        }
        if self.max_messages == 0 {
            bail!("max_messages must be at least 1");
        }
        Ok(())
    }

    /// Resolved cursor database location
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(DATABASE_FILE).context("Could not determine config directory"),
        }
    }

    pub fn sync_options(&self, dry_run: bool) -> SyncOptions {
        SyncOptions {
            window_tolerance: Duration::seconds(self.window_tolerance_secs),
            normalize: NormalizeOptions {
                snippet_chars: self.snippet_chars,
            },
            mark_read: self.mark_read,
            dry_run,
        }
    }

    pub fn search_filter(&self) -> SearchFilter {
        SearchFilter {
            subject: self.subject_filter.clone(),
            exclude_noreply: self.exclude_noreply,
            max_messages: self.max_messages,
        }
    }
}
