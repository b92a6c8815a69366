//! mailsync - copy unread inbox mail into a Google Sheet
//!
//! The main entry point for the `mailsync` binary.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;

use mailsync::{
    CredentialProvider, CursorStore, GmailClient, GoogleAuth, GoogleCredentials, SheetsClient,
    SqliteCursorStore, SyncConfig, SyncOrchestrator, SyncReport,
};

/// Incremental Gmail to Google Sheets sync
#[derive(Debug, Parser)]
#[command(name = "mailsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Sync settings file (defaults to sync.json in the config directory)
    #[arg(long, global = true, env = "MAILSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass
    Run {
        /// Report what would be recorded without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the cursor and the number of processed messages
    Status,
    /// Verify spreadsheet access and write the header row
    InitSheet,
    /// Remove cached OAuth tokens
    Logout,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = execute(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { dry_run } => run(&load_config(cli.config)?, dry_run),
        Commands::Status => status(&load_config(cli.config)?),
        Commands::InitSheet => init_sheet(&load_config(cli.config)?),
        Commands::Logout => google_auth()?.logout(),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<SyncConfig> {
    let cfg = SyncConfig::load(path.as_deref())?;
    cfg.validate()?;
    Ok(cfg)
}

fn google_auth() -> Result<GoogleAuth> {
    let credentials = GoogleCredentials::load().map_err(|e| {
        if let Some(path) = GoogleCredentials::default_credentials_path() {
            warn!(
                "To configure Google access, either:\n\
                 1. Place your Google OAuth credentials at: {}\n\
                 2. Or set environment variables: GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET",
                path.display()
            );
        }
        e
    })?;
    GoogleAuth::new(&credentials)
}

fn open_store(cfg: &SyncConfig) -> Result<SqliteCursorStore> {
    let path = cfg.database_path()?;
    SqliteCursorStore::open(&path)
        .with_context(|| format!("Failed to open state database {}", path.display()))
}

fn run(cfg: &SyncConfig, dry_run: bool) -> Result<()> {
    let auth = google_auth()?;
    let store = open_store(cfg)?;
    let mailbox = GmailClient::new(cfg.search_filter());
    let sheets = SheetsClient::new(&cfg.spreadsheet_id, &cfg.sheet_name);

    if !dry_run {
        let token = auth.get_valid_token().context("Authentication failed")?;
        sheets.verify_access(&token)?;
        sheets.ensure_header(&token)?;
    }

    let orchestrator =
        SyncOrchestrator::new(&auth, &mailbox, &sheets, &store, cfg.sync_options(dry_run));
    let report = orchestrator.run()?;
    print_report(&report, dry_run);

    if !report.is_clean() {
        bail!(
            "{} message(s) failed and will be retried on the next run",
            report.failures.len()
        );
    }
    Ok(())
}

fn status(cfg: &SyncConfig) -> Result<()> {
    let store = open_store(cfg)?;
    let cursor = store.cursor()?;

    println!("Spreadsheet:    {} ({})", cfg.spreadsheet_id, cfg.sheet_name);
    println!("Database:       {}", cfg.database_path()?.display());
    if cursor.is_initial() {
        println!("Last run:       never");
    } else {
        println!("Last run:       {}", cursor.last_run.to_rfc3339());
    }
    println!("Processed:      {}", store.processed_count()?);
    Ok(())
}

fn init_sheet(cfg: &SyncConfig) -> Result<()> {
    let auth = google_auth()?;
    let sheets = SheetsClient::new(&cfg.spreadsheet_id, &cfg.sheet_name);
    let token = auth.get_valid_token().context("Authentication failed")?;

    let title = sheets.verify_access(&token)?;
    if sheets.ensure_header(&token)? {
        info!("Header row added to {:?}", title);
    } else {
        info!("{:?} already has a header row", title);
    }
    Ok(())
}

fn print_report(report: &SyncReport, dry_run: bool) {
    let stats = &report.stats;
    let verb = if dry_run { "Would record" } else { "Recorded" };

    println!("Candidates:        {}", stats.candidates);
    println!("{:<19}{}", format!("{}:", verb), stats.recorded);
    println!("Outside window:    {}", stats.outside_window);
    println!("Already processed: {}", stats.already_processed);
    println!("Duplicate content: {}", stats.duplicate_content);
    if stats.mark_read_failures > 0 {
        println!("Mark-read failed:  {}", stats.mark_read_failures);
    }
    for failure in &report.failures {
        println!("  ! {}", failure);
    }
    println!(
        "Cursor:            {} ({} ms)",
        if report.cursor_advanced() {
            report.cursor_after.last_run.to_rfc3339()
        } else {
            format!("held at {}", report.cursor_before.last_run.to_rfc3339())
        },
        stats.duration_ms
    );
}
