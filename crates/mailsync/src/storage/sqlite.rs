//! SQLite-backed cursor store

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::CursorStore;
use crate::error::StoreError;
use crate::models::MessageId;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Append-only log of recorded messages
            CREATE TABLE IF NOT EXISTS processed_emails (
                message_id TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL
            );

            -- Singleton watermark row
            CREATE TABLE IF NOT EXISTS last_run (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                timestamp TEXT NOT NULL
            );
            "#,
        ),
    ])
}

/// SQLite-based cursor store
///
/// A single connection guarded by a mutex. The connection is closed when
/// the store is dropped.
pub struct SqliteCursorStore {
    conn: Mutex<Connection>,
}

impl SqliteCursorStore {
    /// Open (or create) the state database at `db_path`
    ///
    /// Fails with [`StoreError::Corrupt`] when SQLite's integrity check does
    /// not pass.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Corrupt(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        debug!("[STORE] Opened state database at {}", db_path.display());
        Self::from_connection(conn)
    }

    /// In-memory SQLite database, mainly for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        // WAL gives atomic commits with crash recovery; FULL sync makes the
        // cursor update durable once the transaction returns.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            "#,
        )?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(StoreError::Corrupt(check));
        }

        migrations().to_latest(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid last_run timestamp {raw:?}: {e}")))
}

impl CursorStore for SqliteCursorStore {
    fn last_run_timestamp(&self) -> Result<DateTime<Utc>, StoreError> {
        let conn = self.lock()?;

        let raw: Option<String> = conn
            .query_row("SELECT timestamp FROM last_run WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match raw {
            Some(raw) => parse_ts(&raw),
            None => Ok(DateTime::<Utc>::UNIX_EPOCH),
        }
    }

    fn set_last_run_timestamp(&self, ts: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO last_run (id, timestamp) VALUES (1, ?)
             ON CONFLICT(id) DO UPDATE SET timestamp = excluded.timestamp",
            params![format_ts(ts)],
        )?;

        tx.commit()?;
        info!("[STORE] Cursor set to {}", format_ts(ts));
        Ok(())
    }

    fn is_processed(&self, id: &MessageId) -> Result<bool, StoreError> {
        let conn = self.lock()?;

        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_emails WHERE message_id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }

    fn mark_processed(&self, id: &MessageId) -> Result<(), StoreError> {
        let conn = self.lock()?;

        let inserted = conn.execute(
            "INSERT INTO processed_emails (message_id, processed_at) VALUES (?, ?)
             ON CONFLICT(message_id) DO NOTHING",
            params![id.as_str(), format_ts(Utc::now())],
        )?;

        if inserted == 0 {
            debug!("[STORE] Message {} was already marked processed", id);
        }
        Ok(())
    }

    fn processed_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;

        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM processed_emails", [], |row| row.get(0))?;

        Ok(count as usize)
    }
}
