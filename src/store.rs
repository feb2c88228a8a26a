//! SQLite-backed working store for scheduled meeting alarms.
//!
//! The database lives at `~/.always-early/always-early.db` and holds two
//! tables: `meeting_urls` maps an alarm key to the meeting URL that should be
//! opened when the alarm fires, and `alarms` (see [`crate::alarms`]) is the
//! durable registry of pending fire times. Keeping both in one WAL-mode file
//! lets the sync loop and the alarm delivery loop each hold their own
//! connection; every operation is a single statement or a short explicit
//! transaction, so the two writers never need a shared lock.

use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create data directory: {0}")]
    CreateDir(#[source] std::io::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meeting_urls (
    key TEXT PRIMARY KEY,
    url TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS alarms (
    key     TEXT PRIMARY KEY,
    fire_at INTEGER NOT NULL
);
";

pub struct SyncDb {
    conn: Connection,
}

impl SyncDb {
    /// Open (or create) the database at `~/.always-early/always-early.db`
    /// and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL mode so the sync and delivery loops can read concurrently
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.always-early/always-early.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".always-early").join("always-early.db"))
    }

    pub(crate) fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&self.conn) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Meeting URL payloads
    // =========================================================================

    /// Persist the URL to open when `key` fires. Replaces any previous value,
    /// so re-scheduling the same event is a visible no-op.
    pub fn set_meeting_url(&self, key: &str, url: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meeting_urls (key, url) VALUES (?1, ?2)",
            params![key, url],
        )?;
        Ok(())
    }

    pub fn get_meeting_url(&self, key: &str) -> Result<Option<String>, DbError> {
        let url = self
            .conn
            .query_row(
                "SELECT url FROM meeting_urls WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(url)
    }

    pub fn remove_meeting_url(&self, key: &str) -> Result<(), DbError> {
        self.conn
            .execute("DELETE FROM meeting_urls WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Read and delete the URL for `key` in one transaction.
    ///
    /// This is the dispatcher's at-most-once consumption point: whichever
    /// caller gets `Some` owns the side effect, every later caller sees
    /// `None`.
    pub fn take_meeting_url(&self, key: &str) -> Result<Option<String>, DbError> {
        self.with_transaction(|conn| {
            let url: Option<String> = conn
                .query_row(
                    "SELECT url FROM meeting_urls WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if url.is_some() {
                conn.execute("DELETE FROM meeting_urls WHERE key = ?1", params![key])?;
            }
            Ok(url)
        })
    }
}
