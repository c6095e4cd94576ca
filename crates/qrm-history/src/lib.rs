//! # QRM History
//!
//! Local activity history for QR Master: every generated or scanned code
//! is recorded with a timestamp, listed in reverse-chronological order,
//! and clearable in one step.
//!
//! Entries written while disconnected land in a pending queue; the
//! [`HistorySyncHandler`] flushes it into the main table when the worker's
//! `qr-history-sync` tag fires on reconnect.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use qrm_sw::{SwError, SyncHandler, HISTORY_SYNC_TAG};

/// History storage errors.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid entry kind: {0}")]
    InvalidKind(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// How an entry was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// The user generated a QR code from input.
    Generated,
    /// The user decoded a QR code with the camera.
    Scanned,
}

impl EntryKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Scanned => "scanned",
        }
    }

    fn parse(value: &str) -> Result<Self, HistoryError> {
        match value {
            "generated" => Ok(Self::Generated),
            "scanned" => Ok(Self::Scanned),
            other => Err(HistoryError::InvalidKind(other.to_string())),
        }
    }
}

/// A recorded activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: EntryKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Create an entry timestamped now.
    pub fn new(kind: EntryKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// SQLite-backed history store.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pending (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );",
        )?;
        info!("History store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record an entry.
    pub fn add(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO history (kind, text, timestamp) VALUES (?1, ?2, ?3)",
            params![
                entry.kind.as_str(),
                entry.text,
                entry.timestamp.to_rfc3339()
            ],
        )?;
        debug!(kind = entry.kind.as_str(), "History entry added");
        Ok(())
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT kind, text, timestamp FROM history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (kind, text, timestamp) = row?;
            entries.push(HistoryEntry {
                kind: EntryKind::parse(&kind)?,
                text,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| HistoryError::InvalidTimestamp(format!("{timestamp}: {e}")))?,
            });
        }
        Ok(entries)
    }

    /// Number of recorded entries.
    pub fn len(&self) -> Result<usize, HistoryError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Check if the history is empty.
    pub fn is_empty(&self) -> Result<bool, HistoryError> {
        Ok(self.len()? == 0)
    }

    /// Delete all history.
    pub fn clear(&self) -> Result<(), HistoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM history", [])?;
        info!("History cleared");
        Ok(())
    }

    /// Queue an entry written while disconnected.
    pub fn queue_offline(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending (kind, text, timestamp) VALUES (?1, ?2, ?3)",
            params![
                entry.kind.as_str(),
                entry.text,
                entry.timestamp.to_rfc3339()
            ],
        )?;
        debug!(kind = entry.kind.as_str(), "Entry queued for sync");
        Ok(())
    }

    /// Number of queued offline entries.
    pub fn pending_len(&self) -> Result<usize, HistoryError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Move queued entries into the main table. Returns how many were
    /// flushed; an empty queue flushes zero and is not an error.
    pub fn flush_queue(&self) -> Result<usize, HistoryError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let moved = tx.execute(
            "INSERT INTO history (kind, text, timestamp)
             SELECT kind, text, timestamp FROM pending ORDER BY id",
            [],
        )?;
        tx.execute("DELETE FROM pending", [])?;
        tx.commit()?;
        if moved > 0 {
            info!(moved, "Offline history flushed");
        }
        Ok(moved)
    }
}

/// Bridges the store into the worker's background-sync registry under the
/// `qr-history-sync` tag.
pub struct HistorySyncHandler {
    store: Arc<HistoryStore>,
}

impl HistorySyncHandler {
    /// Create a handler over a shared store.
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

impl SyncHandler for HistorySyncHandler {
    fn tag(&self) -> &str {
        HISTORY_SYNC_TAG
    }

    fn run(&self) -> Result<(), SwError> {
        self.store
            .flush_queue()
            .map(|_| ())
            .map_err(|e| SwError::Sync(e.to_string()))
    }
}
