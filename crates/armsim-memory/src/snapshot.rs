//! Key-value snapshot store.
//!
//! # Storage layout
//!
//! [`SqliteSnapshotStore`] keeps a single table `snapshots`:
//!
//! | column     | type | description                          |
//! |------------|------|--------------------------------------|
//! | key        | TEXT | primary key, e.g. `robot_arm-1`      |
//! | value      | TEXT | JSON document                        |
//! | updated_at | TEXT | RFC-3339 time of the last write (UTC)|
//!
//! # Example
//!
//! ```rust
//! use armsim_memory::snapshot::{SnapshotStore, SqliteSnapshotStore};
//!
//! let store = SqliteSnapshotStore::open_in_memory().unwrap();
//! store.set("robot_arm-1", r#"{"base":[0.0,0.0]}"#).unwrap();
//! assert_eq!(store.get("robot_arm-1").unwrap().as_deref(), Some(r#"{"base":[0.0,0.0]}"#));
//! ```

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from snapshot store operations.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Snapshot keys must be non-empty")]
    EmptyKey,
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A string key-value store shared between the workspace and its tasks.
pub trait SnapshotStore: Send + Sync {
    /// Insert or overwrite `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), SnapshotError>;

    /// Read `key`; `Ok(None)` when it has never been written.
    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite implementation
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed snapshot store.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: &str) -> Result<Self, SnapshotError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SnapshotError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SnapshotError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                key        TEXT NOT NULL PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored keys.
    pub fn len(&self) -> Result<usize, SnapshotError> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, SnapshotError> {
        Ok(self.len()? == 0)
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn set(&self, key: &str, value: &str) -> Result<(), SnapshotError> {
        if key.is_empty() {
            return Err(SnapshotError::EmptyKey);
        }
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO snapshots (key, value, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        debug!(key, "snapshot stored");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        let value = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM snapshots WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local store for runs that need no persistence.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn set(&self, key: &str, value: &str) -> Result<(), SnapshotError> {
        if key.is_empty() {
            return Err(SnapshotError::EmptyKey);
        }
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        Ok(self.entries.lock().get(key).cloned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
