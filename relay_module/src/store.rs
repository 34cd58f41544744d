//! Durable relay state.
//!
//! Holds two tables: the fingerprints of webhook payloads that were already
//! handled, and the recipient -> Talk room token cache.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed_webhooks (
    payload TEXT PRIMARY KEY,
    processed_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS user_cache (
    username TEXT PRIMARY KEY,
    room_token TEXT NOT NULL,
    cached_at TEXT NOT NULL
);
";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct RelayStore {
    path: PathBuf,
}

impl RelayStore {
    /// Open the store at `path`, creating the file and schema if needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        if let Some(parent) = store.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = store.open()?;
        conn.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_duplicate(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM processed_webhooks WHERE payload = ?1",
                params![fingerprint],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record `fingerprint` as processed.
    ///
    /// Returns `false` when the row already existed, which happens when two
    /// identical deliveries race past `is_duplicate`.
    pub fn mark_processed(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO processed_webhooks (payload, processed_at) VALUES (?1, ?2)",
            params![fingerprint, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    pub fn conversation_handle(&self, recipient_key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.open()?;
        let token = conn
            .query_row(
                "SELECT room_token FROM user_cache WHERE username = ?1",
                params![recipient_key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(token)
    }

    pub fn put_conversation_handle(
        &self,
        recipient_key: &str,
        room_token: &str,
    ) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO user_cache (username, room_token, cached_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO UPDATE SET
                room_token = excluded.room_token,
                cached_at = excluded.cached_at",
            params![recipient_key, room_token, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn open(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }
}
