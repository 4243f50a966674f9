//! Sync bookkeeping key/value store.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbResult};
use crate::models::now_millis;

/// Unix millis of the last completed sync cycle.
pub const LAST_SYNC_AT: &str = "last_sync_at";

/// Set sync state value.
pub fn set_sync_state(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_state (key, value, updated_at) VALUES (?, ?, ?)",
        params![key, value, now_millis()],
    )?;
    Ok(())
}

impl Database {
    /// Get sync state value.
    pub fn get_sync_state(&self, key: &str) -> DbResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Set sync state value.
    pub fn set_sync_state(&self, key: &str, value: &str) -> DbResult<()> {
        set_sync_state(&self.conn, key, value)
    }

    /// When the last sync cycle completed, if ever.
    pub fn last_sync_at(&self) -> DbResult<Option<i64>> {
        Ok(self
            .get_sync_state(LAST_SYNC_AT)?
            .and_then(|value| value.parse().ok()))
    }
}
