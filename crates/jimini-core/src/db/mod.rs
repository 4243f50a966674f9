//! Local store for patients and notes.

mod notes;
mod patients;
mod schema;
mod sync_state;

pub use notes::*;
pub use patients::*;
pub use schema::*;
pub use sync_state::*;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How long a writer waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `work` atomically: every write inside it is committed, or none is.
    ///
    /// The transaction takes the write lock up front (`BEGIN IMMEDIATE`), so
    /// concurrent writers are serialized rather than interleaved. Returning
    /// `Err` from `work` rolls everything back.
    pub fn write_transaction<T, F>(&mut self, work: F) -> DbResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> DbResult<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = work(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Map a UNIQUE violation to `DbError::Constraint`, anything else passes through.
pub(crate) fn map_unique_violation(err: rusqlite::Error, what: String) -> DbError {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DbError::Constraint(what)
        }
        other => DbError::Sqlite(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Patient;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        // Check that tables exist
        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"patients".to_string()));
        assert!(tables.contains(&"notes".to_string()));
        assert!(tables.contains(&"sync_state".to_string()));
    }

    #[test]
    fn test_write_transaction_commits() {
        let mut db = Database::open_in_memory().unwrap();

        db.write_transaction(|tx| {
            insert_patient(tx, &Patient::new("P1".into(), "A".into(), "Ada".into(), "L".into()))?;
            insert_patient(tx, &Patient::new("P2".into(), "G".into(), "Grace".into(), "H".into()))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.count_patients().unwrap(), 2);
    }

    #[test]
    fn test_write_transaction_rolls_back_on_error() {
        let mut db = Database::open_in_memory().unwrap();

        let result: DbResult<()> = db.write_transaction(|tx| {
            insert_patient(tx, &Patient::new("P1".into(), "A".into(), "Ada".into(), "L".into()))?;
            Err(DbError::Constraint("simulated storage fault".into()))
        });

        assert!(result.is_err());
        assert_eq!(db.count_patients().unwrap(), 0);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jimini.db");

        {
            let db = Database::open(&path).unwrap();
            db.insert_patient(&Patient::new("P1".into(), "A".into(), "Ada".into(), "L".into()))
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert!(db.get_patient("P1").unwrap().is_some());
    }
}
