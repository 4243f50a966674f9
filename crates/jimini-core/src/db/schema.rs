//! SQLite schema definition.

/// Complete database schema for the local store.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,        -- local surrogate id
    patient_id TEXT NOT NULL,                    -- natural key
    patient_initial TEXT NOT NULL DEFAULT '',
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,                 -- unix millis
    updated_at INTEGER NOT NULL                  -- unix millis
);

-- At most one local record per patient_id
CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_patient_id ON patients(patient_id);
CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(last_name, first_name);

-- ============================================================================
-- Notes
-- ============================================================================

-- patient_id is deliberately not a foreign key: notes may arrive before
-- the patient they belong to.
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    note_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    session_type TEXT NOT NULL DEFAULT '',
    conversation_id TEXT NOT NULL DEFAULT '',
    encrypted_data TEXT NOT NULL DEFAULT '',     -- opaque blob
    sync_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (sync_status IN ('pending', 'synced', 'failed')),
    is_deleted INTEGER NOT NULL DEFAULT 0,
    is_synced INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0,        -- local change counter
    CHECK (is_synced = (sync_status = 'synced'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_notes_note_id ON notes(note_id);
CREATE INDEX IF NOT EXISTS idx_notes_patient ON notes(patient_id);
CREATE INDEX IF NOT EXISTS idx_notes_conversation ON notes(conversation_id);
CREATE INDEX IF NOT EXISTS idx_notes_sync_status ON notes(sync_status);

-- ============================================================================
-- Sync State
-- ============================================================================

CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT 0
);

-- Unix millis of the last completed sync cycle
INSERT OR IGNORE INTO sync_state (key, value) VALUES ('last_sync_at', '');
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_patient_id_unique() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO patients (patient_id, created_at, updated_at) VALUES ('P1', 1, 1)",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO patients (patient_id, created_at, updated_at) VALUES ('P1', 2, 2)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sync_status_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        // Unknown status should fail
        let result = conn.execute(
            "INSERT INTO notes (note_id, patient_id, sync_status, created_at, updated_at)
             VALUES ('n1', 'P1', 'uploaded', 1, 1)",
            [],
        );
        assert!(result.is_err());

        // Synced without is_synced should fail
        let result = conn.execute(
            "INSERT INTO notes (note_id, patient_id, sync_status, is_synced, created_at, updated_at)
             VALUES ('n1', 'P1', 'synced', 0, 1, 1)",
            [],
        );
        assert!(result.is_err());

        // Pending with is_synced should fail
        let result = conn.execute(
            "INSERT INTO notes (note_id, patient_id, sync_status, is_synced, created_at, updated_at)
             VALUES ('n1', 'P1', 'pending', 1, 1, 1)",
            [],
        );
        assert!(result.is_err());

        // Consistent row should succeed
        let result = conn.execute(
            "INSERT INTO notes (note_id, patient_id, sync_status, is_synced, created_at, updated_at)
             VALUES ('n1', 'P1', 'synced', 1, 1, 1)",
            [],
        );
        assert!(result.is_ok());
    }
}
