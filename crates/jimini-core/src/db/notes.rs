//! Note database operations.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{map_unique_violation, Database, DbError, DbResult};
use crate::models::{Note, SyncStatus};

const NOTE_COLUMNS: &str = "id, note_id, patient_id, session_type, conversation_id, \
     encrypted_data, sync_status, is_deleted, is_synced, created_at, updated_at, revision";

/// Equality filters for note queries.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteFilter {
    All,
    NoteId(String),
    /// A patient's notes as shown to the clinician: soft-deleted notes excluded
    VisibleForPatient(String),
    ConversationId(String),
    Status(SyncStatus),
    /// Everything the next upload stage would send (`pending` or `failed`)
    UploadEligible,
}

impl NoteFilter {
    fn where_clause(&self) -> (&'static str, Vec<String>) {
        match self {
            NoteFilter::All => ("1 = 1", vec![]),
            NoteFilter::NoteId(id) => ("note_id = ?", vec![id.clone()]),
            NoteFilter::VisibleForPatient(id) => {
                ("patient_id = ? AND is_deleted = 0", vec![id.clone()])
            }
            NoteFilter::ConversationId(id) => ("conversation_id = ?", vec![id.clone()]),
            NoteFilter::Status(status) => ("sync_status = ?", vec![status.as_str().to_string()]),
            NoteFilter::UploadEligible => ("sync_status IN ('pending', 'failed')", vec![]),
        }
    }
}

/// Insert a new note, returning the local surrogate id.
pub fn insert_note(conn: &Connection, note: &Note) -> DbResult<i64> {
    conn.execute(
        r#"
        INSERT INTO notes (
            note_id, patient_id, session_type, conversation_id, encrypted_data,
            sync_status, is_deleted, is_synced, created_at, updated_at, revision
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            note.note_id,
            note.patient_id,
            note.session_type,
            note.conversation_id,
            note.encrypted_data,
            note.sync_status.as_str(),
            note.is_deleted,
            note.is_synced,
            note.created_at,
            note.updated_at,
            note.revision,
        ],
    )
    .map_err(|e| map_unique_violation(e, format!("note {} already exists", note.note_id)))?;
    Ok(conn.last_insert_rowid())
}

/// Update every mutable field of a note matched by `note_id`.
///
/// `created_at` is never written.
pub fn update_note(conn: &Connection, note: &Note) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE notes SET
            patient_id = ?2,
            session_type = ?3,
            conversation_id = ?4,
            encrypted_data = ?5,
            sync_status = ?6,
            is_deleted = ?7,
            is_synced = ?8,
            updated_at = ?9,
            revision = ?10
        WHERE note_id = ?1
        "#,
        params![
            note.note_id,
            note.patient_id,
            note.session_type,
            note.conversation_id,
            note.encrypted_data,
            note.sync_status.as_str(),
            note.is_deleted,
            note.is_synced,
            note.updated_at,
            note.revision,
        ],
    )?;
    Ok(rows_affected > 0)
}

/// Record an upload outcome, unless the note was edited while uploading.
///
/// Only matches the `revision` that was sent, so a local edit made during the
/// upload stays pending instead of being marked synced.
pub fn record_upload_status(
    conn: &Connection,
    note_id: &str,
    status: SyncStatus,
    sent_revision: i64,
    updated_at: i64,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE notes SET sync_status = ?2, is_synced = ?3, updated_at = ?5
        WHERE note_id = ?1 AND revision = ?4
        "#,
        params![
            note_id,
            status.as_str(),
            status == SyncStatus::Synced,
            sent_revision,
            updated_at
        ],
    )?;
    Ok(rows_affected > 0)
}

/// Look up a note by natural key (indexed).
pub fn find_note(conn: &Connection, note_id: &str) -> DbResult<Option<Note>> {
    conn.query_row(
        &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE note_id = ?"),
        [note_id],
        note_row,
    )
    .optional()?
    .map(Note::try_from)
    .transpose()
}

/// Run an equality query against the notes table, oldest first.
pub fn query_notes(conn: &Connection, filter: &NoteFilter) -> DbResult<Vec<Note>> {
    let (clause, values) = filter.where_clause();
    let mut stmt = conn.prepare(&format!(
        "SELECT {NOTE_COLUMNS} FROM notes WHERE {clause} ORDER BY created_at, id"
    ))?;

    let rows = stmt.query_map(params_from_iter(values.iter()), note_row)?;

    let mut notes = Vec::new();
    for row in rows {
        notes.push(row?.try_into()?);
    }
    Ok(notes)
}

/// Drop soft-deleted notes the server has acknowledged.
pub fn purge_confirmed_deletions(conn: &Connection) -> DbResult<usize> {
    let removed = conn.execute(
        "DELETE FROM notes WHERE is_deleted = 1 AND sync_status = 'synced'",
        [],
    )?;
    Ok(removed)
}

impl Database {
    /// Insert a new note.
    pub fn insert_note(&self, note: &Note) -> DbResult<i64> {
        insert_note(&self.conn, note)
    }

    /// Persist a locally modified note.
    pub fn save_note(&self, note: &Note) -> DbResult<()> {
        if update_note(&self.conn, note)? {
            Ok(())
        } else {
            Err(DbError::NotFound(note.note_id.clone()))
        }
    }

    /// Replace a note's encrypted payload; the note goes back to pending.
    pub fn update_note_data(&self, note_id: &str, encrypted_data: String) -> DbResult<Note> {
        let mut note = self.get_live_note(note_id)?;
        note.edit(encrypted_data);
        self.save_note(&note)?;
        Ok(note)
    }

    /// Soft-delete a note. It stays stored until the server confirms.
    pub fn soft_delete_note(&self, note_id: &str) -> DbResult<Note> {
        let mut note = self.get_live_note(note_id)?;
        note.soft_delete();
        self.save_note(&note)?;
        Ok(note)
    }

    fn get_live_note(&self, note_id: &str) -> DbResult<Note> {
        find_note(&self.conn, note_id)?
            .filter(|note| !note.is_deleted)
            .ok_or_else(|| DbError::NotFound(note_id.to_string()))
    }

    /// Get a note by `note_id`, including soft-deleted notes.
    pub fn get_note(&self, note_id: &str) -> DbResult<Option<Note>> {
        find_note(&self.conn, note_id)
    }

    /// A patient's notes, soft-deleted ones excluded.
    pub fn list_notes_for_patient(&self, patient_id: &str) -> DbResult<Vec<Note>> {
        query_notes(
            &self.conn,
            &NoteFilter::VisibleForPatient(patient_id.to_string()),
        )
    }

    /// Notes waiting for upload (`pending` or `failed`).
    pub fn list_upload_eligible_notes(&self) -> DbResult<Vec<Note>> {
        query_notes(&self.conn, &NoteFilter::UploadEligible)
    }

    pub fn query_notes(&self, filter: &NoteFilter) -> DbResult<Vec<Note>> {
        query_notes(&self.conn, filter)
    }

    pub fn count_notes(&self) -> DbResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Intermediate row struct for database mapping.
struct NoteRow {
    id: i64,
    note_id: String,
    patient_id: String,
    session_type: String,
    conversation_id: String,
    encrypted_data: String,
    sync_status: String,
    is_deleted: bool,
    is_synced: bool,
    created_at: i64,
    updated_at: i64,
    revision: i64,
}

fn note_row(row: &Row<'_>) -> rusqlite::Result<NoteRow> {
    Ok(NoteRow {
        id: row.get(0)?,
        note_id: row.get(1)?,
        patient_id: row.get(2)?,
        session_type: row.get(3)?,
        conversation_id: row.get(4)?,
        encrypted_data: row.get(5)?,
        sync_status: row.get(6)?,
        is_deleted: row.get(7)?,
        is_synced: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        revision: row.get(11)?,
    })
}

impl TryFrom<NoteRow> for Note {
    type Error = DbError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        let sync_status = SyncStatus::parse(&row.sync_status).ok_or_else(|| {
            DbError::Constraint(format!("Invalid sync status: {}", row.sync_status))
        })?;

        Ok(Note {
            id: Some(row.id),
            note_id: row.note_id,
            patient_id: row.patient_id,
            session_type: row.session_type,
            conversation_id: row.conversation_id,
            encrypted_data: row.encrypted_data,
            sync_status,
            is_deleted: row.is_deleted,
            is_synced: row.is_synced,
            created_at: row.created_at,
            updated_at: row.updated_at,
            revision: row.revision,
        })
    }
}
