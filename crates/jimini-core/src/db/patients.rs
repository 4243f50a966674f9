//! Patient database operations.
//!
//! The free functions take a `&Connection` so the reconciler can run them
//! inside a `write_transaction` (a `Transaction` derefs to `Connection`).
//! The `Database` methods are the same operations on the plain connection.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{map_unique_violation, Database, DbResult};
use crate::models::Patient;

const PATIENT_COLUMNS: &str =
    "id, patient_id, patient_initial, first_name, last_name, created_at, updated_at";

/// Equality filters for patient queries.
#[derive(Debug, Clone, PartialEq)]
pub enum PatientFilter {
    All,
    PatientId(String),
}

/// Insert a new patient, returning the local surrogate id.
pub fn insert_patient(conn: &Connection, patient: &Patient) -> DbResult<i64> {
    conn.execute(
        r#"
        INSERT INTO patients (
            patient_id, patient_initial, first_name, last_name, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            patient.patient_id,
            patient.patient_initial,
            patient.first_name,
            patient.last_name,
            patient.created_at,
            patient.updated_at,
        ],
    )
    .map_err(|e| map_unique_violation(e, format!("patient {} already exists", patient.patient_id)))?;
    Ok(conn.last_insert_rowid())
}

/// Update the mutable fields of a patient matched by `patient_id`.
///
/// `created_at` is never written.
pub fn update_patient(conn: &Connection, patient: &Patient) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE patients SET
            patient_initial = ?2,
            first_name = ?3,
            last_name = ?4,
            updated_at = ?5
        WHERE patient_id = ?1
        "#,
        params![
            patient.patient_id,
            patient.patient_initial,
            patient.first_name,
            patient.last_name,
            patient.updated_at,
        ],
    )?;
    Ok(rows_affected > 0)
}

/// Look up a patient by natural key (indexed).
pub fn find_patient(conn: &Connection, patient_id: &str) -> DbResult<Option<Patient>> {
    conn.query_row(
        &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE patient_id = ?"),
        [patient_id],
        patient_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Run an equality query against the patients table.
pub fn query_patients(conn: &Connection, filter: &PatientFilter) -> DbResult<Vec<Patient>> {
    let patients = match filter {
        PatientFilter::All => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PATIENT_COLUMNS} FROM patients ORDER BY last_name, first_name, patient_id"
            ))?;
            let rows = stmt.query_map([], patient_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        PatientFilter::PatientId(patient_id) => {
            find_patient(conn, patient_id)?.into_iter().collect()
        }
    };
    Ok(patients)
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_initial: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Database {
    /// Insert a new patient.
    pub fn insert_patient(&self, patient: &Patient) -> DbResult<i64> {
        insert_patient(&self.conn, patient)
    }

    /// Get a patient by `patient_id`.
    pub fn get_patient(&self, patient_id: &str) -> DbResult<Option<Patient>> {
        find_patient(&self.conn, patient_id)
    }

    /// All patients, ordered for display.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        query_patients(&self.conn, &PatientFilter::All)
    }

    pub fn query_patients(&self, filter: &PatientFilter) -> DbResult<Vec<Patient>> {
        query_patients(&self.conn, filter)
    }

    pub fn count_patients(&self) -> DbResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
