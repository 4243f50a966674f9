//! Jimini Core Library
//!
//! Offline-first storage and synchronization of patients and clinical notes
//! for the Jimini mobile client.
//!
//! # Architecture
//!
//! ```text
//!   Host scheduler ──┐         ┌── foreground "sync now"
//!   (background)     ▼         ▼
//!                 ┌──────────────────┐      ┌──────────────┐
//!                 │    SyncEngine    │◄────►│ RemoteClient │ ◄─► REST API
//!                 │  Idle ⇄ Syncing  │      └──────────────┘
//!                 └────────┬─────────┘
//!                          │ Reconciler (one transaction per batch)
//!                          ▼
//!                 ┌──────────────────┐
//!                 │  SQLite store    │ ◄── patient list / note screens
//!                 │ patients · notes │
//!                 └──────────────────┘
//! ```
//!
//! # Core Principle
//!
//! **Local writes never wait for the network.** Notes are written as
//! `pending` and uploaded by the next sync cycle; `sync_status` is the UI's
//! source of truth for what the server has.
//!
//! # Modules
//!
//! - [`db`]: SQLite local store
//! - [`models`]: Domain types (Patient, Note, SyncStatus)
//! - [`remote`]: Remote API client and wire DTOs
//! - [`sync`]: Reconciler and sync engine
//! - [`scheduler`]: Background-task and periodic triggers
//! - [`config`]: Sync configuration
//! - [`logging`]: tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod remote;
pub mod scheduler;
pub mod sync;

// Re-export commonly used types
pub use config::SyncConfig;
pub use db::Database;
pub use models::{Note, Patient, SyncStatus};
pub use remote::{HttpRemoteClient, RemoteClient};
pub use scheduler::{PeriodicScheduler, TaskCompletion};
pub use sync::{MergePolicy, Reconciler, SyncEngine, SyncError, SyncReport, SyncState};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum JiminiError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Sync error: {0}")]
    SyncError(String),
}

impl From<db::DbError> for JiminiError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => JiminiError::NotFound(what),
            db::DbError::Constraint(what) => JiminiError::InvalidInput(what),
            other => JiminiError::DatabaseError(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for JiminiError {
    fn from(e: config::ConfigError) -> Self {
        JiminiError::ConfigError(e.to_string())
    }
}

impl From<remote::RemoteError> for JiminiError {
    fn from(e: remote::RemoteError) -> Self {
        JiminiError::SyncError(e.to_string())
    }
}

impl From<sync::SyncError> for JiminiError {
    fn from(e: sync::SyncError) -> Self {
        JiminiError::SyncError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for JiminiError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        JiminiError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
///
/// `config_json` overrides the environment-derived configuration.
#[uniffi::export]
pub fn open_core(path: String, config_json: Option<String>) -> Result<Arc<JiminiCore>, JiminiError> {
    let config = load_config(config_json)?;
    let db = Database::open(&path)?;
    JiminiCore::with_http(db, &config)
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_core_in_memory(config_json: Option<String>) -> Result<Arc<JiminiCore>, JiminiError> {
    let config = load_config(config_json)?;
    let db = Database::open_in_memory()?;
    JiminiCore::with_http(db, &config)
}

/// Install the Rust-side log subscriber. Returns false if one was already set.
#[uniffi::export]
pub fn init_logging(default_filter: String) -> bool {
    logging::init_logging(&default_filter)
}

fn load_config(config_json: Option<String>) -> Result<SyncConfig, JiminiError> {
    Ok(match config_json {
        Some(json) => SyncConfig::from_json(&json)?,
        None => SyncConfig::from_env()?,
    })
}

// =========================================================================
// Background Task Host (implemented by the mobile app)
// =========================================================================

/// Completes tasks handed out by the platform's background-fetch runner.
#[uniffi::export(callback_interface)]
pub trait BackgroundTaskHost: Send + Sync {
    fn finish(&self, task_id: String);
}

struct ForeignTaskHost(Box<dyn BackgroundTaskHost>);

impl TaskCompletion for ForeignTaskHost {
    fn finish(&self, task_id: &str) {
        self.0.finish(task_id.to_string());
    }
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe store and sync engine for FFI.
#[derive(uniffi::Object)]
pub struct JiminiCore {
    db: Arc<Mutex<Database>>,
    engine: SyncEngine,
}

impl JiminiCore {
    fn with_http(db: Database, config: &SyncConfig) -> Result<Arc<Self>, JiminiError> {
        let remote = HttpRemoteClient::new(config)?;
        tracing::info!(
            api_base_url = remote.base_url(),
            environment = %config.environment,
            "Opened Jimini core"
        );
        Ok(Self::with_remote(db, Arc::new(remote), config.merge_policy))
    }

    /// Build around any remote client (used by tests and non-HTTP hosts).
    pub fn with_remote(
        db: Database,
        remote: Arc<dyn RemoteClient>,
        policy: MergePolicy,
    ) -> Arc<Self> {
        let db = Arc::new(Mutex::new(db));
        Arc::new(Self {
            engine: SyncEngine::new(db.clone(), remote, policy),
            db,
        })
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }
}

#[uniffi::export]
impl JiminiCore {
    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Register a patient locally.
    pub fn register_patient(
        &self,
        patient_id: String,
        patient_initial: String,
        first_name: String,
        last_name: String,
    ) -> Result<FfiPatient, JiminiError> {
        if patient_id.trim().is_empty() {
            return Err(JiminiError::InvalidInput("patient_id must not be empty".into()));
        }
        let db = self.db.lock()?;
        let mut patient = Patient::new(patient_id, patient_initial, first_name, last_name);
        patient.id = Some(db.insert_patient(&patient)?);
        Ok(patient.into())
    }

    /// Get a patient by `patient_id`.
    pub fn get_patient(&self, patient_id: String) -> Result<Option<FfiPatient>, JiminiError> {
        let db = self.db.lock()?;
        let patient = db.get_patient(&patient_id)?;
        Ok(patient.map(|p| p.into()))
    }

    /// All patients, ordered by name.
    pub fn list_patients(&self) -> Result<Vec<FfiPatient>, JiminiError> {
        let db = self.db.lock()?;
        let patients = db.list_patients()?;
        Ok(patients.into_iter().map(|p| p.into()).collect())
    }

    // =========================================================================
    // Note Operations
    // =========================================================================

    /// Write a new note; it is uploaded by the next sync cycle.
    pub fn create_note(
        &self,
        patient_id: String,
        session_type: String,
        conversation_id: String,
        encrypted_data: String,
    ) -> Result<FfiNote, JiminiError> {
        if patient_id.trim().is_empty() {
            return Err(JiminiError::InvalidInput("patient_id must not be empty".into()));
        }
        let db = self.db.lock()?;
        let mut note = Note::new(patient_id, session_type, conversation_id, encrypted_data);
        note.id = Some(db.insert_note(&note)?);
        Ok(note.into())
    }

    /// Replace a note's encrypted payload.
    pub fn update_note_data(
        &self,
        note_id: String,
        encrypted_data: String,
    ) -> Result<FfiNote, JiminiError> {
        let db = self.db.lock()?;
        let note = db.update_note_data(&note_id, encrypted_data)?;
        Ok(note.into())
    }

    /// Soft-delete a note.
    pub fn delete_note(&self, note_id: String) -> Result<(), JiminiError> {
        let db = self.db.lock()?;
        db.soft_delete_note(&note_id)?;
        Ok(())
    }

    /// Get a note by `note_id`.
    pub fn get_note(&self, note_id: String) -> Result<Option<FfiNote>, JiminiError> {
        let db = self.db.lock()?;
        let note = db.get_note(&note_id)?;
        Ok(note.map(|n| n.into()))
    }

    /// A patient's notes, deleted ones excluded.
    pub fn list_notes_for_patient(&self, patient_id: String) -> Result<Vec<FfiNote>, JiminiError> {
        let db = self.db.lock()?;
        let notes = db.list_notes_for_patient(&patient_id)?;
        Ok(notes.into_iter().map(|n| n.into()).collect())
    }

    // =========================================================================
    // Sync Operations
    // =========================================================================

    /// Run a sync cycle now. A cycle already in progress yields `skipped`.
    pub fn run_sync_cycle(&self) -> Result<FfiSyncReport, JiminiError> {
        match self.engine.run_sync_cycle() {
            Ok(report) => Ok(report.into()),
            Err(e) if e.is_advisory() => Ok(FfiSyncReport::skipped()),
            Err(e) => Err(e.into()),
        }
    }

    /// Background-fetch entry point. Always finishes `task_id` on `host`.
    pub fn run_background_sync(&self, task_id: String, host: Box<dyn BackgroundTaskHost>) {
        let host = ForeignTaskHost(host);
        // Outcome is logged by the engine; the host only needs the finish call
        let _ = self.engine.run_background_task(&task_id, &host);
    }

    /// The host's background-fetch timeout fired for `task_id`.
    pub fn expire_background_sync(&self, task_id: String, host: Box<dyn BackgroundTaskHost>) {
        self.engine
            .expire_background_task(&task_id, &ForeignTaskHost(host));
    }

    pub fn is_syncing(&self) -> bool {
        self.engine.is_syncing()
    }

    /// Unix millis of the last completed cycle.
    pub fn last_sync_at(&self) -> Result<Option<i64>, JiminiError> {
        let db = self.db.lock()?;
        Ok(db.last_sync_at()?)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub patient_id: String,
    pub patient_initial: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            patient_id: patient.patient_id,
            patient_initial: patient.patient_initial,
            first_name: patient.first_name,
            last_name: patient.last_name,
            created_at: patient.created_at,
            updated_at: patient.updated_at,
        }
    }
}

/// FFI-safe note.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNote {
    pub note_id: String,
    pub patient_id: String,
    pub session_type: String,
    pub conversation_id: String,
    pub encrypted_data: String,
    pub sync_status: String,
    pub is_deleted: bool,
    pub is_synced: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Note> for FfiNote {
    fn from(note: Note) -> Self {
        Self {
            note_id: note.note_id,
            patient_id: note.patient_id,
            session_type: note.session_type,
            conversation_id: note.conversation_id,
            encrypted_data: note.encrypted_data,
            sync_status: note.sync_status.as_str().to_string(),
            is_deleted: note.is_deleted,
            is_synced: note.is_synced,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

/// FFI-safe cycle result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncReport {
    /// Another cycle was running; nothing was done
    pub skipped: bool,
    pub patients_created: u32,
    pub patients_updated: u32,
    pub notes_created: u32,
    pub notes_updated: u32,
    pub rejected_records: u32,
    pub uploaded: u32,
    pub failed_note_ids: Vec<String>,
}

impl FfiSyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            patients_created: 0,
            patients_updated: 0,
            notes_created: 0,
            notes_updated: 0,
            rejected_records: 0,
            uploaded: 0,
            failed_note_ids: Vec::new(),
        }
    }
}

impl From<SyncReport> for FfiSyncReport {
    fn from(report: SyncReport) -> Self {
        Self {
            skipped: false,
            patients_created: report.patients_created as u32,
            patients_updated: report.patients_updated as u32,
            notes_created: report.notes_created as u32,
            notes_updated: report.notes_updated as u32,
            rejected_records: report.rejected_records as u32,
            uploaded: report.uploaded as u32,
            failed_note_ids: report
                .failed_uploads
                .into_iter()
                .map(|f| f.note_id)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{NoteDto, NoteUpload, PatientDto, RemoteResult};

    struct EmptyRemote;

    impl RemoteClient for EmptyRemote {
        fn fetch_patients(&self) -> RemoteResult<Vec<PatientDto>> {
            Ok(vec![])
        }

        fn fetch_notes(&self) -> RemoteResult<Vec<NoteDto>> {
            Ok(vec![])
        }

        fn upload_note(&self, _note: &NoteUpload) -> RemoteResult<()> {
            Ok(())
        }
    }

    fn core() -> Arc<JiminiCore> {
        JiminiCore::with_remote(
            Database::open_in_memory().unwrap(),
            Arc::new(EmptyRemote),
            MergePolicy::default(),
        )
    }

    #[test]
    fn test_open_core_in_memory_with_config() {
        let core =
            open_core_in_memory(Some(r#"{"api_base_url": "https://api.example.com"}"#.into()));
        assert!(core.is_ok());

        let bad = open_core_in_memory(Some(r#"{"api_base_url": "ftp://nope"}"#.into()));
        assert!(matches!(bad, Err(JiminiError::ConfigError(_))));
    }

    #[test]
    fn test_register_and_list_patients() {
        let core = core();
        core.register_patient("P1".into(), "A".into(), "Ada".into(), "Lovelace".into())
            .unwrap();

        let duplicate =
            core.register_patient("P1".into(), "A".into(), "Ada".into(), "Lovelace".into());
        assert!(matches!(duplicate, Err(JiminiError::InvalidInput(_))));

        let patients = core.list_patients().unwrap();
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].first_name, "Ada");
    }

    #[test]
    fn test_note_lifecycle_over_ffi() {
        let core = core();
        let note = core
            .create_note("P1".into(), "initial".into(), "c1".into(), "blob".into())
            .unwrap();
        assert_eq!(note.sync_status, "pending");

        let report = core.run_sync_cycle().unwrap();
        assert!(!report.skipped);
        assert_eq!(report.uploaded, 1);

        let synced = core.get_note(note.note_id.clone()).unwrap().unwrap();
        assert_eq!(synced.sync_status, "synced");
        assert!(synced.is_synced);

        let edited = core
            .update_note_data(note.note_id.clone(), "blob v2".into())
            .unwrap();
        assert_eq!(edited.sync_status, "pending");

        core.delete_note(note.note_id.clone()).unwrap();
        assert!(core.list_notes_for_patient("P1".into()).unwrap().is_empty());

        // Deletion uploaded and confirmed, then purged
        core.run_sync_cycle().unwrap();
        assert!(core.get_note(note.note_id).unwrap().is_none());
        assert!(core.last_sync_at().unwrap().is_some());
    }

    #[test]
    fn test_remote_error_is_sync_error() {
        let err: JiminiError = remote::RemoteError::Status {
            status: 503,
            body: "maintenance".into(),
        }
        .into();
        assert!(matches!(err, JiminiError::SyncError(ref msg) if msg.contains("503")));
    }

    #[test]
    fn test_missing_note_is_not_found() {
        let core = core();
        assert!(matches!(
            core.update_note_data("nope".into(), "x".into()),
            Err(JiminiError::NotFound(_))
        ));
    }
}
