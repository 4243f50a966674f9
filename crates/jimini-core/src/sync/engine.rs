//! Sync orchestrator: one guarded fetch → reconcile → upload cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use thiserror::Error;

use super::{MergePolicy, ReconciliationFailed, Reconciler};
use crate::db::{purge_confirmed_deletions, record_upload_status, set_sync_state};
use crate::db::{Database, DbError, LAST_SYNC_AT};
use crate::models::{now_millis, Note, SyncStatus};
use crate::remote::{
    validate_batch, NoteDto, NoteUpload, PatientDto, RemoteClient, RemoteError, RemoteNote,
    RemotePatient,
};

/// Cycle-level sync errors. Per-note upload failures are not errors; they
/// are reported in [`SyncReport::failed_uploads`].
#[derive(Error, Debug)]
pub enum SyncError {
    /// Another cycle holds the guard. Advisory: wait for the next trigger.
    #[error("Sync already in progress")]
    AlreadyInProgress,

    #[error("Fetch failed: {0}")]
    FetchFailed(#[from] RemoteError),

    #[error(transparent)]
    ReconciliationFailed(#[from] ReconciliationFailed),

    #[error("Local store error: {0}")]
    Store(#[from] DbError),
}

impl SyncError {
    /// True when the error only means "nothing was done this time".
    pub fn is_advisory(&self) -> bool {
        matches!(self, SyncError::AlreadyInProgress)
    }
}

/// A note whose upload failed this cycle; it stays eligible for the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub note_id: String,
    pub reason: String,
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub patients_created: usize,
    pub patients_updated: usize,
    pub notes_created: usize,
    pub notes_updated: usize,
    /// Remote notes not merged because of unsent local changes
    pub notes_skipped: usize,
    /// Remote records refused by validation
    pub rejected_records: usize,
    pub uploaded: usize,
    pub failed_uploads: Vec<UploadFailure>,
    /// Soft-deleted notes dropped after the server confirmed them
    pub purged: usize,
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Runs sync cycles against a shared local store and a remote client.
///
/// The store mutex is only held around store work, never across network
/// calls, so readers are not blocked by a slow server.
pub struct SyncEngine {
    db: Arc<Mutex<Database>>,
    remote: Arc<dyn RemoteClient>,
    policy: MergePolicy,
    syncing: AtomicBool,
}

/// Returns the engine to `Idle` when dropped, on every exit path.
struct CycleGuard<'a> {
    syncing: &'a AtomicBool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.syncing.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(db: Arc<Mutex<Database>>, remote: Arc<dyn RemoteClient>, policy: MergePolicy) -> Self {
        Self {
            db,
            remote,
            policy,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SyncState {
        if self.syncing.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.state() == SyncState::Syncing
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Atomically move Idle → Syncing. `None` if a cycle is already running.
    fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard {
                syncing: &self.syncing,
            })
    }

    fn lock_db(&self) -> MutexGuard<'_, Database> {
        // A panic while holding the lock can't leave a half-written batch:
        // the open transaction is rolled back when it is dropped.
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one full sync cycle.
    ///
    /// Returns `Err(SyncError::AlreadyInProgress)` without touching the store
    /// if another cycle is running. Fetch and reconciliation errors abort the
    /// cycle; the next trigger starts over from scratch.
    pub fn run_sync_cycle(&self) -> Result<SyncReport, SyncError> {
        let Some(_guard) = self.try_begin() else {
            tracing::info!("Sync already in progress, skipping trigger");
            return Err(SyncError::AlreadyInProgress);
        };

        let started = Instant::now();
        tracing::info!(policy = ?self.policy, "Starting sync cycle");

        let result = self.run_cycle();
        match &result {
            Ok(report) => tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                patients_created = report.patients_created,
                patients_updated = report.patients_updated,
                notes_created = report.notes_created,
                notes_updated = report.notes_updated,
                uploaded = report.uploaded,
                failed_uploads = report.failed_uploads.len(),
                "Sync cycle completed"
            ),
            Err(e) => tracing::error!(error = %e, "Sync cycle aborted"),
        }
        result
    }

    fn run_cycle(&self) -> Result<SyncReport, SyncError> {
        let (patient_dtos, note_dtos) = self.fetch_all()?;

        let (patients, rejected_patients): (Vec<RemotePatient>, usize) =
            validate_batch(patient_dtos, "patient");
        let (notes, rejected_notes): (Vec<RemoteNote>, usize) = validate_batch(note_dtos, "note");

        let mut report = SyncReport {
            rejected_records: rejected_patients + rejected_notes,
            ..Default::default()
        };

        // Patients before notes: notes may point at patients from this batch
        {
            let mut db = self.lock_db();
            let mut reconciler = Reconciler::new(&mut db, self.policy);

            let summary = reconciler.reconcile_patients(&patients)?;
            tracing::debug!(?summary, "Reconciled patients");
            report.patients_created = summary.created;
            report.patients_updated = summary.updated;

            let summary = reconciler.reconcile_notes(&notes)?;
            tracing::debug!(?summary, "Reconciled notes");
            report.notes_created = summary.created;
            report.notes_updated = summary.updated;
            report.notes_skipped = summary.skipped;
        }

        self.upload_pending(&mut report)?;

        let mut db = self.lock_db();
        report.purged = db.write_transaction(|tx| {
            let purged = purge_confirmed_deletions(tx)?;
            set_sync_state(tx, LAST_SYNC_AT, &now_millis().to_string())?;
            Ok(purged)
        })?;

        Ok(report)
    }

    /// Fetch both lists concurrently; either failure aborts the cycle.
    fn fetch_all(&self) -> Result<(Vec<PatientDto>, Vec<NoteDto>), SyncError> {
        let remote = self.remote.as_ref();
        thread::scope(|scope| -> Result<_, SyncError> {
            let patients = scope.spawn(|| remote.fetch_patients());
            let notes = remote.fetch_notes();
            let patients = patients.join().map_err(|_| {
                RemoteError::Unavailable("patient fetch panicked".to_string())
            })?;
            Ok((patients?, notes?))
        })
    }

    /// Upload every pending or failed note, each in isolation.
    fn upload_pending(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let eligible = self.lock_db().list_upload_eligible_notes()?;
        if !eligible.is_empty() {
            tracing::info!(count = eligible.len(), "Uploading local notes");
        }

        for note in eligible {
            match self.remote.upload_note(&NoteUpload::from(&note)) {
                Ok(()) => {
                    self.record_upload(&note, SyncStatus::Synced);
                    report.uploaded += 1;
                }
                Err(e) => {
                    tracing::warn!(note_id = %note.note_id, error = %e, "Failed to upload note");
                    self.record_upload(&note, SyncStatus::Failed);
                    report.failed_uploads.push(UploadFailure {
                        note_id: note.note_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Store one upload outcome in its own transaction. Failures here are
    /// logged only; the note stays eligible and is retried next cycle.
    fn record_upload(&self, note: &Note, status: SyncStatus) {
        let mut db = self.lock_db();
        let result = db.write_transaction(|tx| {
            record_upload_status(tx, &note.note_id, status, note.revision, now_millis())
        });
        match result {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                note_id = %note.note_id,
                "Note changed during upload, leaving it for the next cycle"
            ),
            Err(e) => tracing::warn!(
                note_id = %note.note_id,
                error = %e,
                "Could not record upload status"
            ),
        }
    }
}
