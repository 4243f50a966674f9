//! Merge remote batches into the local store without duplication.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{find_note, find_patient, insert_note, insert_patient, update_note, update_patient};
use crate::db::{Database, DbError};
use crate::models::{now_millis, Note, Patient, SyncStatus};
use crate::remote::{RemoteNote, RemotePatient};

/// How a remote record is merged into an existing local one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Last fetch wins: remote fields overwrite local ones unconditionally,
    /// including notes with local changes that were never uploaded.
    RemoteWins,
    /// Remote wins, except a note with a local change not yet uploaded
    /// (`pending` or `failed`) is left alone until its upload succeeds.
    /// Patients are always taken from the remote.
    #[default]
    PreservePendingLocal,
}

/// A batch merge failed; nothing from the batch was applied.
#[derive(Error, Debug)]
#[error("Reconciliation of {kind} batch failed: {source}")]
pub struct ReconciliationFailed {
    pub kind: &'static str,
    #[source]
    pub source: DbError,
}

/// Counts from one reconciled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    /// Kept local under `MergePolicy::PreservePendingLocal`
    pub skipped: usize,
}

/// Batch upsert of remote records, matched by natural key.
pub struct Reconciler<'a> {
    db: &'a mut Database,
    policy: MergePolicy,
    clock: fn() -> i64,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a mut Database, policy: MergePolicy) -> Self {
        Self {
            db,
            policy,
            clock: now_millis,
        }
    }

    /// Use a different time source for `created_at`/`updated_at`.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Upsert a patient batch in a single transaction.
    pub fn reconcile_patients(
        &mut self,
        batch: &[RemotePatient],
    ) -> Result<ReconcileSummary, ReconciliationFailed> {
        let now = (self.clock)();

        self.db
            .write_transaction(|tx| {
                let mut summary = ReconcileSummary::default();
                for remote in batch {
                    match find_patient(tx, &remote.patient_id)? {
                        Some(mut existing) => {
                            existing.patient_initial = remote.patient_initial.clone();
                            existing.first_name = remote.first_name.clone();
                            existing.last_name = remote.last_name.clone();
                            existing.updated_at = now;
                            update_patient(tx, &existing)?;
                            summary.updated += 1;
                        }
                        None => {
                            let patient = Patient {
                                id: None,
                                patient_id: remote.patient_id.clone(),
                                patient_initial: remote.patient_initial.clone(),
                                first_name: remote.first_name.clone(),
                                last_name: remote.last_name.clone(),
                                created_at: now,
                                updated_at: now,
                            };
                            insert_patient(tx, &patient)?;
                            summary.created += 1;
                        }
                    }
                }
                Ok(summary)
            })
            .map_err(|source| ReconciliationFailed {
                kind: "patient",
                source,
            })
    }

    /// Upsert a note batch in a single transaction.
    ///
    /// Anything fetched from the server is by definition persisted there, so
    /// every merged note ends up `synced`.
    pub fn reconcile_notes(
        &mut self,
        batch: &[RemoteNote],
    ) -> Result<ReconcileSummary, ReconciliationFailed> {
        let now = (self.clock)();
        let policy = self.policy;

        self.db
            .write_transaction(|tx| {
                let mut summary = ReconcileSummary::default();
                for remote in batch {
                    match find_note(tx, &remote.note_id)? {
                        Some(existing)
                            if policy == MergePolicy::PreservePendingLocal
                                && existing.sync_status.is_upload_eligible() =>
                        {
                            tracing::debug!(
                                note_id = %existing.note_id,
                                status = %existing.sync_status,
                                "Keeping local note with unsent changes"
                            );
                            summary.skipped += 1;
                        }
                        Some(mut existing) => {
                            existing.patient_id = remote.patient_id.clone();
                            existing.session_type = remote.session_type.clone();
                            existing.conversation_id = remote.conversation_id.clone();
                            existing.encrypted_data = remote.encrypted_data.clone();
                            existing.is_deleted = remote.is_deleted;
                            existing.mark_synced();
                            existing.updated_at = now;
                            update_note(tx, &existing)?;
                            summary.updated += 1;
                        }
                        None => {
                            let note = Note {
                                id: None,
                                note_id: remote.note_id.clone(),
                                patient_id: remote.patient_id.clone(),
                                session_type: remote.session_type.clone(),
                                conversation_id: remote.conversation_id.clone(),
                                encrypted_data: remote.encrypted_data.clone(),
                                sync_status: SyncStatus::Synced,
                                is_deleted: remote.is_deleted,
                                is_synced: true,
                                created_at: now,
                                updated_at: now,
                                revision: 0,
                            };
                            insert_note(tx, &note)?;
                            summary.created += 1;
                        }
                    }
                }
                Ok(summary)
            })
            .map_err(|source| ReconciliationFailed {
                kind: "note",
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn remote_patient(id: &str, first: &str, last: &str) -> RemotePatient {
        RemotePatient {
            patient_id: id.into(),
            patient_initial: first[..1].into(),
            first_name: first.into(),
            last_name: last.into(),
        }
    }

    fn remote_note(id: &str, patient: &str, data: &str) -> RemoteNote {
        RemoteNote {
            note_id: id.into(),
            patient_id: patient.into(),
            session_type: "follow_up".into(),
            conversation_id: "conv-1".into(),
            encrypted_data: data.into(),
            is_deleted: false,
        }
    }

    fn clock_1000() -> i64 {
        1_000
    }

    fn clock_2000() -> i64 {
        2_000
    }

    #[test]
    fn test_reconcile_patients_creates() {
        let mut db = setup_db();
        let summary = Reconciler::new(&mut db, MergePolicy::RemoteWins)
            .with_clock(clock_1000)
            .reconcile_patients(&[remote_patient("P1", "Ada", "Lovelace")])
            .unwrap();

        assert_eq!(
            summary,
            ReconcileSummary {
                created: 1,
                updated: 0,
                skipped: 0
            }
        );
        let patient = db.get_patient("P1").unwrap().unwrap();
        assert_eq!(patient.first_name, "Ada");
        assert_eq!(patient.created_at, 1_000);
        assert_eq!(patient.updated_at, 1_000);
    }

    #[test]
    fn test_reconcile_patients_idempotent() {
        let mut db = setup_db();
        let batch = vec![remote_patient("P1", "Ada", "Lovelace")];

        Reconciler::new(&mut db, MergePolicy::RemoteWins)
            .with_clock(clock_1000)
            .reconcile_patients(&batch)
            .unwrap();
        let summary = Reconciler::new(&mut db, MergePolicy::RemoteWins)
            .with_clock(clock_2000)
            .reconcile_patients(&batch)
            .unwrap();

        assert_eq!(summary.created, 0);
        assert_eq!(summary.updated, 1);
        assert_eq!(db.count_patients().unwrap(), 1);

        let patient = db.get_patient("P1").unwrap().unwrap();
        assert_eq!(patient.created_at, 1_000);
        assert_eq!(patient.updated_at, 2_000);
    }

    #[test]
    fn test_remote_wins_over_local_patient_edit() {
        let mut db = setup_db();
        let mut local = Patient::new("P1".into(), "A".into(), "Augusta".into(), "King".into());
        local.created_at = 500;
        db.insert_patient(&local).unwrap();

        Reconciler::new(&mut db, MergePolicy::RemoteWins)
            .with_clock(clock_1000)
            .reconcile_patients(&[remote_patient("P1", "Ada", "Lovelace")])
            .unwrap();

        let patient = db.get_patient("P1").unwrap().unwrap();
        assert_eq!(patient.first_name, "Ada");
        assert_eq!(patient.last_name, "Lovelace");
        assert_eq!(patient.created_at, 500);
    }

    #[test]
    fn test_duplicate_keys_within_batch_collapse() {
        let mut db = setup_db();
        let batch = vec![
            remote_patient("P1", "Ada", "Lovelace"),
            remote_patient("P1", "Ada", "King"),
        ];

        let summary = Reconciler::new(&mut db, MergePolicy::RemoteWins)
            .reconcile_patients(&batch)
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(db.count_patients().unwrap(), 1);
        assert_eq!(db.get_patient("P1").unwrap().unwrap().last_name, "King");
    }

    #[test]
    fn test_reconcile_notes_marks_synced() {
        let mut db = setup_db();
        let mut local = Note::new("P1".into(), "initial".into(), "conv-1".into(), "old".into());
        local.note_id = "n1".into();
        local.mark_failed();
        db.insert_note(&local).unwrap();

        let summary = Reconciler::new(&mut db, MergePolicy::RemoteWins)
            .reconcile_notes(&[remote_note("n1", "P1", "new"), remote_note("n2", "P1", "blob")])
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);

        for id in ["n1", "n2"] {
            let note = db.get_note(id).unwrap().unwrap();
            assert_eq!(note.sync_status, SyncStatus::Synced);
            assert!(note.is_synced);
        }
        let n1 = db.get_note("n1").unwrap().unwrap();
        assert_eq!(n1.encrypted_data, "new");
        assert_eq!(n1.created_at, local.created_at);
    }

    #[test]
    fn test_preserve_pending_local_skips_unsent_notes() {
        let mut db = setup_db();
        let mut pending = Note::new("P1".into(), "initial".into(), "c".into(), "local edit".into());
        pending.note_id = "n1".into();
        db.insert_note(&pending).unwrap();

        let summary = Reconciler::new(&mut db, MergePolicy::PreservePendingLocal)
            .reconcile_notes(&[remote_note("n1", "P1", "stale remote")])
            .unwrap();

        assert_eq!(summary.skipped, 1);
        let note = db.get_note("n1").unwrap().unwrap();
        assert_eq!(note.encrypted_data, "local edit");
        assert_eq!(note.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let mut db = setup_db();
        // Make every note insert fail partway through the batch
        db.conn()
            .execute_batch(
                "CREATE TRIGGER reject_n2 BEFORE INSERT ON notes WHEN new.note_id = 'n2'
                 BEGIN SELECT RAISE(ABORT, 'storage fault'); END;",
            )
            .unwrap();

        let result = Reconciler::new(&mut db, MergePolicy::RemoteWins).reconcile_notes(&[
            remote_note("n1", "P1", "a"),
            remote_note("n2", "P1", "b"),
            remote_note("n3", "P1", "c"),
        ]);

        let err = result.unwrap_err();
        assert_eq!(err.kind, "note");
        assert_eq!(db.count_notes().unwrap(), 0);
    }
}
