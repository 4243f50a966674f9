//! Clinical note models and the sync-status state machine.

use serde::{Deserialize, Serialize};

use super::now_millis;

/// Sync lifecycle of a note with respect to server acknowledgment.
///
/// ```text
///            upload ok
///  Pending ───────────────► Synced
///     │  ▲                    │
///     │  │ local edit/delete  │
///     │  └────────────────────┘
///     │ upload error
///     ▼
///  Failed ── retried next cycle (ok → Synced, error → Failed)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Written locally, not yet acknowledged by the server
    Pending,
    /// Server holds this exact version
    Synced,
    /// Last upload attempt failed; still eligible for upload
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }

    /// Notes in this state are picked up by the upload stage of a cycle.
    pub fn is_upload_eligible(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A clinical note. The payload is an encrypted blob this crate never reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    /// Local surrogate id - assigned by the store, `None` until inserted
    pub id: Option<i64>,
    /// Natural key
    pub note_id: String,
    /// Owning patient's natural key (may arrive before the patient does)
    pub patient_id: String,
    pub session_type: String,
    pub conversation_id: String,
    /// Opaque encrypted payload
    pub encrypted_data: String,
    pub sync_status: SyncStatus,
    /// Soft-delete flag, kept until the server confirms the deletion
    pub is_deleted: bool,
    /// Cached `sync_status == Synced`
    pub is_synced: bool,
    /// Creation timestamp (unix millis)
    pub created_at: i64,
    /// Last update timestamp (unix millis)
    pub updated_at: i64,
    /// Bumped on every local change; upload outcomes are recorded against it
    pub revision: i64,
}

impl Note {
    /// Create a note written locally, waiting for upload.
    pub fn new(
        patient_id: String,
        session_type: String,
        conversation_id: String,
        encrypted_data: String,
    ) -> Self {
        let now = now_millis();
        Self {
            id: None,
            note_id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            session_type,
            conversation_id,
            encrypted_data,
            sync_status: SyncStatus::Pending,
            is_deleted: false,
            is_synced: false,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Set the status and keep `is_synced` in step with it.
    pub fn set_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
        self.is_synced = status == SyncStatus::Synced;
    }

    pub fn mark_synced(&mut self) {
        self.set_status(SyncStatus::Synced);
    }

    pub fn mark_failed(&mut self) {
        self.set_status(SyncStatus::Failed);
    }

    /// Replace the payload after a local edit; the note goes back to pending.
    pub fn edit(&mut self, encrypted_data: String) {
        self.encrypted_data = encrypted_data;
        self.set_status(SyncStatus::Pending);
        self.touch();
    }

    /// Soft-delete locally; the deletion itself still has to be uploaded.
    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
        self.set_status(SyncStatus::Pending);
        self.touch();
    }

    /// Record a local change: new revision, fresh timestamp.
    pub fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = now_millis();
    }

    /// Check the `is_synced` cache agrees with `sync_status`.
    pub fn status_consistent(&self) -> bool {
        self.is_synced == (self.sync_status == SyncStatus::Synced)
    }
}
