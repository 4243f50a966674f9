//! Patient models.

use serde::{Deserialize, Serialize};

use super::now_millis;

/// A patient record keyed by its server-assigned `patient_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Local surrogate id - assigned by the store, `None` until inserted
    pub id: Option<i64>,
    /// Natural key, stable across devices and the server
    pub patient_id: String,
    /// Initial shown in the patient list avatar
    pub patient_initial: String,
    pub first_name: String,
    pub last_name: String,
    /// Creation timestamp (unix millis), never changes once set
    pub created_at: i64,
    /// Last local or remote-driven change (unix millis)
    pub updated_at: i64,
}

impl Patient {
    /// Create a new, not yet persisted patient.
    pub fn new(
        patient_id: String,
        patient_initial: String,
        first_name: String,
        last_name: String,
    ) -> Self {
        let now = now_millis();
        Self {
            id: None,
            patient_id,
            patient_initial,
            first_name,
            last_name,
            created_at: now,
            updated_at: now,
        }
    }

    /// "First Last", skipping empty parts.
    pub fn full_name(&self) -> String {
        [self.first_name.trim(), self.last_name.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
