//! Wire DTOs and their validation into reconciler input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Note, SyncStatus};

/// Why a remote record was refused before reconciliation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DtoError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown sync_status `{0}`")]
    InvalidSyncStatus(String),
}

/// Patient as sent by the server. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PatientDto {
    #[serde(alias = "id")]
    pub patient_id: Option<String>,
    pub patient_initial: Option<String>,
    #[serde(alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(alias = "lastName")]
    pub last_name: Option<String>,
}

/// Note as sent by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoteDto {
    #[serde(alias = "id")]
    pub note_id: Option<String>,
    pub patient_id: Option<String>,
    #[serde(alias = "sessionType")]
    pub session_type: Option<String>,
    pub conversation_id: Option<String>,
    pub encrypted_data: Option<String>,
    #[serde(alias = "syncStatus")]
    pub sync_status: Option<String>,
    pub is_deleted: Option<bool>,
}

/// Validated remote patient, ready for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePatient {
    pub patient_id: String,
    pub patient_initial: String,
    pub first_name: String,
    pub last_name: String,
}

/// Validated remote note, ready for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNote {
    pub note_id: String,
    pub patient_id: String,
    pub session_type: String,
    pub conversation_id: String,
    pub encrypted_data: String,
    pub is_deleted: bool,
}

/// Body of `POST /notes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteUpload {
    pub note_id: String,
    pub patient_id: String,
    pub session_type: String,
    pub conversation_id: String,
    pub encrypted_data: String,
    pub is_deleted: bool,
}

impl From<&Note> for NoteUpload {
    fn from(note: &Note) -> Self {
        Self {
            note_id: note.note_id.clone(),
            patient_id: note.patient_id.clone(),
            session_type: note.session_type.clone(),
            conversation_id: note.conversation_id.clone(),
            encrypted_data: note.encrypted_data.clone(),
            is_deleted: note.is_deleted,
        }
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DtoError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(DtoError::MissingField(field))
}

impl TryFrom<PatientDto> for RemotePatient {
    type Error = DtoError;

    fn try_from(dto: PatientDto) -> Result<Self, Self::Error> {
        let patient_id = required(dto.patient_id, "patient_id")?;
        let first_name = dto.first_name.unwrap_or_default();
        let last_name = dto.last_name.unwrap_or_default();
        // Fall back to the first letter of the first name
        let patient_initial = dto
            .patient_initial
            .filter(|i| !i.trim().is_empty())
            .unwrap_or_else(|| {
                first_name
                    .trim()
                    .chars()
                    .next()
                    .map(|c| c.to_uppercase().collect())
                    .unwrap_or_default()
            });

        Ok(Self {
            patient_id,
            patient_initial,
            first_name,
            last_name,
        })
    }
}

impl TryFrom<NoteDto> for RemoteNote {
    type Error = DtoError;

    fn try_from(dto: NoteDto) -> Result<Self, Self::Error> {
        let note_id = required(dto.note_id, "note_id")?;
        let patient_id = required(dto.patient_id, "patient_id")?;
        if let Some(status) = dto.sync_status.as_deref() {
            if SyncStatus::parse(status).is_none() {
                return Err(DtoError::InvalidSyncStatus(status.to_string()));
            }
        }

        Ok(Self {
            note_id,
            patient_id,
            session_type: dto.session_type.unwrap_or_default(),
            conversation_id: dto.conversation_id.unwrap_or_default(),
            encrypted_data: dto.encrypted_data.unwrap_or_default(),
            is_deleted: dto.is_deleted.unwrap_or(false),
        })
    }
}

/// Validate a batch, logging and counting every refused record.
///
/// Returns the accepted records in input order and the number rejected.
pub fn validate_batch<D, R>(batch: Vec<D>, kind: &'static str) -> (Vec<R>, usize)
where
    R: TryFrom<D, Error = DtoError>,
{
    let mut accepted = Vec::with_capacity(batch.len());
    let mut rejected = 0;
    for (index, dto) in batch.into_iter().enumerate() {
        match R::try_from(dto) {
            Ok(record) => accepted.push(record),
            Err(e) => {
                rejected += 1;
                tracing::warn!(kind, index, error = %e, "Rejected malformed remote record");
            }
        }
    }
    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_dto_from_snake_case() {
        let dto: PatientDto = serde_json::from_str(
            r#"{"patient_id": "P1", "first_name": "Ada", "last_name": "Lovelace"}"#,
        )
        .unwrap();
        let patient = RemotePatient::try_from(dto).unwrap();
        assert_eq!(patient.patient_id, "P1");
        assert_eq!(patient.first_name, "Ada");
        assert_eq!(patient.patient_initial, "A");
    }

    #[test]
    fn test_patient_dto_from_api_naming() {
        let dto: PatientDto = serde_json::from_str(
            r#"{"id": "P2", "firstName": "grace", "lastName": "Hopper", "createdAt": "2024-01-01T00:00:00"}"#,
        )
        .unwrap();
        let patient = RemotePatient::try_from(dto).unwrap();
        assert_eq!(patient.patient_id, "P2");
        assert_eq!(patient.last_name, "Hopper");
        assert_eq!(patient.patient_initial, "G");
    }

    #[test]
    fn test_patient_without_id_rejected() {
        let dto = PatientDto {
            patient_id: Some("   ".into()),
            first_name: Some("Ada".into()),
            ..Default::default()
        };
        assert_eq!(
            RemotePatient::try_from(dto),
            Err(DtoError::MissingField("patient_id"))
        );
    }

    #[test]
    fn test_note_defaults() {
        let dto: NoteDto =
            serde_json::from_str(r#"{"note_id": "n1", "patient_id": "P1"}"#).unwrap();
        let note = RemoteNote::try_from(dto).unwrap();
        assert!(!note.is_deleted);
        assert_eq!(note.encrypted_data, "");
    }

    #[test]
    fn test_note_validation() {
        let missing_patient = NoteDto {
            note_id: Some("n1".into()),
            ..Default::default()
        };
        assert_eq!(
            RemoteNote::try_from(missing_patient),
            Err(DtoError::MissingField("patient_id"))
        );

        let bad_status = NoteDto {
            note_id: Some("n1".into()),
            patient_id: Some("P1".into()),
            sync_status: Some("uploaded".into()),
            ..Default::default()
        };
        assert_eq!(
            RemoteNote::try_from(bad_status),
            Err(DtoError::InvalidSyncStatus("uploaded".into()))
        );
    }

    #[test]
    fn test_validate_batch_counts_rejections() {
        let batch = vec![
            PatientDto {
                patient_id: Some("P1".into()),
                ..Default::default()
            },
            PatientDto::default(),
            PatientDto {
                patient_id: Some("P3".into()),
                ..Default::default()
            },
        ];
        let (accepted, rejected): (Vec<RemotePatient>, usize) = validate_batch(batch, "patient");
        assert_eq!(rejected, 1);
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[1].patient_id, "P3");
    }

    #[test]
    fn test_note_upload_wire_format() {
        let note = Note::new("P1".into(), "initial".into(), "c1".into(), "blob".into());
        let json = serde_json::to_value(NoteUpload::from(&note)).unwrap();
        assert_eq!(json["patient_id"], "P1");
        assert_eq!(json["encrypted_data"], "blob");
        assert_eq!(json["is_deleted"], false);
        assert!(json.get("sync_status").is_none());
    }
}
