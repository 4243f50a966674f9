//! Remote API collaborator.
//!
//! The engine only talks to the server through [`RemoteClient`]; the HTTP
//! implementation lives in [`HttpRemoteClient`]. Payloads crossing the
//! boundary are lenient DTOs that must be validated into [`RemotePatient`] /
//! [`RemoteNote`] before they reach the reconciler.

mod dto;
mod http;

pub use dto::*;
pub use http::*;

use thiserror::Error;

/// Errors talking to the remote API.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Fetch/upload operations the sync engine needs from the server.
///
/// Implementations must be callable from several threads at once: the
/// engine fetches patients and notes concurrently.
pub trait RemoteClient: Send + Sync {
    /// Full remote patient list.
    fn fetch_patients(&self) -> RemoteResult<Vec<PatientDto>>;

    /// Full remote note list.
    fn fetch_notes(&self) -> RemoteResult<Vec<NoteDto>>;

    /// Upload one locally written note.
    fn upload_note(&self, note: &NoteUpload) -> RemoteResult<()>;
}
