//! HTTP implementation of [`RemoteClient`] against the Jimini REST API.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{NoteDto, NoteUpload, PatientDto, RemoteClient, RemoteError, RemoteResult};
use crate::config::SyncConfig;

/// Blocking HTTP client with request and connect timeouts.
///
/// Every request is bounded: the sync guard is held for the whole cycle.
#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    client: Client,
}

impl HttpRemoteClient {
    /// Build a client from the sync configuration.
    pub fn new(config: &SyncConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> RemoteResult<T> {
        let response = self
            .client
            .get(self.endpoint(path))
            .header("Accept", "application/json")
            .send()?;
        let body = check_status(response)?.text()?;
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::InvalidPayload(format!("GET {path}: {e}")))
    }
}

impl RemoteClient for HttpRemoteClient {
    fn fetch_patients(&self) -> RemoteResult<Vec<PatientDto>> {
        self.get_json("patients")
    }

    fn fetch_notes(&self) -> RemoteResult<Vec<NoteDto>> {
        self.get_json("notes")
    }

    fn upload_note(&self, note: &NoteUpload) -> RemoteResult<()> {
        let response = self
            .client
            .post(self.endpoint("notes"))
            .header("Accept", "application/json")
            .json(note)
            .send()?;
        check_status(response)?;
        Ok(())
    }
}

fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body: parse_api_error(&body),
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    detail: Option<serde_json::Value>,
    message: Option<String>,
}

/// Pull a readable message out of an error body (`{"detail": ...}` from the API).
fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        match (payload.detail, payload.message) {
            (Some(serde_json::Value::String(detail)), _) => return detail,
            (Some(detail), _) => return detail.to_string(),
            (None, Some(message)) => return message,
            (None, None) => {}
        }
    }
    body.trim().to_string()
}
