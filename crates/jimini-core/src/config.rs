//! Sync engine configuration.
//!
//! Defaults match the mobile app's build config: the API is served under
//! `/api/v1` and the background task wakes every 15 minutes at most.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::MergePolicy;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api/v1";
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Configuration errors.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid configuration JSON: {0}")]
    Parse(String),
}

/// Runtime configuration for the remote client and scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub environment: String,
    /// Whole-request timeout for fetches and uploads
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Background trigger period
    pub fetch_interval_minutes: u64,
    pub merge_policy: MergePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            fetch_interval_minutes: 15,
            merge_policy: MergePolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.normalized()
    }

    /// Build from process environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = normalize_text_option(lookup("API_BASE_URL")) {
            config.api_base_url = url;
        }
        if let Some(environment) = normalize_text_option(lookup("ENVIRONMENT")) {
            config.environment = environment;
        }
        if let Some(raw) = normalize_text_option(lookup("SYNC_REQUEST_TIMEOUT_SECS")) {
            config.request_timeout_secs = parse_number("SYNC_REQUEST_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = normalize_text_option(lookup("SYNC_FETCH_INTERVAL_MINUTES")) {
            config.fetch_interval_minutes = parse_number("SYNC_FETCH_INTERVAL_MINUTES", &raw)?;
        }
        config.normalized()
    }

    /// Trim the base URL and check every value is usable.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_http_url(&self.api_base_url) {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must include http:// or https:// (got `{}`)",
                self.api_base_url
            )));
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.fetch_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "fetch_interval_minutes must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn fetch_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_interval_minutes * 60)
    }
}

fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn parse_number(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a whole number (got `{raw}`)")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.fetch_interval().as_secs(), 900);
        assert_eq!(config.merge_policy, MergePolicy::PreservePendingLocal);
    }

    #[test]
    fn test_from_json_partial() {
        let config = SyncConfig::from_json(
            r#"{"api_base_url": " https://api.example.com/api/v1/ ", "merge_policy": "remote_wins"}"#,
        )
        .unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com/api/v1");
        assert_eq!(config.merge_policy, MergePolicy::RemoteWins);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(matches!(
            SyncConfig::from_json(r#"{"api_base_url": "api.example.com"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_json(r#"{"request_timeout_secs": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_lookup() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("API_BASE_URL", "https://staging.example.com/api/v1"),
            ("ENVIRONMENT", "staging"),
            ("SYNC_FETCH_INTERVAL_MINUTES", "30"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url, "https://staging.example.com/api/v1");
        assert_eq!(config.environment, "staging");
        assert_eq!(config.fetch_interval_minutes, 30);

        let empty = SyncConfig::from_lookup(lookup(&[("API_BASE_URL", "  ")])).unwrap();
        assert_eq!(empty.api_base_url, DEFAULT_API_BASE_URL);

        assert!(SyncConfig::from_lookup(lookup(&[("SYNC_REQUEST_TIMEOUT_SECS", "soon")])).is_err());
    }
}
