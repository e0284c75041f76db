//! Configuration for the sync layer.
//!
//! # Example
//!
//! ```
//! use query_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.request_timeout_ms, 30_000);
//!
//! // Full config
//! let config = SyncConfig {
//!     api_url: "https://admin.example.com/api".into(),
//!     stale_time_ms: 5_000,
//!     retry_attempts: 2,
//!     ..Default::default()
//! };
//! assert_eq!(config.retry_attempts, 2);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::SyncError;
use crate::resilience::retry::RetryConfig;

/// Environment variable holding the API base URL.
pub const API_URL_ENV: &str = "NEXT_PUBLIC_API_URL";
pub const TOKEN_STORAGE_KEY_ENV: &str = "SYNC_TOKEN_STORAGE_KEY";
pub const TOKEN_PATH_ENV: &str = "SYNC_TOKEN_PATH";
pub const REQUEST_TIMEOUT_ENV: &str = "SYNC_REQUEST_TIMEOUT_MS";

/// Configuration for the sync layer.
///
/// All fields have sensible defaults. At minimum, set `api_url` for
/// anything other than local development.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// REST API base URL (e.g., "https://admin.example.com/api")
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Key under which the bearer token is stored
    #[serde(default = "default_token_storage_key")]
    pub token_storage_key: String,

    /// Token file; `None` keeps the token in memory only
    #[serde(default)]
    pub token_path: Option<String>,

    /// Per-request timeout; expiry is reported as a network-class error
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Query cache defaults
    #[serde(default)]
    pub stale_time_ms: u64,
    #[serde(default = "default_gc_time_ms")]
    pub gc_time_ms: u64,
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Minimum gap between two suspicious-activity alerts
    #[serde(default = "default_alert_debounce_ms")]
    pub alert_debounce_ms: u64,
}

fn default_api_url() -> String { "http://localhost:3000/api".to_string() }
fn default_token_storage_key() -> String { "authToken".to_string() }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_gc_time_ms() -> u64 { 5 * 60 * 1000 } // 5 minutes
fn default_gc_interval_ms() -> u64 { 60_000 }
fn default_retry_attempts() -> usize { 3 }
fn default_retry_initial_delay_ms() -> u64 { 1_000 }
fn default_retry_max_delay_ms() -> u64 { 30_000 }
fn default_alert_debounce_ms() -> u64 { 30_000 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_storage_key: default_token_storage_key(),
            token_path: None,
            request_timeout_ms: default_request_timeout_ms(),
            stale_time_ms: 0,
            gc_time_ms: default_gc_time_ms(),
            gc_interval_ms: default_gc_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            alert_debounce_ms: default_alert_debounce_ms(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by whatever the environment provides.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(API_URL_ENV) {
            config.api_url = url;
        }
        if let Some(key) = lookup(TOKEN_STORAGE_KEY_ENV) {
            config.token_storage_key = key;
        }
        if let Some(path) = lookup(TOKEN_PATH_ENV) {
            config.token_path = Some(path);
        }
        if let Some(raw) = lookup(REQUEST_TIMEOUT_ENV) {
            config.request_timeout_ms = raw.trim().parse().map_err(|_| {
                SyncError::Config(format!("{REQUEST_TIMEOUT_ENV} must be milliseconds, got '{raw}'"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let url = url::Url::parse(&self.api_url)
            .map_err(|e| SyncError::Config(format!("invalid api_url '{}': {}", self.api_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::Config(format!("api_url must be http(s), got '{}'", url.scheme())));
        }
        if self.request_timeout_ms == 0 {
            return Err(SyncError::Config("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    #[must_use]
    pub fn gc_time(&self) -> Duration {
        Duration::from_millis(self.gc_time_ms)
    }

    #[must_use]
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    #[must_use]
    pub fn alert_debounce(&self) -> Duration {
        Duration::from_millis(self.alert_debounce_ms)
    }

    /// Retry policy for query fetches.
    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: Some(self.retry_attempts),
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            factor: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.gc_time(), Duration::from_secs(300));
        assert_eq!(config.stale_time(), Duration::ZERO);
        assert_eq!(config.retry().max_retries, Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"api_url": "https://api.example.com", "stale_time_ms": 5000}"#).unwrap();
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.stale_time(), Duration::from_secs(5));
        assert_eq!(config.token_storage_key, "authToken");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            (API_URL_ENV, "https://admin.example.com/api"),
            (TOKEN_STORAGE_KEY_ENV, "adminToken"),
            (REQUEST_TIMEOUT_ENV, "5000"),
        ]
        .into_iter()
        .collect();

        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.api_url, "https://admin.example.com/api");
        assert_eq!(config.token_storage_key, "adminToken");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup_rejects_bad_timeout() {
        let result = SyncConfig::from_lookup(|k| (k == REQUEST_TIMEOUT_ENV).then(|| "soon".to_string()));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = SyncConfig { api_url: "ftp://files.example.com".into(), ..Default::default() };
        assert!(config.validate().is_err());

        let config = SyncConfig { api_url: "not a url".into(), ..Default::default() };
        assert!(config.validate().is_err());
    }
}
