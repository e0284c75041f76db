// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the sync layer.
//!
//! Service functions return these errors, the cache and mutation layers
//! store them, and the UI decides how to present them. The type is `Clone`
//! so one failed fetch can be handed to every consumer waiting on it.

use std::time::Duration;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Generic message used when the backend rejects a request without one.
pub const GENERIC_ERROR_MESSAGE: &str = "Request failed";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The request never produced a response (DNS, reset, refused).
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 401. Stored credentials have been cleared.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 403.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Validation or business error (4xx, or a `success: false` envelope).
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// HTTP 5xx.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Response body did not match the expected envelope or schema.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The in-flight request was superseded or explicitly cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// Cached data under this key has a different type than requested.
    #[error("cached data for '{0}' has an unexpected type")]
    TypeMismatch(String),

    #[error("mutation '{0}' is already in flight")]
    MutationInFlight(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Credential storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A fetcher or mutation body panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Network failures, timeouts and 5xx responses are worth another attempt.
    /// Everything else is final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Server { .. })
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
    }

    /// Stable label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Rejected { .. } => "rejected",
            Self::Server { .. } => "server",
            Self::Malformed(_) => "malformed",
            Self::Cancelled => "cancelled",
            Self::TypeMismatch(_) => "type_mismatch",
            Self::MutationInFlight(_) => "mutation_in_flight",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status carried by the error, if it came from a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(_) => Some(401),
            Self::Forbidden(_) => Some(403),
            Self::Rejected { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
