// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The backend's response envelope:
//! `{ success, data?, message?, pagination?: { page, limit, total, pages } }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, GENERIC_ERROR_MESSAGE};

#[derive(Debug, Clone, Deserialize)]
struct RawEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> AsRef<[T]> for Paginated<T> {
    fn as_ref(&self) -> &[T] {
        &self.items
    }
}

impl<T> Paginated<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// A successful envelope with its payload still untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub data: Option<Value>,
    pub message: Option<String>,
    pub pagination: Option<Pagination>,
}

impl ApiResponse {
    /// Parse a 2xx body. `success: false` becomes [`SyncError::Rejected`]
    /// carrying the server message.
    pub fn parse(status: u16, body: &[u8]) -> Result<Self, SyncError> {
        if body.is_empty() {
            // 204 and friends
            return Ok(Self { data: None, message: None, pagination: None });
        }
        let raw: RawEnvelope = serde_json::from_slice(body)
            .map_err(|e| SyncError::Malformed(format!("response is not an API envelope: {e}")))?;

        if !raw.success {
            return Err(SyncError::Rejected {
                status,
                message: raw.message.unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string()),
            });
        }
        Ok(Self { data: raw.data, message: raw.message, pagination: raw.pagination })
    }

    pub fn into_data(self) -> Result<Value, SyncError> {
        self.data.ok_or_else(|| SyncError::Malformed("envelope has no data".into()))
    }
}

/// Best-effort message from an error body (`message`, then `error`).
pub fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_success_with_pagination() {
        let body = json!({
            "success": true,
            "data": [{"id": "a"}],
            "pagination": {"page": 1, "limit": 20, "total": 41, "pages": 3}
        });
        let response = ApiResponse::parse(200, body.to_string().as_bytes()).unwrap();

        let pagination = response.pagination.unwrap();
        assert_eq!(pagination.total, 41);
        assert!(pagination.has_next());
        assert!(!pagination.has_previous());
        assert_eq!(response.into_data().unwrap(), json!([{"id": "a"}]));
    }

    #[test]
    fn test_parse_failure_envelope_uses_message() {
        let body = json!({"success": false, "message": "Contract already signed"});
        let err = ApiResponse::parse(200, body.to_string().as_bytes()).unwrap_err();
        assert_eq!(err, SyncError::Rejected { status: 200, message: "Contract already signed".into() });
    }

    #[test]
    fn test_parse_failure_envelope_without_message_is_generic() {
        let err = ApiResponse::parse(200, br#"{"success": false}"#).unwrap_err();
        assert_eq!(err.to_string(), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_parse_rejects_non_envelope() {
        assert!(matches!(ApiResponse::parse(200, b"[1,2,3]"), Err(SyncError::Malformed(_))));
        assert!(matches!(ApiResponse::parse(200, b"<html>"), Err(SyncError::Malformed(_))));
    }

    #[test]
    fn test_empty_body_is_empty_response() {
        let response = ApiResponse::parse(204, b"").unwrap();
        assert!(response.data.is_none());
        assert!(response.into_data().is_err());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(br#"{"message":"Invalid code"}"#).as_deref(), Some("Invalid code"));
        assert_eq!(error_message(br#"{"error":"Bad input"}"#).as_deref(), Some("Bad input"));
        assert_eq!(error_message(br#"{"message":""}"#), None);
        assert_eq!(error_message(b"oops"), None);
    }
}
