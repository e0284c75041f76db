// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Contracts and their signing workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{normalize, Resource, ResourceService};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    #[default]
    Draft,
    Sent,
    Viewed,
    Signed,
    Voided,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: ContractStatus,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "normalize::datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Resource for Contract {
    const NAME: &'static str = "contracts";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Contract {
    #[must_use]
    pub fn is_editable(&self) -> bool {
        matches!(self.status, ContractStatus::Draft)
    }
}

/// Captured signature. `image` is a data URL (`data:image/png;base64,...`)
/// produced by whatever drew it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInput {
    pub signer_name: String,
    pub signer_email: Option<String>,
    pub image: String,
}

impl ResourceService<Contract> {
    pub async fn sign(&self, id: &str, signature: &SignatureInput) -> Result<Contract, SyncError> {
        if signature.signer_name.trim().is_empty() {
            return Err(SyncError::Rejected { status: 400, message: "Signer name is required".into() });
        }
        if !signature.image.starts_with("data:image/") {
            return Err(SyncError::Rejected { status: 400, message: "Signature image must be a data URL".into() });
        }
        let body = serde_json::to_value(signature)?;
        self.action(id, "sign", Some(&body)).await
    }

    /// Email the contract to its recipients.
    pub async fn send(&self, id: &str, recipients: &[String], message: Option<&str>) -> Result<Contract, SyncError> {
        let body = json!({ "recipients": recipients, "message": message });
        self.action(id, "send", Some(&body)).await
    }

    pub async fn void(&self, id: &str, reason: &str) -> Result<Contract, SyncError> {
        self.action(id, "void", Some(&json!({ "reason": reason }))).await
    }
}
