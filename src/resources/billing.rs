// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{normalize, Resource, ResourceService};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Open,
    Paid,
    Overdue,
    Void,
    #[serde(other)]
    Unknown,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub number: String,
    #[serde(default)]
    pub subscriber_id: Option<String>,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub status: InvoiceStatus,
    #[serde(deserialize_with = "normalize::datetime")]
    pub issued_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub paid_at: Option<DateTime<Utc>>,
}

impl Resource for Invoice {
    const NAME: &'static str = "billing/invoices";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Invoice {
    #[must_use]
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            InvoiceStatus::Overdue => true,
            InvoiceStatus::Open => self.due_at.is_some_and(|due| due < now),
            _ => false,
        }
    }
}

impl ResourceService<Invoice> {
    pub async fn mark_paid(&self, id: &str, paid_at: Option<DateTime<Utc>>) -> Result<Invoice, SyncError> {
        let body = json!({ "paidAt": paid_at.map(|at| super::params::iso_timestamp(&at)) });
        self.action(id, "mark-paid", Some(&body)).await
    }

    /// Email the invoice to the subscriber.
    pub async fn send(&self, id: &str) -> Result<Invoice, SyncError> {
        self.action(id, "send", None).await
    }
}
