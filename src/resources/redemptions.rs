// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Discount redemptions and their server-computed fraud signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{normalize, ListParams, Resource, ResourceService};
use crate::error::SyncError;
use crate::http::Paginated;
use crate::polling::monitor::Flagged;

/// Fraud score (0-100) at or above which a redemption counts as suspicious.
pub const SUSPICIOUS_SCORE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    #[default]
    Completed,
    Pending,
    Reversed,
    Blocked,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub id: String,
    pub discount_code: String,
    #[serde(default)]
    pub subscriber_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub status: RedemptionStatus,
    #[serde(default)]
    pub fraud_score: Option<f64>,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub flag_reason: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(deserialize_with = "normalize::datetime")]
    pub redeemed_at: DateTime<Utc>,
}

impl Resource for Redemption {
    const NAME: &'static str = "redemptions";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Flagged for Redemption {
    fn alert_id(&self) -> &str {
        &self.id
    }

    fn is_suspicious(&self) -> bool {
        self.flagged || self.fraud_score.is_some_and(|s| s >= SUSPICIOUS_SCORE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudStats {
    pub total_redemptions: u64,
    pub flagged: u64,
    #[serde(default)]
    pub high_risk: u64,
    #[serde(default)]
    pub average_score: Option<f64>,
}

impl ResourceService<Redemption> {
    /// Redemptions the backend marks as suspicious.
    pub async fn suspicious(&self, params: &ListParams) -> Result<Paginated<Redemption>, SyncError> {
        self.list(&params.clone().filter("suspicious", true)).await
    }

    pub async fn fraud_stats(&self) -> Result<FraudStats, SyncError> {
        self.fetch("fraud/stats", &[]).await
    }

    pub async fn flag(&self, id: &str, reason: &str) -> Result<Redemption, SyncError> {
        self.action(id, "flag", Some(&json!({ "reason": reason }))).await
    }

    /// Clear a flag after review.
    pub async fn resolve(&self, id: &str, note: Option<&str>) -> Result<Redemption, SyncError> {
        self.action(id, "resolve", Some(&json!({ "note": note }))).await
    }
}
