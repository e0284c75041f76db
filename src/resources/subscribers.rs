// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize, Resource, ResourceService};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberStatus {
    #[default]
    Active,
    Paused,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: SubscriberStatus,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(deserialize_with = "normalize::datetime")]
    pub subscribed_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub last_active_at: Option<DateTime<Utc>>,
}

impl Resource for Subscriber {
    const NAME: &'static str = "subscribers";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Live counters shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStats {
    pub total: u64,
    pub active: u64,
    #[serde(default)]
    pub new_today: u64,
    #[serde(default)]
    pub online_now: u64,
}

impl ResourceService<Subscriber> {
    pub async fn stats(&self) -> Result<SubscriberStats, SyncError> {
        self.fetch("stats", &[]).await
    }
}
