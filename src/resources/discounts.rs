// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize, Resource, ResourceService};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub id: String,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    pub value: f64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub usage_limit: Option<u64>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "normalize::datetime")]
    pub created_at: DateTime<Utc>,
}

impl Resource for Discount {
    const NAME: &'static str = "discounts";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Discount {
    /// Active, inside its validity window, and under its usage limit.
    #[must_use]
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.starts_at.map_or(true, |s| s <= now)
            && self.expires_at.map_or(true, |e| now < e)
            && self.usage_limit.map_or(true, |limit| self.usage_count < limit)
    }
}

impl ResourceService<Discount> {
    pub async fn activate(&self, id: &str) -> Result<Discount, SyncError> {
        self.action(id, "activate", None).await
    }

    pub async fn deactivate(&self, id: &str) -> Result<Discount, SyncError> {
        self.action(id, "deactivate", None).await
    }
}
