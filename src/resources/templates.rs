// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{normalize, Resource, ResourceService};
use crate::error::SyncError;

/// Contract or notification template with `{{variable}}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(deserialize_with = "normalize::datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "normalize::opt_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Resource for Template {
    const NAME: &'static str = "templates";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Template {
    /// Placeholders used in `content` that are not declared in `variables`.
    #[must_use]
    pub fn undeclared_variables(&self) -> Vec<String> {
        let mut found = Vec::new();
        let mut rest = self.content.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else { break };
            let name = after[..end].trim().to_string();
            if !name.is_empty() && !self.variables.contains(&name) && !found.contains(&name) {
                found.push(name);
            }
            rest = &after[end + 2..];
        }
        found
    }
}

impl ResourceService<Template> {
    pub async fn duplicate(&self, id: &str, name: &str) -> Result<Template, SyncError> {
        self.action(id, "duplicate", Some(&json!({ "name": name }))).await
    }
}
