// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! List query parameters and their canonical query-string form.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// A filter value. Lists become repeated query keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Bool(bool),
    List(Vec<String>),
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(v: Vec<&str>) -> Self {
        Self::List(v.into_iter().map(str::to_string).collect())
    }
}

/// Inclusive date window, sent as `startDate` / `endDate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Paging, search, sort and filter parameters for list endpoints.
///
/// ```
/// use query_sync::resources::ListParams;
///
/// let params = ListParams::default()
///     .page(2)
///     .limit(25)
///     .filter("status", vec!["draft", "sent"]);
///
/// assert_eq!(
///     params.to_query_pairs(),
///     vec![
///         ("limit".to_string(), "25".to_string()),
///         ("page".to_string(), "2".to_string()),
///         ("status".to_string(), "draft".to_string()),
///         ("status".to_string(), "sent".to_string()),
///     ]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub date_range: Option<DateRange>,
    pub filters: BTreeMap<String, FilterValue>,
}

impl ListParams {
    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.sort_order = Some(order);
        self
    }

    #[must_use]
    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.date_range = Some(DateRange { from, to });
        self
    }

    #[must_use]
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Query pairs sorted by name; list values keep their own order.
    /// Empty strings and empty lists are omitted.
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        let mut push = |name: &str, value: String| {
            if !value.is_empty() {
                pairs.push((name.to_string(), value));
            }
        };

        if let Some(page) = self.page {
            push("page", page.to_string());
        }
        if let Some(limit) = self.limit {
            push("limit", limit.to_string());
        }
        if let Some(search) = &self.search {
            push("search", search.trim().to_string());
        }
        if let Some(sort_by) = &self.sort_by {
            push("sortBy", sort_by.clone());
        }
        if let Some(order) = self.sort_order {
            push("sortOrder", order.as_str().to_string());
        }
        if let Some(range) = &self.date_range {
            if let Some(from) = range.from {
                push("startDate", iso_timestamp(&from));
            }
            if let Some(to) = range.to {
                push("endDate", iso_timestamp(&to));
            }
        }
        for (name, value) in &self.filters {
            match value {
                FilterValue::Text(v) => push(name.as_str(), v.clone()),
                FilterValue::Integer(v) => push(name.as_str(), v.to_string()),
                FilterValue::Bool(v) => push(name.as_str(), v.to_string()),
                FilterValue::List(items) => {
                    for item in items {
                        push(name.as_str(), item.clone());
                    }
                }
            }
        }

        // Stable: repeated list keys stay in list order
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// Cache-key form: the query pairs grouped by name. Params that send the
    /// same query string share one key.
    #[must_use]
    pub fn to_key_value(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in self.to_query_pairs() {
            match map.get_mut(&name) {
                Some(Value::Array(items)) => items.push(Value::String(value)),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value)]);
                }
                None => {
                    map.insert(name, Value::String(value));
                }
            }
        }
        Value::Object(map)
    }
}

/// `2025-03-01T00:00:00.000Z`, the shape browsers produce.
pub fn iso_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_params_have_no_pairs() {
        assert!(ListParams::default().to_query_pairs().is_empty());
    }

    #[test]
    fn test_pairs_sorted_and_renamed() {
        let params = ListParams::default()
            .search("  acme ")
            .sort("createdAt", SortOrder::Desc)
            .page(1)
            .filter("active", true)
            .filter("minUses", 5i64);

        let pairs = params.to_query_pairs();
        let names: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["active", "minUses", "page", "search", "sortBy", "sortOrder"]);
        assert!(pairs.contains(&("search".into(), "acme".into())));
        assert!(pairs.contains(&("sortOrder".into(), "desc".into())));
    }

    #[test]
    fn test_date_range_serialization() {
        let from = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 59).unwrap();
        let pairs = ListParams::default().between(Some(from), Some(to)).to_query_pairs();

        assert_eq!(
            pairs,
            vec![
                ("endDate".to_string(), "2025-03-31T23:59:59.000Z".to_string()),
                ("startDate".to_string(), "2025-03-01T00:00:00.000Z".to_string()),
            ]
        );
    }

    #[test]
    fn test_open_ended_range_and_empty_values() {
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let pairs = ListParams::default()
            .between(Some(from), None)
            .search("")
            .filter("tags", Vec::<String>::new())
            .to_query_pairs();

        assert_eq!(pairs, vec![("startDate".to_string(), "2025-01-01T00:00:00.000Z".to_string())]);
    }

    #[test]
    fn test_filter_insertion_order_does_not_matter() {
        let a = ListParams::default().filter("status", "sent").filter("owner", "u1");
        let b = ListParams::default().filter("owner", "u1").filter("status", "sent");
        assert_eq!(a.to_query_pairs(), b.to_query_pairs());
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_value_groups_repeated_names() {
        let params = ListParams::default().page(2).filter("status", vec!["draft", "sent"]);
        assert_eq!(
            params.to_key_value(),
            serde_json::json!({"page": "2", "status": ["draft", "sent"]})
        );
        assert_eq!(ListParams::default().search("  ").to_key_value(), serde_json::json!({}));
    }
}
