// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query keys and key prefixes.
//!
//! A [`QueryKey`] is `(resource, operation, params)`. Params are stored in a
//! canonical JSON form: object keys sorted, `null` members dropped. Two
//! structurally equal parameter objects therefore produce equal keys no
//! matter how they were built.
//!
//! ```
//! use query_sync::QueryKey;
//! use serde_json::json;
//!
//! let a = QueryKey::new("contracts", "list", &json!({"page": 1, "status": "draft"}));
//! let b = QueryKey::new("contracts", "list", &json!({"status": "draft", "page": 1}));
//! assert_eq!(a, b);
//! assert_eq!(a.to_string(), r#"contracts/list/{"page":1,"status":"draft"}"#);
//! ```

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::SyncError;

pub const OP_LIST: &str = "list";
pub const OP_DETAIL: &str = "detail";

/// Stable identifier for a cached result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    resource: String,
    operation: String,
    params: String,
}

impl QueryKey {
    pub fn new(resource: impl Into<String>, operation: impl Into<String>, params: &Value) -> Self {
        Self {
            resource: resource.into(),
            operation: operation.into(),
            params: canonical_json(params),
        }
    }

    /// Key whose params come from any serializable value.
    pub fn from_params<P: Serialize + ?Sized>(
        resource: impl Into<String>,
        operation: impl Into<String>,
        params: &P,
    ) -> Result<Self, SyncError> {
        let value = serde_json::to_value(params)
            .map_err(|e| SyncError::Config(format!("query params are not serializable: {e}")))?;
        Ok(Self::new(resource, operation, &value))
    }

    /// `resource/list/{params}`
    pub fn list<P: Serialize + ?Sized>(resource: &str, params: &P) -> Result<Self, SyncError> {
        Self::from_params(resource, OP_LIST, params)
    }

    /// `resource/detail/"id"`
    pub fn detail(resource: &str, id: &str) -> Self {
        Self::new(resource, OP_DETAIL, &Value::String(id.to_string()))
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Canonical JSON of the params (empty for `null`).
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn matches(&self, prefix: &KeyPrefix) -> bool {
        prefix.matches(self)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}/{}", self.resource, self.operation)
        } else {
            write!(f, "{}/{}/{}", self.resource, self.operation, self.params)
        }
    }
}

/// Selects every key under a resource, optionally narrowed to one operation
/// (`contracts/*`, `contracts/list/*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    resource: String,
    operation: Option<String>,
}

impl KeyPrefix {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self { resource: resource.into(), operation: None }
    }

    #[must_use]
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn list(resource: impl Into<String>) -> Self {
        Self::resource(resource).operation(OP_LIST)
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        key.resource == self.resource
            && self.operation.as_deref().map_or(true, |op| op == key.operation)
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operation {
            Some(op) => write!(f, "{}/{}/*", self.resource, op),
            None => write!(f, "{}/*", self.resource),
        }
    }
}

/// Deterministic JSON: sorted object keys, no `null` members, no whitespace.
/// A top-level `null` renders as the empty string.
pub fn canonical_json(value: &Value) -> String {
    if value.is_null() {
        return String::new();
    }
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            members.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (k, v)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ignores_insertion_order() {
        let mut a = serde_json::Map::new();
        a.insert("page".into(), json!(2));
        a.insert("filters".into(), json!({"status": ["active", "draft"], "q": "acme"}));

        let mut b = serde_json::Map::new();
        b.insert("filters".into(), json!({"q": "acme", "status": ["active", "draft"]}));
        b.insert("page".into(), json!(2));

        let ka = QueryKey::new("contracts", OP_LIST, &Value::Object(a));
        let kb = QueryKey::new("contracts", OP_LIST, &Value::Object(b));
        assert_eq!(ka, kb);
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = QueryKey::new("contracts", OP_LIST, &json!({"ids": [1, 2]}));
        let b = QueryKey::new("contracts", OP_LIST, &json!({"ids": [2, 1]}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_null_members_are_dropped() {
        let a = QueryKey::new("discounts", OP_LIST, &json!({"page": 1, "search": null}));
        let b = QueryKey::new("discounts", OP_LIST, &json!({"page": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_detail_key_display() {
        let key = QueryKey::detail("contracts", "c-42");
        assert_eq!(key.to_string(), r#"contracts/detail/"c-42""#);
        assert_eq!(key.operation(), OP_DETAIL);
    }

    #[test]
    fn test_null_params_display() {
        let key = QueryKey::new("subscribers", "count", &Value::Null);
        assert_eq!(key.to_string(), "subscribers/count");
        assert_eq!(key.params(), "");
    }

    #[test]
    fn test_canonical_escapes_keys() {
        let out = canonical_json(&json!({"we\"ird": "x"}));
        assert_eq!(out, r#"{"we\"ird":"x"}"#);
    }

    #[test]
    fn test_prefix_matching() {
        let list = QueryKey::new("contracts", OP_LIST, &json!({"page": 1}));
        let detail = QueryKey::detail("contracts", "c-1");
        let other = QueryKey::new("discounts", OP_LIST, &json!({"page": 1}));

        let all = KeyPrefix::resource("contracts");
        assert!(list.matches(&all));
        assert!(detail.matches(&all));
        assert!(!other.matches(&all));

        let lists = KeyPrefix::list("contracts");
        assert!(list.matches(&lists));
        assert!(!detail.matches(&lists));
        assert_eq!(lists.to_string(), "contracts/list/*");
    }

    #[test]
    fn test_from_params_struct() {
        #[derive(Serialize)]
        struct Params {
            page: u32,
            search: Option<String>,
        }
        let key = QueryKey::list("templates", &Params { page: 3, search: None }).unwrap();
        assert_eq!(key, QueryKey::new("templates", OP_LIST, &json!({"page": 3})));
    }
}
