//! Property-based tests for query key canonicalization.
//!
//! Keys must depend only on the structure of their params, never on how the
//! params were assembled.
//!
//! Run with: `cargo test --test proptest_keys`

use proptest::prelude::*;
use serde_json::{Map, Value};

use query_sync::query_key::canonical_json;
use query_sync::{KeyPrefix, ListParams, QueryKey};

// =============================================================================
// Strategies
// =============================================================================

/// Arbitrary JSON, nulls included.
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9 _-]{0,12}".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Distinct member names with values, in generation order.
fn members_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,10}", json_strategy(), 0..10)
        .prop_map(|m| m.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

fn object(members: impl IntoIterator<Item = (String, Value)>) -> Value {
    let mut map = Map::new();
    for (k, v) in members {
        map.insert(k, v);
    }
    Value::Object(map)
}

/// Drop `null` object members at every depth.
fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(without_nulls).collect()),
        other => other.clone(),
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn test_key_independent_of_member_order(members in members_strategy()) {
        let forward = object(members.clone());
        let backward = object(members.into_iter().rev());

        prop_assert_eq!(
            QueryKey::new("contracts", "list", &forward),
            QueryKey::new("contracts", "list", &backward)
        );
    }

    #[test]
    fn test_canonical_form_parses_back(value in json_strategy()) {
        let canonical = canonical_json(&value);
        if value.is_null() {
            prop_assert!(canonical.is_empty());
        } else {
            let parsed: Value = serde_json::from_str(&canonical).unwrap();
            prop_assert_eq!(parsed, without_nulls(&value));
        }
    }

    #[test]
    fn test_null_members_do_not_change_key(members in members_strategy(), name in "[A-Z]{1,4}") {
        let plain = object(members.clone());
        let mut padded = members;
        padded.push((name, Value::Null));

        prop_assert_eq!(canonical_json(&plain), canonical_json(&object(padded)));
    }

    #[test]
    fn test_filter_insertion_order_does_not_change_list_key(
        filters in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{1,8}", 0..8),
        page in prop::option::of(1u32..500),
    ) {
        let mut forward = ListParams::default();
        let mut backward = ListParams::default();
        for (name, value) in &filters {
            forward = forward.filter(name.clone(), value.clone());
        }
        for (name, value) in filters.iter().rev() {
            backward = backward.filter(name.clone(), value.clone());
        }
        if let Some(page) = page {
            forward = forward.page(page);
            backward = backward.page(page);
        }

        prop_assert_eq!(forward.to_query_pairs(), backward.to_query_pairs());
        prop_assert_eq!(
            QueryKey::new("discounts", "list", &forward.to_key_value()),
            QueryKey::new("discounts", "list", &backward.to_key_value())
        );
    }

    #[test]
    fn test_query_pairs_are_sorted_and_non_empty(
        filters in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..8),
        search in prop::option::of("[a-z ]{0,10}"),
    ) {
        let mut params = ListParams::default();
        for (name, value) in filters {
            params = params.filter(name, value);
        }
        if let Some(search) = search {
            params = params.search(search);
        }

        let pairs = params.to_query_pairs();
        prop_assert!(pairs.windows(2).all(|w| w[0].0 <= w[1].0));
        prop_assert!(pairs.iter().all(|(_, value)| !value.is_empty()));
    }

    #[test]
    fn test_prefix_matches_own_resource_only(
        resource in "[a-z]{1,10}",
        other in "[a-z]{1,10}",
        params in json_strategy(),
    ) {
        let key = QueryKey::new(resource.clone(), "list", &params);

        prop_assert!(KeyPrefix::resource(resource.clone()).matches(&key));
        prop_assert!(KeyPrefix::list(resource.clone()).matches(&key));
        prop_assert!(!KeyPrefix::resource(resource).operation("detail").matches(&key));
        if other != key.resource() {
            prop_assert!(!KeyPrefix::resource(other).matches(&key));
        }
    }
}
