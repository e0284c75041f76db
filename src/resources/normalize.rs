// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload normalization applied at the service boundary.
//!
//! * Identifiers: `_id` is renamed to `id` (an existing `id` wins) and
//!   numeric ids become strings, at every nesting level.
//! * Dates: `datetime` / `opt_datetime` deserializers accept RFC 3339,
//!   zone-less ISO timestamps (taken as UTC), plain dates, and epoch millis.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Unify identifier fields throughout a payload.
pub fn unify_ids(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            let legacy = map.remove("_id");
            if !map.contains_key("id") {
                if let Some(id) = legacy {
                    map.insert("id".to_string(), id);
                }
            }
            if let Some(Value::Number(n)) = map.get("id") {
                let as_string = Value::String(n.to_string());
                map.insert("id".to_string(), as_string);
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, unify_ids(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(unify_ids).collect()),
        other => other,
    }
}

/// Parse the timestamp shapes the backend emits.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDate {
    Text(String),
    Millis(i64),
}

impl RawDate {
    fn resolve<E: de::Error>(self) -> Result<DateTime<Utc>, E> {
        match self {
            Self::Text(raw) => {
                parse_datetime(&raw).ok_or_else(|| E::custom(format!("unrecognized date '{raw}'")))
            }
            Self::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp {ms} out of range"))),
        }
    }
}

/// `#[serde(deserialize_with = "normalize::datetime")]`
pub fn datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    RawDate::deserialize(deserializer)?.resolve()
}

/// `#[serde(default, deserialize_with = "normalize::opt_datetime")]`
///
/// `null` and the empty string both mean "no date".
pub fn opt_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDate>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDate::Text(raw)) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.resolve().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_id_renamed() {
        let out = unify_ids(json!({"_id": "abc", "name": "x"}));
        assert_eq!(out, json!({"id": "abc", "name": "x"}));
    }

    #[test]
    fn test_existing_id_wins_and_legacy_dropped() {
        let out = unify_ids(json!({"_id": "mongo", "id": "canonical"}));
        assert_eq!(out, json!({"id": "canonical"}));
    }

    #[test]
    fn test_numeric_id_becomes_string() {
        assert_eq!(unify_ids(json!({"id": 42})), json!({"id": "42"}));
    }

    #[test]
    fn test_nested_objects_and_arrays() {
        let out = unify_ids(json!([
            {"_id": "r1", "discount": {"_id": "d1", "code": "SPRING"}},
            {"id": 7, "tags": [{"_id": "t1"}]}
        ]));
        assert_eq!(
            out,
            json!([
                {"id": "r1", "discount": {"id": "d1", "code": "SPRING"}},
                {"id": "7", "tags": [{"id": "t1"}]}
            ])
        );
    }

    #[test]
    fn test_parse_datetime_shapes() {
        let expected = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_datetime("2025-06-01T12:30:00.000Z"), Some(expected));
        assert_eq!(parse_datetime("2025-06-01T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_datetime("2025-06-01T12:30:00"), Some(expected));
        assert_eq!(parse_datetime("2025-06-01 12:30:00"), Some(expected));
        assert_eq!(
            parse_datetime("2025-06-01"),
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[derive(Deserialize)]
    struct Dated {
        #[serde(deserialize_with = "datetime")]
        created_at: DateTime<Utc>,
        #[serde(default, deserialize_with = "opt_datetime")]
        signed_at: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_deserializers() {
        let dated: Dated = serde_json::from_value(json!({"created_at": 1_700_000_000_000i64})).unwrap();
        assert_eq!(dated.created_at.timestamp(), 1_700_000_000);
        assert_eq!(dated.signed_at, None);

        let dated: Dated =
            serde_json::from_value(json!({"created_at": "2025-01-02", "signed_at": ""})).unwrap();
        assert_eq!(dated.signed_at, None);

        let dated: Dated = serde_json::from_value(
            json!({"created_at": "2025-01-02", "signed_at": "2025-01-03T10:00:00Z"}),
        )
        .unwrap();
        assert!(dated.signed_at.is_some());
    }

    #[test]
    fn test_bad_date_is_error() {
        let result: Result<Dated, _> = serde_json::from_value(json!({"created_at": "soon"}));
        assert!(result.is_err());
    }
}
