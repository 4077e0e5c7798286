//! `field_bucket` aggregation parsing and the field-discovery heuristic.
//!
//! The remote aggregator answers with
//!
//! ```json
//! { "objects": [ { "field_bucket": { "buckets": [ { "data_type": "syslog:line", "count": 12 } ] } } ] }
//! ```
//!
//! where each bucket holds the field value under the field's own name.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Value};

use crate::error::{Result, TimesketchError};

/// Name of the distinct-value-count aggregator.
pub const FIELD_BUCKET: &str = "field_bucket";

/// Bucket limit used by the aggregation tools.
pub const DEFAULT_BUCKET_LIMIT: usize = 10_000;

/// One distinct value of a field and how many events carry it.
///
/// Serializes as `{"<field>": <value>, "count": <count>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBucket {
    pub field: String,
    pub value: Value,
    pub count: u64,
}

impl FieldBucket {
    fn from_raw(field: &str, raw: &Value) -> Result<Self> {
        let obj = raw.as_object().ok_or_else(|| {
            TimesketchError::MalformedResponse(format!("bucket is not an object: {}", raw))
        })?;
        let count = obj.get("count").and_then(Value::as_u64).ok_or_else(|| {
            TimesketchError::MalformedResponse(format!("bucket without a count: {}", raw))
        })?;
        let value = obj.get(field).cloned().ok_or_else(|| {
            TimesketchError::MalformedResponse(format!("bucket without field '{}': {}", field, raw))
        })?;
        Ok(Self {
            field: field.to_string(),
            value,
            count,
        })
    }
}

impl Serialize for FieldBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(&self.field, &self.value)?;
        map.serialize_entry("count", &self.count)?;
        map.end()
    }
}

/// Parameters sent with a `field_bucket` run.
///
/// The limit travels as a string, matching what the web UI sends.
pub fn field_bucket_params(field: &str, limit: usize) -> Value {
    json!({
        "field": field,
        "limit": limit.to_string(),
    })
}

/// Extract `objects[0].field_bucket.buckets` from an aggregator response.
pub fn extract_buckets(field: &str, response: &Value) -> Result<Vec<FieldBucket>> {
    let buckets = response
        .get("objects")
        .and_then(|o| o.get(0))
        .and_then(|o| o.get(FIELD_BUCKET))
        .and_then(|b| b.get("buckets"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            TimesketchError::MalformedResponse(
                "aggregation response has no objects[0].field_bucket.buckets".to_string(),
            )
        })?;

    buckets.iter().map(|b| FieldBucket::from_raw(field, b)).collect()
}

/// Largest bucket count, or 0 when there are no buckets.
pub fn max_bucket_count(buckets: &[FieldBucket]) -> u64 {
    buckets.iter().map(|b| b.count).max().unwrap_or(0)
}

/// Whether a field is worth reporting during schema discovery.
///
/// A field whose most frequent value occurs `threshold` times or more is
/// treated as categorical noise and suppressed.
pub fn is_discoverable(buckets: &[FieldBucket], threshold: u64) -> bool {
    max_bucket_count(buckets) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(buckets: Value) -> Value {
        json!({ "objects": [ { "field_bucket": { "buckets": buckets } } ], "meta": {} })
    }

    fn bucket(count: u64) -> FieldBucket {
        FieldBucket {
            field: "f".to_string(),
            value: json!("v"),
            count,
        }
    }

    #[test]
    fn test_extract_buckets() {
        let resp = response(json!([
            { "data_type": "syslog:line", "count": 12 },
            { "data_type": "fs:stat", "count": 3 }
        ]));
        let buckets = extract_buckets("data_type", &resp).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].value, "syslog:line");
        assert_eq!(buckets[0].count, 12);
        assert_eq!(buckets[1].count, 3);
    }

    #[test]
    fn test_extract_empty_buckets() {
        let buckets = extract_buckets("x", &response(json!([]))).unwrap();
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_missing_shape_is_malformed() {
        for resp in [
            json!({}),
            json!({ "objects": [] }),
            json!({ "objects": [ { "other": {} } ] }),
            json!({ "objects": [ { "field_bucket": { "buckets": "nope" } } ] }),
        ] {
            let err = extract_buckets("x", &resp).unwrap_err();
            assert!(matches!(err, TimesketchError::MalformedResponse(_)), "{}", resp);
        }
    }

    #[test]
    fn test_bucket_without_count_is_malformed() {
        let err = extract_buckets("x", &response(json!([{ "x": "a" }]))).unwrap_err();
        assert!(matches!(err, TimesketchError::MalformedResponse(_)));
    }

    #[test]
    fn test_bucket_serializes_under_field_name() {
        let b = FieldBucket {
            field: "data_type".to_string(),
            value: json!("syslog:line"),
            count: 7,
        };
        assert_eq!(
            serde_json::to_value(&b).unwrap(),
            json!({ "data_type": "syslog:line", "count": 7 })
        );
    }

    #[test]
    fn test_params_limit_is_string() {
        assert_eq!(
            field_bucket_params("data_type", 10_000),
            json!({ "field": "data_type", "limit": "10000" })
        );
    }

    #[test]
    fn test_discoverable_threshold() {
        assert!(is_discoverable(&[bucket(9), bucket(1)], 10));
        assert!(!is_discoverable(&[bucket(10), bucket(1)], 10));
        assert!(!is_discoverable(&[bucket(2), bucket(500)], 10));
        assert!(is_discoverable(&[], 10));
    }
}
