//! `field_bucket` aggregation runs and heuristic field discovery.

use std::sync::Arc;
use tracing::{debug, info};

use timesketch_mcp_core::aggregation::{
    extract_buckets, field_bucket_params, is_discoverable, max_bucket_count, FieldBucket,
    FIELD_BUCKET,
};
use timesketch_mcp_core::backend::TimesketchBackend;
use timesketch_mcp_core::models::{ReturnFields, IDENTIFIER};
use timesketch_mcp_core::normalize::table_columns;
use timesketch_mcp_core::query::field_equals_query;
use timesketch_mcp_core::TimesketchError;

use crate::config::DiscoveryConfig;
use crate::search::{SearchExecutor, SearchParams};

pub struct AggregationRunner {
    backend: Arc<dyn TimesketchBackend>,
}

impl AggregationRunner {
    pub fn new(backend: Arc<dyn TimesketchBackend>) -> Self {
        Self { backend }
    }

    /// Distinct values of `field` with their event counts, most frequent
    /// first, at most `limit` buckets.
    pub async fn field_bucket(
        &self,
        sketch_id: i64,
        field: &str,
        limit: usize,
    ) -> Result<Vec<FieldBucket>, TimesketchError> {
        if field.trim().is_empty() {
            return Err(TimesketchError::InvalidInput(
                "field must not be empty".to_string(),
            ));
        }

        self.backend
            .get_sketch(sketch_id)
            .await?
            .ok_or_else(|| TimesketchError::sketch_not_found(sketch_id))?;

        let response = self
            .backend
            .run_aggregator(sketch_id, FIELD_BUCKET, &field_bucket_params(field, limit))
            .await?;
        let buckets = extract_buckets(field, &response)?;
        debug!(sketch_id, field, buckets = buckets.len(), "field_bucket");
        Ok(buckets)
    }
}

/// Find the fields of a data type worth querying on.
///
/// Samples up to `config.sample_limit` events of `data_type`, collects the
/// field names they carry (first-seen order), and keeps a field only when
/// its most frequent value occurs fewer than `config.max_bucket_count`
/// times among the top `config.bucket_limit` buckets.
pub async fn discover_fields(
    executor: &SearchExecutor,
    runner: &AggregationRunner,
    config: &DiscoveryConfig,
    sketch_id: i64,
    data_type: &str,
) -> Result<Vec<String>, TimesketchError> {
    if data_type.trim().is_empty() {
        return Err(TimesketchError::InvalidInput(
            "data_type must not be empty".to_string(),
        ));
    }

    let mut params = SearchParams::new(sketch_id, field_equals_query("data_type", data_type));
    params.limit = Some(config.sample_limit);
    params.return_fields = ReturnFields::All;
    let sample = executor.search(&params).await?;

    let mut discoverable = Vec::new();
    for field in table_columns(&sample) {
        // The event id is metadata, not an indexed field.
        if field == IDENTIFIER {
            continue;
        }
        let buckets = runner
            .field_bucket(sketch_id, &field, config.bucket_limit)
            .await?;
        if is_discoverable(&buckets, config.max_bucket_count) {
            discoverable.push(field);
        } else {
            debug!(
                field = %field,
                max_count = max_bucket_count(&buckets),
                "suppressing high-repetition field"
            );
        }
    }

    info!(
        sketch_id,
        data_type,
        sampled = sample.len(),
        fields = discoverable.len(),
        "field discovery complete"
    );
    Ok(discoverable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use timesketch_mcp_core::backend::memory::InMemoryBackend;

    fn backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_sketch(1, "case");
        backend
    }

    #[tokio::test]
    async fn test_field_bucket() {
        let backend = backend();
        for dt in ["a", "a", "b"] {
            backend.add_event(1, json!({ "data_type": dt }), false);
        }
        let runner = AggregationRunner::new(backend);
        let buckets = runner.field_bucket(1, "data_type", 10_000).await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].value, "a");
        assert_eq!(buckets[0].count, 2);
    }

    #[tokio::test]
    async fn test_field_bucket_unknown_sketch() {
        let runner = AggregationRunner::new(backend());
        let err = runner.field_bucket(5, "data_type", 10).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_discover_fields_threshold() {
        let backend = backend();
        // `hostname` repeats 12 times (suppressed); `pid` never repeats (kept).
        for i in 0..12 {
            backend.add_event(
                1,
                json!({ "data_type": "syslog:line", "hostname": "web-1", "pid": i }),
                false,
            );
        }
        backend.add_event(1, json!({ "data_type": "other", "user": "x" }), false);

        let executor = SearchExecutor::new(backend.clone(), RetryPolicy::none(), 100);
        let runner = AggregationRunner::new(backend.clone());
        let fields = discover_fields(
            &executor,
            &runner,
            &DiscoveryConfig::default(),
            1,
            "syslog:line",
        )
        .await
        .unwrap();

        // data_type itself has 12 events of one value: suppressed as well.
        assert_eq!(fields, vec!["pid".to_string()]);

        let sample = &backend.explore_requests()[0];
        assert_eq!(sample.query, "data_type:\"syslog:line\"");
        assert_eq!(sample.return_fields, ReturnFields::All);
    }

    #[tokio::test]
    async fn test_discover_fields_boundary() {
        let backend = backend();
        for i in 0..9 {
            backend.add_event(
                1,
                json!({ "data_type": "fs:stat", "inode": "n0", "size": i }),
                false,
            );
        }
        let executor = SearchExecutor::new(backend.clone(), RetryPolicy::none(), 100);
        let runner = AggregationRunner::new(backend);
        let fields = discover_fields(&executor, &runner, &DiscoveryConfig::default(), 1, "fs:stat")
            .await
            .unwrap();
        // Nine identical values stay under the threshold of ten.
        assert_eq!(fields, vec!["data_type", "inode", "size"]);
    }

    #[tokio::test]
    async fn test_discover_fields_empty_data_type() {
        let backend = backend();
        let executor = SearchExecutor::new(backend.clone(), RetryPolicy::none(), 100);
        let runner = AggregationRunner::new(backend);
        let err = discover_fields(&executor, &runner, &DiscoveryConfig::default(), 1, " ")
            .await
            .unwrap_err();
        assert!(matches!(err, TimesketchError::InvalidInput(_)));
    }
}
