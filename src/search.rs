//! Bounded search execution against one sketch.
//!
//! [`SearchExecutor::search`] resolves the sketch, pages through the explore
//! API until the result bound is reached, and retries the whole path on
//! not-found errors per its [`RetryPolicy`]. The bound is the caller's limit,
//! or the total hit count reported with the first page when no limit is set.
//!
//! The returned table is raw; pass it through
//! [`normalize`](timesketch_mcp_core::normalize::normalize) before handing it
//! to a caller.

use std::sync::Arc;
use tracing::{debug, info};

use timesketch_mcp_core::backend::TimesketchBackend;
use timesketch_mcp_core::models::{Chip, ExploreRequest, ReturnFields, SortOrder, Table};
use timesketch_mcp_core::TimesketchError;

use crate::retry::{retry, RetryPolicy};

/// Everything that determines one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub sketch_id: i64,
    pub query: String,
    /// Maximum number of events; `None` fetches every hit.
    pub limit: Option<usize>,
    pub sort: SortOrder,
    pub starred: bool,
    pub return_fields: ReturnFields,
}

impl SearchParams {
    pub fn new(sketch_id: i64, query: impl Into<String>) -> Self {
        Self {
            sketch_id,
            query: query.into(),
            limit: None,
            sort: SortOrder::default(),
            starred: false,
            return_fields: ReturnFields::default_set(),
        }
    }
}

pub struct SearchExecutor {
    backend: Arc<dyn TimesketchBackend>,
    policy: RetryPolicy,
    page_size: usize,
}

impl SearchExecutor {
    pub fn new(backend: Arc<dyn TimesketchBackend>, policy: RetryPolicy, page_size: usize) -> Self {
        Self {
            backend,
            policy,
            page_size: page_size.max(1),
        }
    }

    /// Run a search, retrying on not-found.
    pub async fn search(&self, params: &SearchParams) -> Result<Table, TimesketchError> {
        let table = retry(&self.policy, |attempt| self.search_once(params, attempt)).await?;
        info!(
            sketch_id = params.sketch_id,
            events = table.len(),
            "search complete"
        );
        Ok(table)
    }

    async fn search_once(&self, params: &SearchParams, attempt: u32) -> Result<Table, TimesketchError> {
        debug!(sketch_id = params.sketch_id, attempt, query = %params.query, "searching");

        let sketch = self
            .backend
            .get_sketch(params.sketch_id)
            .await?
            .ok_or_else(|| TimesketchError::sketch_not_found(params.sketch_id))?;
        debug!(sketch_id = sketch.id, sketch = %sketch.name, "sketch resolved");

        let mut request = ExploreRequest::new(params.query.clone(), params.return_fields.clone());
        request.order = params.sort;
        if params.starred {
            request.chips.push(Chip::star());
        }

        let mut bound = params.limit;
        request.enable_scroll = bound.map_or(true, |b| b > self.page_size);

        let mut events = Table::new();
        loop {
            let remaining = bound.map_or(self.page_size, |b| b.saturating_sub(events.len()));
            if remaining == 0 {
                break;
            }
            request.size = remaining.min(self.page_size);

            let page = self
                .backend
                .explore(params.sketch_id, &request)
                .await
                .map_err(into_search_error)?;

            if bound.is_none() {
                bound = Some(page.total.map_or(usize::MAX, |t| t as usize));
            }

            let received = page.events.len();
            events.extend(page.events);

            match page.scroll_id {
                Some(scroll_id) if received > 0 => request.scroll_id = Some(scroll_id),
                _ => break,
            }
        }

        if let Some(b) = bound {
            events.truncate(b);
        }
        Ok(events)
    }
}

/// Keep not-found (retryable) and search-failed errors; wrap anything else.
fn into_search_error(err: TimesketchError) -> TimesketchError {
    match err {
        TimesketchError::NotFound(_) | TimesketchError::SearchFailed(_) => err,
        other => TimesketchError::SearchFailed(other.to_string()),
    }
}
