//! In-memory [`TimesketchBackend`] for tests.
//!
//! Sketches and events live in a `HashMap` behind `std::sync::RwLock`.
//! Queries are only partially understood: empty / `*` match everything, a
//! single `field:"value"` term matches exactly, and anything else matches
//! every event. Sorting, paging (the scroll id is the next offset), return
//! field projection, and the star chip are honoured.
//!
//! Failure injection covers the two behaviours the search path cares about:
//! a sketch that is not yet visible for the first N lookups, and searches
//! that always fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::aggregation::FIELD_BUCKET;
use crate::error::{Result, TimesketchError};
use crate::models::{
    ExplorePage, ExploreRequest, Record, ReturnFields, Sketch, SortOrder, DATETIME, IDENTIFIER,
};

use super::TimesketchBackend;

struct StoredEvent {
    id: String,
    source: Record,
    starred: bool,
}

struct StoredSketch {
    sketch: Sketch,
    events: Vec<StoredEvent>,
}

/// In-memory backend with call counters and failure injection.
pub struct InMemoryBackend {
    sketches: RwLock<HashMap<i64, StoredSketch>>,
    hidden_lookups: AtomicU32,
    search_failure: RwLock<Option<String>>,
    next_event_id: AtomicUsize,
    sketch_lookups: AtomicUsize,
    aggregator_runs: AtomicUsize,
    explore_requests: Mutex<Vec<ExploreRequest>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            sketches: RwLock::new(HashMap::new()),
            hidden_lookups: AtomicU32::new(0),
            search_failure: RwLock::new(None),
            next_event_id: AtomicUsize::new(1),
            sketch_lookups: AtomicUsize::new(0),
            aggregator_runs: AtomicUsize::new(0),
            explore_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn insert_sketch(&self, id: i64, name: &str) {
        let mut sketches = self.sketches.write().unwrap();
        sketches.insert(
            id,
            StoredSketch {
                sketch: Sketch {
                    id,
                    name: name.to_string(),
                },
                events: Vec::new(),
            },
        );
    }

    /// Add an event to a sketch. `source` must be a JSON object.
    ///
    /// Returns the generated event id.
    pub fn add_event(&self, sketch_id: i64, source: Value, starred: bool) -> String {
        let id = format!("ev-{}", self.next_event_id.fetch_add(1, Ordering::SeqCst));
        let source = source.as_object().cloned().unwrap_or_default();
        let mut sketches = self.sketches.write().unwrap();
        if let Some(stored) = sketches.get_mut(&sketch_id) {
            stored.events.push(StoredEvent {
                id: id.clone(),
                source,
                starred,
            });
        }
        id
    }

    /// Make the next `lookups` sketch lookups miss, as if the sketch had not
    /// been indexed yet.
    pub fn hide_sketch_for(&self, lookups: u32) {
        self.hidden_lookups.store(lookups, Ordering::SeqCst);
    }

    /// Make every explore call fail with `message`.
    pub fn fail_searches_with(&self, message: &str) {
        *self.search_failure.write().unwrap() = Some(message.to_string());
    }

    pub fn sketch_lookups(&self) -> usize {
        self.sketch_lookups.load(Ordering::SeqCst)
    }

    pub fn aggregator_runs(&self) -> usize {
        self.aggregator_runs.load(Ordering::SeqCst)
    }

    /// Every explore request received so far, in order.
    pub fn explore_requests(&self) -> Vec<ExploreRequest> {
        self.explore_requests.lock().unwrap().clone()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_query(query: &str, source: &Record) -> bool {
    let q = query.trim();
    if q.is_empty() || q == "*" {
        return true;
    }
    if let Some((field, rest)) = q.split_once(':') {
        if let Some(value) = rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            return source.get(field).and_then(Value::as_str) == Some(value);
        }
    }
    true
}

fn sort_key(source: &Record) -> String {
    match source.get(DATETIME) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn project(event: &StoredEvent, fields: &ReturnFields) -> Record {
    let mut out = Record::new();
    out.insert(IDENTIFIER.to_string(), Value::String(event.id.clone()));
    for (key, value) in &event.source {
        if fields.includes(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

#[async_trait]
impl TimesketchBackend for InMemoryBackend {
    async fn get_sketch(&self, sketch_id: i64) -> Result<Option<Sketch>> {
        self.sketch_lookups.fetch_add(1, Ordering::SeqCst);

        let hidden = self
            .hidden_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(None);
        }

        let sketches = self.sketches.read().unwrap();
        Ok(sketches.get(&sketch_id).map(|s| s.sketch.clone()))
    }

    async fn run_aggregator(
        &self,
        sketch_id: i64,
        aggregator_name: &str,
        parameters: &Value,
    ) -> Result<Value> {
        self.aggregator_runs.fetch_add(1, Ordering::SeqCst);

        if aggregator_name != FIELD_BUCKET {
            return Err(TimesketchError::SearchFailed(format!(
                "unknown aggregator: {}",
                aggregator_name
            )));
        }
        let field = parameters
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| TimesketchError::InvalidInput("aggregator needs a field".into()))?;
        let limit = match parameters.get("limit") {
            Some(Value::String(s)) => s.parse::<usize>().unwrap_or(10_000),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(10_000) as usize,
            _ => 10_000,
        };

        let sketches = self.sketches.read().unwrap();
        let stored = sketches
            .get(&sketch_id)
            .ok_or_else(|| TimesketchError::sketch_not_found(sketch_id))?;

        let mut counts: Vec<(Value, u64)> = Vec::new();
        for event in &stored.events {
            if let Some(value) = event.source.get(field) {
                match counts.iter_mut().find(|(v, _)| v == value) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((value.clone(), 1)),
                }
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(limit);

        let buckets: Vec<Value> = counts
            .into_iter()
            .map(|(value, count)| json!({ field: value, "count": count }))
            .collect();

        Ok(json!({
            "meta": { "name": FIELD_BUCKET },
            "objects": [ { FIELD_BUCKET: { "buckets": buckets } } ]
        }))
    }

    async fn explore(&self, sketch_id: i64, request: &ExploreRequest) -> Result<ExplorePage> {
        self.explore_requests.lock().unwrap().push(request.clone());

        if let Some(message) = self.search_failure.read().unwrap().clone() {
            return Err(TimesketchError::SearchFailed(message));
        }

        let sketches = self.sketches.read().unwrap();
        let stored = sketches
            .get(&sketch_id)
            .ok_or_else(|| TimesketchError::sketch_not_found(sketch_id))?;

        let starred_only = request.starred_only();
        let mut matched: Vec<&StoredEvent> = stored
            .events
            .iter()
            .filter(|e| !starred_only || e.starred)
            .filter(|e| matches_query(&request.query, &e.source))
            .collect();
        matched.sort_by_key(|e| sort_key(&e.source));
        if request.order == SortOrder::Desc {
            matched.reverse();
        }

        let total = matched.len();
        let offset = request
            .scroll_id
            .as_deref()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        let events: Vec<Record> = matched
            .iter()
            .skip(offset)
            .take(request.size)
            .map(|e| project(e, &request.return_fields))
            .collect();

        let next = offset + events.len();
        let scroll_id = if request.enable_scroll && next < total {
            Some(next.to_string())
        } else {
            None
        };

        Ok(ExplorePage {
            events,
            total: Some(total as u64),
            scroll_id,
        })
    }
}
