//! Remote service abstraction.
//!
//! The [`TimesketchBackend`] trait covers the three calls the tool surface
//! needs from the remote service: sketch lookup, aggregator runs, and one
//! page of an explore (search) request. The HTTP client in the
//! `timesketch-mcp` crate implements it; [`memory::InMemoryBackend`] serves
//! tests.
//!
//! Implementations must be `Send + Sync`; one handle is shared by every
//! concurrent tool call.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{ExplorePage, ExploreRequest, Sketch};

#[async_trait]
pub trait TimesketchBackend: Send + Sync {
    /// Look up a sketch. `Ok(None)` when the id does not resolve.
    async fn get_sketch(&self, sketch_id: i64) -> Result<Option<Sketch>>;

    /// Run a named aggregator and return the raw response body.
    async fn run_aggregator(
        &self,
        sketch_id: i64,
        aggregator_name: &str,
        parameters: &Value,
    ) -> Result<Value>;

    /// Fetch one page of events.
    async fn explore(&self, sketch_id: i64, request: &ExploreRequest) -> Result<ExplorePage>;
}
