//! # Timesketch MCP Core
//!
//! Transport-free logic for Timesketch MCP: data models, the error
//! taxonomy, substring query building, result table normalization,
//! `field_bucket` response parsing, and the [`backend::TimesketchBackend`]
//! trait with an in-memory implementation.
//!
//! This crate contains no tokio, reqwest, or other I/O dependencies. The
//! HTTP client and the retrying search executor live in the `timesketch-mcp`
//! crate.

pub mod aggregation;
pub mod backend;
pub mod error;
pub mod models;
pub mod normalize;
pub mod query;

pub use error::{ErrorKind, TimesketchError};
