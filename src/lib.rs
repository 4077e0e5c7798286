//! # Timesketch MCP
//!
//! An MCP tool server that lets AI agents investigate forensic timelines
//! stored in a remote Timesketch instance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Agent   │──▶│  /mcp, REST  │──▶│ ToolRegistry │──▶│ Timesketch │
//! │ (client) │   │   (server)   │   │ search, aggs │   │  REST API  │
//! └──────────┘   └──────────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! Query building, result normalization, and aggregation parsing live in the
//! `timesketch-mcp-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! export TIMESKETCH_HOST=timesketch.local TIMESKETCH_USER=analyst TIMESKETCH_PASSWORD=...
//! timesketch-mcp serve --mcp-port 8081
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML tuning knobs and `TIMESKETCH_*` settings |
//! | [`client`] | Authenticated HTTP client for the Timesketch API |
//! | [`accessor`] | Lazily built, shared client handle |
//! | [`retry`] | Fixed-delay retry policy |
//! | [`search`] | Bounded, paged search execution |
//! | [`aggregation`] | `field_bucket` runs and field discovery |
//! | [`tools`] | The agent-callable tools and their registry |
//! | [`mcp`] | MCP protocol bridge |
//! | [`server`] | HTTP server |

pub mod accessor;
pub mod aggregation;
pub mod client;
pub mod config;
pub mod mcp;
pub mod retry;
pub mod search;
pub mod server;
pub mod tools;
