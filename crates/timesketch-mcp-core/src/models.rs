//! Core data types for Timesketch MCP.
//!
//! - [`Record`] / [`Table`]: one event and a list of events as returned by
//!   the explore API, keyed by field name.
//! - [`ExploreRequest`] / [`ExplorePage`]: one page of a remote search.
//! - [`Sketch`]: a resolved sketch.
//! - [`SortOrder`], [`BooleanOperator`], [`ReturnFields`], [`Chip`]: search knobs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::TimesketchError;

/// One event: field name → value. Column order is preserved.
pub type Record = Map<String, Value>;

/// A result table. Its columns are the union of the keys of its records.
pub type Table = Vec<Record>;

/// Column holding the event timestamp.
pub const DATETIME: &str = "datetime";
/// Column holding the event's data type.
pub const DATA_TYPE: &str = "data_type";
/// Column holding the event's message.
pub const MESSAGE: &str = "message";
/// Column holding the event's tags.
pub const TAG: &str = "tag";
/// Column holding the remote event id (`_id`).
pub const IDENTIFIER: &str = "identifier";
/// Column set by YARA-matching analyzers.
pub const YARA_MATCH: &str = "yara_match";
/// Column holding a file hash, when the parser produced one.
pub const SHA256_HASH: &str = "sha256_hash";

/// Label the remote service attaches to starred events.
pub const STAR_LABEL: &str = "__ts_star";

/// A sketch resolved from the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sketch {
    pub id: i64,
    pub name: String,
}

/// Sort direction on the `datetime` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = TimesketchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(TimesketchError::InvalidInput(format!(
                "sort must be 'asc' or 'desc', got '{}'",
                other
            ))),
        }
    }
}

/// Operator joining per-substring terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BooleanOperator {
    #[default]
    And,
    Or,
}

impl BooleanOperator {
    /// The operator as it appears in the query grammar.
    pub fn as_str(&self) -> &'static str {
        match self {
            BooleanOperator::And => "AND",
            BooleanOperator::Or => "OR",
        }
    }
}

impl FromStr for BooleanOperator {
    type Err = TimesketchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AND" => Ok(BooleanOperator::And),
            "OR" => Ok(BooleanOperator::Or),
            other => Err(TimesketchError::InvalidInput(format!(
                "boolean operator must be 'AND' or 'OR', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for BooleanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which event fields the remote search should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnFields {
    /// An explicit whitelist.
    Only(Vec<String>),
    /// Every field stored on the event.
    All,
}

impl ReturnFields {
    /// The whitelist used by the fixed-column tools.
    pub fn default_set() -> Self {
        ReturnFields::Only(
            [DATETIME, MESSAGE, DATA_TYPE, TAG, YARA_MATCH, SHA256_HASH]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    /// Comma-separated form accepted by the explore API (`*` for all).
    pub fn to_param(&self) -> String {
        match self {
            ReturnFields::Only(fields) => fields.join(", "),
            ReturnFields::All => "*".to_string(),
        }
    }

    pub fn includes(&self, field: &str) -> bool {
        match self {
            ReturnFields::Only(fields) => fields.iter().any(|f| f == field),
            ReturnFields::All => true,
        }
    }
}

/// A filter fragment attached to a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chip {
    #[serde(rename = "type")]
    pub chip_type: String,
    pub field: String,
    pub value: String,
    pub operator: String,
    pub active: bool,
}

impl Chip {
    /// Restricts results to starred events.
    pub fn star() -> Self {
        Self {
            chip_type: "label".to_string(),
            field: String::new(),
            value: STAR_LABEL.to_string(),
            operator: "must".to_string(),
            active: true,
        }
    }

    pub fn is_star(&self) -> bool {
        self.active && self.chip_type == "label" && self.value == STAR_LABEL
    }
}

/// One page request against the explore API.
#[derive(Debug, Clone, PartialEq)]
pub struct ExploreRequest {
    pub query: String,
    pub order: SortOrder,
    /// Maximum number of events in this page.
    pub size: usize,
    pub chips: Vec<Chip>,
    pub return_fields: ReturnFields,
    /// Continuation token from the previous page.
    pub scroll_id: Option<String>,
    pub enable_scroll: bool,
}

impl ExploreRequest {
    pub fn new(query: impl Into<String>, return_fields: ReturnFields) -> Self {
        Self {
            query: query.into(),
            order: SortOrder::default(),
            size: 0,
            chips: Vec::new(),
            return_fields,
            scroll_id: None,
            enable_scroll: false,
        }
    }

    pub fn starred_only(&self) -> bool {
        self.chips.iter().any(Chip::is_star)
    }
}

/// One page of events returned by the explore API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplorePage {
    pub events: Table,
    /// Total number of hits reported by the search backend.
    pub total: Option<u64>,
    /// Continuation token, present when more pages may follow.
    pub scroll_id: Option<String>,
}
