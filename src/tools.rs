//! Agent-callable tools.
//!
//! Every operation exposed to agents implements [`Tool`] and is collected in
//! a [`ToolRegistry`]. Both transports (the MCP bridge and the REST routes)
//! dispatch through [`ToolRegistry::call`], so parameter validation, default
//! injection, and error typing are identical everywhere.
//!
//! # Built-in tools
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `discover_data_types` | Distinct `data_type` values with counts |
//! | `count_distinct_field_values` | Distinct values of any field with counts |
//! | `discover_fields_for_datatype` | Low-repetition fields of one data type |
//! | `search_timesketch_events_substrings` | Substring / regex search, fixed columns |
//! | `search_timesketch_events_advanced` | Raw query search, all fields |
//! | `search_timesketch_events` | Raw query search, fixed columns, optional field filter |
//!
//! # Errors
//!
//! Tools fail with [`TimesketchError`] (wrapped in `anyhow::Error`). The
//! transports downcast it to pick a status code or MCP error payload; see
//! [`error_kind`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use timesketch_mcp_core::aggregation::FieldBucket;
use timesketch_mcp_core::models::{ReturnFields, SortOrder, Table};
use timesketch_mcp_core::normalize::{normalize, ColumnSet};
use timesketch_mcp_core::query::build_scoped_substring_query;
use timesketch_mcp_core::{ErrorKind, TimesketchError};

use crate::accessor::ClientAccessor;
use crate::aggregation::{discover_fields, AggregationRunner};
use crate::config::Config;
use crate::retry::RetryPolicy;
use crate::search::{SearchExecutor, SearchParams};

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// An operation agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, unique within a registry.
    fn name(&self) -> &str;

    /// One-paragraph description shown to agents.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with validated parameters (defaults already injected).
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Serializable tool descriptor for `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

/// Kind of the [`TimesketchError`] behind `err`, if there is one.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<TimesketchError>().map(|e| e.kind())
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Shared state handed to every tool call: the config and the memoized
/// remote client.
#[derive(Clone)]
pub struct ToolContext {
    config: Arc<Config>,
    clients: Arc<ClientAccessor>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>, clients: Arc<ClientAccessor>) -> Self {
        Self { config, clients }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A search executor over the shared client, with the configured retry
    /// policy and page size.
    pub async fn executor(&self) -> Result<SearchExecutor, TimesketchError> {
        let backend = self.clients.get().await?;
        let policy = RetryPolicy::not_found(
            self.config.search.retry_attempts,
            self.config.search.retry_delay(),
        );
        Ok(SearchExecutor::new(
            backend,
            policy,
            self.config.search.page_size,
        ))
    }

    pub async fn aggregations(&self) -> Result<AggregationRunner, TimesketchError> {
        Ok(AggregationRunner::new(self.clients.get().await?))
    }

    /// Search and normalize in one step.
    pub async fn search(
        &self,
        params: &SearchParams,
        columns: ColumnSet,
    ) -> Result<Table, TimesketchError> {
        let table = self.executor().await?.search(params).await?;
        Ok(normalize(table, columns))
    }

    pub async fn field_bucket(
        &self,
        sketch_id: i64,
        field: &str,
    ) -> Result<Vec<FieldBucket>, TimesketchError> {
        self.aggregations()
            .await?
            .field_bucket(sketch_id, field, self.config.aggregation.bucket_limit)
            .await
    }

    pub async fn discover_fields(
        &self,
        sketch_id: i64,
        data_type: &str,
    ) -> Result<Vec<String>, TimesketchError> {
        let executor = self.executor().await?;
        let runner = self.aggregations().await?;
        discover_fields(
            &executor,
            &runner,
            &self.config.discovery,
            sketch_id,
            data_type,
        )
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameters
// ═══════════════════════════════════════════════════════════════════════

/// Check `params` against a tool's schema and inject defaults.
///
/// Verifies required keys, primitive types, and `enum` membership. Missing
/// optional keys with a `default` in the schema are filled in.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value, TimesketchError> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(TimesketchError::InvalidInput(format!(
                "parameters must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in &required {
        if !params_obj.contains_key(*req_field) {
            return Err(TimesketchError::InvalidInput(format!(
                "missing required parameter: {}",
                req_field
            )));
        }
    }

    let mut result = params_obj.clone();

    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(Value::Null) if !required.contains(&prop_name.as_str()) => {
                // Explicit null on an optional parameter means "not given".
                result.remove(prop_name);
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
            Some(value) => {
                if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        return Err(TimesketchError::InvalidInput(format!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected_type,
                            json_type_name(value)
                        )));
                    }
                }

                if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                    if !enum_values.contains(value) {
                        let allowed: Vec<String> =
                            enum_values.iter().map(|v| v.to_string()).collect();
                        return Err(TimesketchError::InvalidInput(format!(
                            "parameter '{}' must be one of [{}], got {}",
                            prop_name,
                            allowed.join(", "),
                            value
                        )));
                    }
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, TimesketchError> {
    serde_json::from_value(params).map_err(|e| TimesketchError::InvalidInput(e.to_string()))
}

fn default_operator() -> String {
    "AND".to_string()
}

fn default_sort() -> String {
    "desc".to_string()
}

fn ascending() -> String {
    "asc".to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Aggregation tools
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct SketchParams {
    sketch_id: i64,
}

#[derive(Deserialize)]
struct FieldParams {
    sketch_id: i64,
    field: String,
}

#[derive(Deserialize)]
struct DataTypeParams {
    sketch_id: i64,
    data_type: String,
}

fn sketch_id_schema() -> Value {
    json!({ "type": "integer", "description": "ID of the Timesketch sketch" })
}

/// Distinct `data_type` values in a sketch.
pub struct DiscoverDataTypesTool;

#[async_trait]
impl Tool for DiscoverDataTypesTool {
    fn name(&self) -> &str {
        "discover_data_types"
    }

    fn description(&self) -> &str {
        "Discover the data types in a Timesketch sketch. Returns a list of \
         {data_type, count} objects, most frequent first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "sketch_id": sketch_id_schema() },
            "required": ["sketch_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: SketchParams = parse_params(params)?;
        let buckets = ctx.field_bucket(p.sketch_id, "data_type").await?;
        Ok(serde_json::to_value(buckets)?)
    }
}

/// Distinct values of an arbitrary field.
pub struct CountDistinctFieldValuesTool;

#[async_trait]
impl Tool for CountDistinctFieldValuesTool {
    fn name(&self) -> &str {
        "count_distinct_field_values"
    }

    fn description(&self) -> &str {
        "Count the distinct values of a field in a Timesketch sketch. Returns a \
         list of {<field>, count} objects, most frequent first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sketch_id": sketch_id_schema(),
                "field": { "type": "string", "description": "Field to aggregate on, e.g. `hostname`" }
            },
            "required": ["sketch_id", "field"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: FieldParams = parse_params(params)?;
        let buckets = ctx.field_bucket(p.sketch_id, &p.field).await?;
        Ok(serde_json::to_value(buckets)?)
    }
}

/// Heuristic schema discovery for one data type.
pub struct DiscoverFieldsForDatatypeTool;

#[async_trait]
impl Tool for DiscoverFieldsForDatatypeTool {
    fn name(&self) -> &str {
        "discover_fields_for_datatype"
    }

    fn description(&self) -> &str {
        "Discover which fields events of a given data type carry. Samples events \
         of the data type and returns the field names whose values are not \
         dominated by one frequent value. Heuristic, not an exact schema."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sketch_id": sketch_id_schema(),
                "data_type": { "type": "string", "description": "Data type, e.g. `syslog:line`" }
            },
            "required": ["sketch_id", "data_type"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: DataTypeParams = parse_params(params)?;
        let fields = ctx.discover_fields(p.sketch_id, &p.data_type).await?;
        Ok(json!(fields))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Search tools
// ═══════════════════════════════════════════════════════════════════════

fn sort_schema(default: &str) -> Value {
    json!({
        "type": "string",
        "enum": ["asc", "desc"],
        "default": default,
        "description": "Sort order on datetime"
    })
}

fn starred_schema() -> Value {
    json!({ "type": "boolean", "default": false, "description": "Only return starred events" })
}

#[derive(Deserialize)]
struct SubstringSearchParams {
    sketch_id: i64,
    substrings: Vec<String>,
    #[serde(default)]
    regex: bool,
    #[serde(default = "default_operator")]
    boolean_operator: String,
    #[serde(default)]
    field: Option<String>,
    #[serde(default = "default_sort")]
    sort: String,
    #[serde(default)]
    starred: bool,
    #[serde(default)]
    limit: Option<usize>,
}

/// Search for events containing substrings (or matching regex fragments).
pub struct SubstringSearchTool;

#[async_trait]
impl Tool for SubstringSearchTool {
    fn name(&self) -> &str {
        "search_timesketch_events_substrings"
    }

    fn description(&self) -> &str {
        "Search a Timesketch sketch for events containing all (AND) or any (OR) \
         of the given substrings. Special characters are escaped for you. With \
         regex=true each substring is used as a regular expression fragment \
         instead; regex searches are much slower. Returns datetime, data_type, \
         tag, message, and yara_match / sha256_hash when present."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sketch_id": sketch_id_schema(),
                "substrings": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Substrings to look for"
                },
                "regex": { "type": "boolean", "default": false, "description": "Treat substrings as regex fragments" },
                "boolean_operator": { "type": "string", "enum": ["AND", "OR"], "default": "AND" },
                "field": { "type": "string", "description": "Restrict matching to this field" },
                "sort": sort_schema("desc"),
                "starred": starred_schema(),
                "limit": { "type": "integer", "description": "Maximum number of events; all when omitted or 0" }
            },
            "required": ["sketch_id", "substrings"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: SubstringSearchParams = parse_params(params)?;
        let query = build_scoped_substring_query(
            &p.substrings,
            p.regex,
            &p.boolean_operator,
            p.field.as_deref(),
        )?;

        let mut search = SearchParams::new(p.sketch_id, query);
        search.sort = p.sort.parse()?;
        search.starred = p.starred;
        search.limit = p.limit.filter(|n| *n > 0);
        search.return_fields = ReturnFields::default_set();

        let records = ctx.search(&search, ColumnSet::Fixed).await?;
        Ok(json!(records))
    }
}

#[derive(Deserialize)]
struct AdvancedSearchParams {
    sketch_id: i64,
    query: String,
    #[serde(default = "default_sort")]
    sort: String,
    #[serde(default)]
    starred: bool,
    #[serde(default)]
    limit: Option<usize>,
}

const QUERY_GUIDE: &str = "Always put double quotes around field values \
    (data_type:\"syslog:cron:task_run\"). Examples: data type \
    `data_type:\"apache:access_log:entry\"`, field match `filename:*.docx`, \
    exact phrase `\"mimikatz.exe\"`, boolean `(ssh AND error) OR tag:bruteforce`, \
    date range `datetime:[2025-04-01 TO 2025-04-02]`, wildcard `user:sam*`, \
    regex `host:/.*\\.google\\.com/`.";

/// Search with a caller-supplied query, returning every field.
pub struct AdvancedSearchTool;

#[async_trait]
impl Tool for AdvancedSearchTool {
    fn name(&self) -> &str {
        "search_timesketch_events_advanced"
    }

    fn description(&self) -> &str {
        "Search a Timesketch sketch with a Lucene/OpenSearch query string and \
         return every field of the matching events. Missing values are \"N/A\"."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sketch_id": sketch_id_schema(),
                "query": { "type": "string", "description": format!("Query string. {}", QUERY_GUIDE) },
                "sort": sort_schema("desc"),
                "starred": starred_schema(),
                "limit": { "type": "integer", "description": "Maximum number of events; all when omitted or 0" }
            },
            "required": ["sketch_id", "query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: AdvancedSearchParams = parse_params(params)?;
        if p.query.trim().is_empty() {
            return Err(TimesketchError::InvalidInput("query must not be empty".to_string()).into());
        }

        let mut search = SearchParams::new(p.sketch_id, p.query);
        search.sort = p.sort.parse()?;
        search.starred = p.starred;
        search.limit = p.limit.filter(|n| *n > 0);
        search.return_fields = ReturnFields::All;

        let records = ctx.search(&search, ColumnSet::All).await?;
        Ok(json!(records))
    }
}

#[derive(Deserialize)]
struct EventSearchParams {
    sketch_id: i64,
    query: String,
    #[serde(default)]
    filter_return_fields: Option<Vec<String>>,
    #[serde(default)]
    max_events: Option<usize>,
    #[serde(default = "ascending")]
    sort: String,
    #[serde(default)]
    starred: bool,
}

/// Query search with the fixed column set and an optional per-record key
/// filter.
pub struct EventSearchTool;

#[async_trait]
impl Tool for EventSearchTool {
    fn name(&self) -> &str {
        "search_timesketch_events"
    }

    fn description(&self) -> &str {
        "Search a Timesketch sketch with a Lucene/OpenSearch query string. Events \
         always contain datetime, data_type, and message, plus tag and \
         yara_match / sha256_hash when present. Use filter_return_fields to keep \
         only some of these keys."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sketch_id": sketch_id_schema(),
                "query": { "type": "string", "description": format!("Query string. {}", QUERY_GUIDE) },
                "filter_return_fields": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Keys to keep in each returned event"
                },
                "max_events": { "type": "integer", "description": "Maximum number of events; all when omitted or 0" },
                "sort": sort_schema("asc"),
                "starred": starred_schema()
            },
            "required": ["sketch_id", "query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: EventSearchParams = parse_params(params)?;

        let mut search = SearchParams::new(p.sketch_id, p.query);
        search.sort = p.sort.parse::<SortOrder>()?;
        search.starred = p.starred;
        search.limit = p.max_events.filter(|n| *n > 0);
        search.return_fields = ReturnFields::default_set();

        let mut records = ctx.search(&search, ColumnSet::Fixed).await?;
        if let Some(keep) = p.filter_return_fields.filter(|f| !f.is_empty()) {
            for record in &mut records {
                record.retain(|k, _| keep.iter().any(|f| f == k));
            }
        }
        Ok(json!(records))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered collection of tools, looked up by name.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with every built-in Timesketch tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DiscoverDataTypesTool));
        registry.register(Box::new(CountDistinctFieldValuesTool));
        registry.register(Box::new(DiscoverFieldsForDatatypeTool));
        registry.register(Box::new(SubstringSearchTool));
        registry.register(Box::new(AdvancedSearchTool));
        registry.register(Box::new(EventSearchTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| ToolInfo::of(t.as_ref())).collect()
    }

    /// Validate `params` against the named tool's schema and execute it.
    ///
    /// An unknown tool name is reported as [`TimesketchError::NotFound`].
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .find(name)
            .ok_or_else(|| TimesketchError::NotFound(format!("tool '{}'", name)))?;
        let params = validate_params(&tool.parameters_schema(), &params)?;
        tool.execute(params, ctx).await
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
