//! MCP JSON-RPC protocol bridge.
//!
//! Exposes the [`ToolRegistry`] as MCP tools over the Streamable HTTP
//! transport. Tool failures are reported as tool results with `isError`
//! set and a JSON body of the form
//! `{"error": {"code": "not_found", "message": "..."}}`, so agents see the
//! same error contract as REST callers.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::{ErrorData as McpError, ServerHandler};
use tracing::{debug, warn};

use crate::tools::{error_kind, ToolContext, ToolRegistry};

/// Bridges the tool registry to the MCP protocol.
///
/// Each MCP session receives a clone; the registry and client handle are
/// shared.
#[derive(Clone)]
pub struct McpBridge {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl McpBridge {
    pub fn new(tools: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { tools, ctx }
    }

    /// Streamable HTTP service serving this bridge, ready to mount on a router.
    pub fn into_service(self) -> StreamableHttpService<McpBridge, LocalSessionManager> {
        StreamableHttpService::new(
            move || Ok(self.clone()),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig::default(),
        )
    }

    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> =
            match tool.parameters_schema() {
                serde_json::Value::Object(map) => Arc::new(map),
                _ => Arc::new(serde_json::Map::new()),
            };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

/// JSON error payload for a failed tool call.
pub fn error_payload(err: &anyhow::Error) -> serde_json::Value {
    let code = error_kind(err).map_or("tool_error", |k| k.code());
    serde_json::json!({ "error": { "code": code, "message": err.to_string() } })
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "timesketch-mcp".to_string(),
                title: Some("Timesketch MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Forensic timeline investigation over Timesketch sketches. Start with \
                 discover_data_types, then discover_fields_for_datatype to learn which \
                 fields to query, and narrow down with the search tools. Event \
                 timestamps are UTC."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if self.tools.find(&request.name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        debug!(tool = %request.name, "mcp tool call");
        match self.tools.call(&request.name, params, &self.ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                warn!(tool = %request.name, error = %e, "tool call failed");
                let text = error_payload(&e).to_string();
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timesketch_mcp_core::TimesketchError;

    #[test]
    fn test_error_payload_uses_kind_code() {
        let err: anyhow::Error = TimesketchError::sketch_not_found(7).into();
        let payload = error_payload(&err);
        assert_eq!(payload["error"]["code"], "not_found");
        assert_eq!(payload["error"]["message"], "sketch with ID 7 not found");

        let other = anyhow::anyhow!("boom");
        assert_eq!(error_payload(&other)["error"]["code"], "tool_error");
    }

    #[test]
    fn test_mcp_tool_descriptors() {
        let registry = ToolRegistry::with_builtins();
        for tool in registry.tools() {
            let mcp = McpBridge::to_mcp_tool(tool.as_ref());
            assert_eq!(mcp.name, tool.name());
            assert_eq!(mcp.input_schema["type"], "object");
        }
    }
}
