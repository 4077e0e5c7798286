//! HTTP server: MCP endpoint plus a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `*`    | `/mcp` | MCP Streamable HTTP transport |
//! | `GET`  | `/tools/list` | List all tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name, returns `{"result": ...}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Only the Streamable HTTP transport is served. Clients still configured
//! for the legacy SSE transport (`GET /sse` + `POST /messages`) must be
//! pointed at `/mcp` instead.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid input: substrings must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `not_found` | 404 |
//! | `search_failed` | 500 |
//! | `malformed_response` | 502 |
//! | `upstream_unavailable` | 502 |
//! | `tool_error` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use timesketch_mcp_core::ErrorKind;

use crate::accessor::ClientAccessor;
use crate::config::Config;
use crate::mcp::McpBridge;
use crate::tools::{error_kind, ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

/// Start the server with a client built from the `TIMESKETCH_*` environment
/// on first use. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let clients = ClientAccessor::from_env(config.search.request_timeout());
    run_server_with_clients(config, Arc::new(clients)).await
}

/// Start the server with a caller-provided client accessor.
pub async fn run_server_with_clients(
    config: &Config,
    clients: Arc<ClientAccessor>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind_addr();
    let ctx = ToolContext::new(Arc::new(config.clone()), clients);
    let tools = Arc::new(ToolRegistry::with_builtins());

    info!(count = tools.len(), "registered tools");
    for t in tools.tools() {
        debug!(tool = t.name(), "registered tool");
    }

    let app = router(tools, ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening (MCP at /mcp)");
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(tools: Arc<ToolRegistry>, ctx: ToolContext) -> Router {
    let mcp = McpBridge::new(tools.clone(), ctx.clone()).into_service();
    let state = AppState { tools, ctx };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .with_state(state)
        .nest_service("/mcp", mcp)
        .layer(cors)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::SearchFailed => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::MalformedResponse | ErrorKind::Connection => StatusCode::BAD_GATEWAY,
    }
}

/// Map a tool failure to a response by its [`ErrorKind`]. Errors that carry
/// no kind become `500 tool_error`.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let (status, code) = match error_kind(&err) {
        Some(kind) => (status_for(kind), kind.code()),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "tool_error"),
    };
    warn!(tool = tool_name, %status, error = %err, "tool call failed");
    AppError {
        status,
        code: code.to_string(),
        message: format!("{}: {}", tool_name, err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state
        .tools
        .call(&name, params, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use timesketch_mcp_core::TimesketchError;

    #[test]
    fn test_classify_by_kind() {
        let cases = [
            (TimesketchError::InvalidInput("x".into()), StatusCode::BAD_REQUEST, "bad_request"),
            (TimesketchError::sketch_not_found(1), StatusCode::NOT_FOUND, "not_found"),
            (
                TimesketchError::SearchFailed("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "search_failed",
            ),
            (
                TimesketchError::Connection("x".into()),
                StatusCode::BAD_GATEWAY,
                "upstream_unavailable",
            ),
        ];
        for (err, status, code) in cases {
            let app_err = classify_tool_error("t", err.into());
            assert_eq!(app_err.status, status);
            assert_eq!(app_err.code, code);
        }
    }

    #[test]
    fn test_untyped_error_is_tool_error() {
        let app_err = classify_tool_error("t", anyhow::anyhow!("boom"));
        assert_eq!(app_err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app_err.code, "tool_error");
        assert_eq!(app_err.message, "t: boom");
    }
}
