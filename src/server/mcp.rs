//! Newline-delimited JSON-RPC 2.0 transport for the friction tools.
//!
//! One request per line in, one response per line out. Tool failures are
//! reported inside a successful response with `isError` set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// Incoming JSON-RPC 2.0 message. A missing `id` marks a notification.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outgoing JSON-RPC 2.0 message carrying either `result` or `error`.
/// `id` is serialized as `null` when the request had none.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Handshake payload returned by `initialize`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub tools: ToolCapabilities,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapabilities {
    /// The tool set is static.
    pub list_changed: bool,
}

/// A tool advertised by `tools/list`, with the JSON Schema of its arguments.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// `tools/call` params.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Tool output as a single text item. Failures set `isError` instead of
/// producing a JSON-RPC error.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    fn text(text: String, is_error: bool) -> Self {
        Self {
            content: vec![ToolResultContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: is_error.then_some(true),
        }
    }
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error codes used by the server.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP server speaking newline-delimited JSON-RPC.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Serve requests on stdin/stdout until EOF.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Friction Lens MCP server starting...");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve requests from `reader`, writing one response line per request
    /// to `writer`. Notifications get no response.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let Some(response) = self.respond(line.trim()).await else {
                continue;
            };
            let encoded = serde_json::to_string(&response)?;
            debug!(response = %encoded, "Sending response");

            writer.write_all(encoded.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        info!("Input closed, shutting down");
        Ok(())
    }

    /// Response to one raw input line, if it warrants one.
    async fn respond(&self, line: &str) -> Option<JsonRpcResponse> {
        if line.is_empty() {
            return None;
        }
        debug!(request = %line, "Received request");

        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                warn!(error = %e, "Unparseable request line");
                Some(JsonRpcResponse::error(
                    None,
                    codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Dispatch one request. Returns `None` for notifications.
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        match (method.as_str(), id) {
            ("initialize", id) => Some(self.handle_initialize(id)),
            ("tools/list", id) => Some(self.handle_tools_list(id)),
            ("tools/call", id) => Some(self.handle_tool_call(id, params).await),
            ("ping", id) => Some(JsonRpcResponse::success(id, serde_json::json!({}))),
            (_, None) => {
                debug!(method = %method, "Notification received");
                None
            }
            (_, Some(id)) => {
                warn!(method = %method, "Unknown method");
                Some(JsonRpcResponse::error(
                    Some(id),
                    codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                ))
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "friction-lens".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        serialized(id, result)
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");
        JsonRpcResponse::success(id, serde_json::json!({ "tools": tool_definitions() }))
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        codes::INVALID_PARAMS,
                        format!("Invalid params: {}", e),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let result = match handle_tool_call(&self.state, &params.name, params.arguments).await {
            Ok(value) => match serde_json::to_string_pretty(&value) {
                Ok(text) => ToolCallResult::text(text, false),
                Err(e) => {
                    error!(tool = %params.name, error = %e, "Failed to serialize tool result");
                    ToolCallResult::text(format!("Error: serialization failed: {}", e), true)
                }
            },
            Err(e) => {
                debug!(tool = %params.name, error = %e, "Tool call failed");
                ToolCallResult::text(format!("Error: {}", e), true)
            }
        };
        serialized(id, result)
    }
}

/// Wrap a serializable result, degrading to an internal error.
fn serialized<T: Serialize>(id: Option<Value>, result: T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            error!(error = %e, "Failed to serialize result");
            JsonRpcResponse::error(id, codes::INTERNAL_ERROR, format!("Internal error: {}", e))
        }
    }
}

/// Every tool the server exposes.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        collect_tool(),
        analyze_tool(),
        incident_get_tool(),
        repro_tool(),
        survey_answer_tool(),
    ]
}

fn survey_answer_tool() -> Tool {
    Tool {
        name: "friction_survey_answer".to_string(),
        description: "Record a user's yes/no answer to a survey question with the configured collector.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "question_id": {
                    "type": "string",
                    "description": "Collector question id"
                },
                "answer": {
                    "type": "string",
                    "enum": ["yes", "no"]
                }
            },
            "required": ["question_id", "answer"]
        }),
    }
}

fn collect_tool() -> Tool {
    Tool {
        name: "friction_collect".to_string(),
        description: "Ingest a batch of telemetry events. Creates an incident when the batch carries a friction signal with confidence above 0.7.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session the batch belongs to; falls back to per-event session ids"
                },
                "page": {
                    "type": "string",
                    "description": "Page path applied to events without one"
                },
                "events": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": { "type": "string" },
                            "ts": { "type": "integer" },
                            "session_id": { "type": "string" },
                            "page": { "type": "string" },
                            "meta": { "type": ["object", "string", "null"] }
                        },
                        "required": ["type", "ts"]
                    }
                },
                "client_state": {
                    "type": "object",
                    "properties": {
                        "trigger": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                        "friction_score": { "type": "integer" },
                        "external_error_id": { "type": "string" }
                    }
                }
            },
            "required": ["events"]
        }),
    }
}

fn analyze_tool() -> Tool {
    Tool {
        name: "friction_analyze".to_string(),
        description: "Correlate a session's incident with its backend error, rank likely root causes, build a repro script and an AI report, and save them on the incident. May take up to 40 seconds while waiting for late data.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to analyze"
                },
                "incident_id": {
                    "type": "string",
                    "description": "Known incident id; the session's latest incident is used otherwise"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    }
}

fn incident_get_tool() -> Tool {
    Tool {
        name: "friction_incident_get".to_string(),
        description: "Fetch an incident by id, or the most recent incident of a session.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "incident_id": { "type": "string" },
                "session_id": { "type": "string" }
            },
            "additionalProperties": false
        }),
    }
}

fn repro_tool() -> Tool {
    Tool {
        name: "friction_repro".to_string(),
        description: "Generate a Playwright reproduction script from a session's recorded events.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string" },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Most recent events to replay (default 50)"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    }
}
