//! MCP JSON-RPC session helpers
//!
//! Builders for the three requests the flow sends (`initialize`,
//! `tools/list`, `tools/call`), plus decoding of responses that may arrive
//! either as plain JSON or as a `text/event-stream` body.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{PlaygroundError, Result};
use crate::transport::ResponseRecord;

/// Protocol revision announced in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Session header returned by `initialize` and replayed afterwards
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// `Accept` value for MCP requests
pub const MCP_ACCEPT: &str = "application/json, text/event-stream";

/// Client name announced in `initialize`
pub const CLIENT_NAME: &str = "MCP OAuth Playground";

/// Client version announced in `initialize`
pub const CLIENT_VERSION: &str = "1.0.0";

/// A tool as returned by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments
    #[serde(
        rename = "inputSchema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,
    /// Any other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `initialize` request body (id 0)
pub fn initialize_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": CLIENT_VERSION
            }
        }
    })
}

/// `tools/list` request body (id 1)
pub fn list_tools_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/list",
        "params": {}
    })
}

/// `tools/call` request body (id 2)
pub fn call_tool_request(name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {
            "name": name,
            "arguments": arguments
        }
    })
}

/// Parse user-supplied tool arguments
///
/// An empty string means no arguments.
///
/// # Errors
///
/// Returns [`PlaygroundError::InvalidToolArguments`] unless `raw` is a JSON
/// object.
pub fn parse_tool_arguments(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(PlaygroundError::InvalidToolArguments(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))
        .into()),
        Err(e) => Err(PlaygroundError::InvalidToolArguments(e.to_string()).into()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The session ID header of a response, matched case-insensitively
pub fn session_id(response: &ResponseRecord) -> Option<String> {
    response
        .header(SESSION_HEADER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Whether a text body is SSE-framed
pub fn is_event_stream(text: &str) -> bool {
    text.lines()
        .any(|line| line.starts_with("data:") || line.starts_with("event:"))
}

/// Extract the first JSON payload from an SSE body
///
/// Events are separated by blank lines; multi-line `data:` values are
/// joined with `\n`. Ping events and empty payloads are skipped.
pub fn event_stream_payload(text: &str) -> Option<Value> {
    let normalized = text.replace("\r\n", "\n");

    for block in normalized.split("\n\n") {
        let mut data_lines: Vec<&str> = Vec::new();
        let mut event_type: Option<&str> = None;

        for line in block.lines() {
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.trim());
            } else if let Some(value) = line.strip_prefix("event:") {
                event_type = Some(value.trim());
            }
            // `id:`, `retry:` and `:` comments carry nothing we need.
        }

        if event_type.is_some_and(|et| et.eq_ignore_ascii_case("ping")) {
            continue;
        }

        let data = data_lines.join("\n");
        if data.is_empty() || data.eq_ignore_ascii_case("[ping]") {
            continue;
        }

        if let Ok(value) = serde_json::from_str(&data) {
            return Some(value);
        }
    }

    None
}

/// Decode a JSON-RPC response body, whatever framing it arrived in
pub fn decode_rpc_body(body: &Value) -> Option<Value> {
    match body {
        Value::Null => None,
        Value::String(text) if is_event_stream(text) => event_stream_payload(text),
        Value::String(text) => serde_json::from_str(text).ok(),
        other => Some(other.clone()),
    }
}

/// The `result` member of a decoded JSON-RPC response
pub fn rpc_result(decoded: &Value) -> Option<&Value> {
    decoded.get("result")
}

/// The `error` member of a decoded JSON-RPC response
pub fn rpc_error(decoded: &Value) -> Option<&Value> {
    decoded.get("error")
}

/// Tools from a decoded `tools/list` response
///
/// Reads `result.tools`, falling back to a top-level `tools` array.
/// Entries without a string `name` are skipped.
pub fn extract_tools(decoded: &Value) -> Option<Vec<ToolDescriptor>> {
    let tools = decoded
        .get("result")
        .and_then(|r| r.get("tools"))
        .or_else(|| decoded.get("tools"))?
        .as_array()?;

    Some(
        tools
            .iter()
            .filter_map(|tool| serde_json::from_value(tool.clone()).ok())
            .collect(),
    )
}
