//! MCP (Model Context Protocol) JSON-RPC 2.0 codec and message types.
//!
//! Request ids are unsigned integers assigned by the client. Id `0` is
//! reserved for notifications: the envelope carries no `id` member and no
//! response is ever awaited for it.

use std::convert::Infallible;

use eventsource_stream::Eventsource;
use futures_util::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::warn;

use crate::mcp::error::{McpError, McpResult};

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Id value that marks a notification.
pub const NOTIFICATION_ID: u64 = 0;

/// JSON-RPC "internal error" code, used when a server's error object carries
/// no usable code.
pub const INTERNAL_ERROR: i64 = -32603;

/// The error object within a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl JsonRpcErrorObject {
    /// Lenient parse: a missing code becomes [`INTERNAL_ERROR`] and a missing
    /// message becomes the raw error JSON.
    fn from_value(error: JsonValue) -> Self {
        match serde_json::from_value::<Self>(error.clone()) {
            Ok(parsed) => parsed,
            Err(_) => Self {
                code: error.get("code").and_then(JsonValue::as_i64).unwrap_or(INTERNAL_ERROR),
                message: error
                    .get("message")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
                data: None,
            },
        }
    }
}

impl From<JsonRpcErrorObject> for McpError {
    fn from(err: JsonRpcErrorObject) -> Self {
        McpError::JsonRpc {
            code: err.code,
            message: err.message,
        }
    }
}

// =============================================================================
// Envelope encoding / decoding
// =============================================================================

/// Builds a request envelope. `id == 0` produces a notification.
pub fn encode_request(id: u64, method: &str, params: Option<JsonValue>) -> JsonValue {
    let mut envelope = Map::new();
    envelope.insert("jsonrpc".to_string(), json!("2.0"));
    if id != NOTIFICATION_ID {
        envelope.insert("id".to_string(), json!(id));
    }
    envelope.insert("method".to_string(), json!(method));
    if let Some(params) = params {
        envelope.insert("params".to_string(), params);
    }
    JsonValue::Object(envelope)
}

/// Extracts the `result` of a raw JSON-RPC response.
///
/// Non-objects are parse failures; an `error` member wins over `result`; a
/// response carrying neither is a protocol error.
pub fn decode_response(raw: JsonValue) -> McpResult<JsonValue> {
    let JsonValue::Object(mut response) = raw else {
        return Err(McpError::Protocol(
            "parse error: response is not a JSON object".to_string(),
        ));
    };

    if let Some(error) = response.remove("error") {
        return Err(JsonRpcErrorObject::from_value(error).into());
    }

    response
        .remove("result")
        .ok_or_else(|| McpError::Protocol("missing result".to_string()))
}

/// True if the value is an object carrying a `jsonrpc` member.
pub fn is_jsonrpc_message(value: &JsonValue) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("jsonrpc"))
}

/// True for a reply to a client request: a JSON-RPC object with `result` or
/// `error` and no `method`. Server-initiated requests share the id space with
/// our own and must never be routed as replies.
pub fn is_jsonrpc_response(value: &JsonValue) -> bool {
    value.as_object().is_some_and(|o| {
        o.contains_key("jsonrpc")
            && !o.contains_key("method")
            && (o.contains_key("result") || o.contains_key("error"))
    })
}

/// Numeric id of a JSON-RPC message. Decimal string ids are accepted since
/// some servers echo ids as strings.
pub fn response_id(value: &JsonValue) -> Option<u64> {
    match value.get("id")? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses a response body that is either plain JSON or an SSE-framed stream,
/// returning the first JSON-RPC object found.
pub fn parse_response_text(text: &str) -> McpResult<JsonValue> {
    let trimmed = text.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Err(McpError::Protocol("empty response body".to_string()));
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| McpError::Protocol(format!("invalid JSON response: {}", e)));
    }

    // The whole body is already in memory, so the event stream resolves
    // without ever pending.
    let chunk = format!("{}\n\n", trimmed);
    let events = futures_util::stream::iter([Ok::<_, Infallible>(chunk)])
        .eventsource()
        .collect::<Vec<_>>()
        .now_or_never()
        .unwrap_or_default();

    events
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|event| serde_json::from_str::<JsonValue>(&event.data).ok())
        .find(is_jsonrpc_message)
        .ok_or_else(|| McpError::Protocol("no JSON-RPC message in response body".to_string()))
}

// =============================================================================
// MCP Protocol Handshake Types
// =============================================================================

/// Parameters for the `initialize` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The MCP version the client supports
    pub protocol_version: String,
    /// Client capabilities
    pub capabilities: ClientCapabilities,
    /// Information about the client implementation
    pub client_info: Implementation,
}

impl InitializeParams {
    pub fn new(capabilities: ClientCapabilities, client_info: Implementation) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities,
            client_info,
        }
    }
}

/// Result of the `initialize` method. Only the fields the client uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// The MCP version the server settled on
    pub protocol_version: String,
    /// Information about the server implementation
    #[serde(default)]
    pub server_info: Option<Implementation>,
    #[serde(default)]
    pub capabilities: JsonValue,
}

/// Information about an implementation (client or server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Capabilities advertised by this client. Empty on purpose: the client only
/// consumes tools.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {}

// =============================================================================
// MCP Tool Types
// =============================================================================

/// A tool descriptor as cached by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The unique name of the tool on its server
    pub name: String,
    /// A human-readable description of what the tool does
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the tool's input parameters
    #[serde(default = "empty_object_schema")]
    pub input_schema: JsonValue,
}

/// Schema used when a server omits `inputSchema`.
pub fn empty_object_schema() -> JsonValue {
    json!({ "type": "object", "properties": {} })
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: JsonValue,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Lenient parse of one `tools/list` entry. Returns `None` when the entry
    /// has no usable name.
    pub fn from_value(value: &JsonValue) -> Option<Self> {
        let name = value.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }
        let description = value
            .get("description")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let input_schema = value
            .get("inputSchema")
            .filter(|s| s.is_object())
            .cloned()
            .unwrap_or_else(empty_object_schema);

        Some(Self::new(name, description, input_schema))
    }
}

/// Parses the `tools` array of a `tools/list` result, skipping entries without
/// a name.
pub fn parse_tool_list(result: &JsonValue) -> McpResult<Vec<Tool>> {
    let entries = result
        .get("tools")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| McpError::Protocol("tools/list result has no 'tools' array".to_string()))?;

    let mut tools = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match Tool::from_value(entry) {
            Some(tool) => tools.push(tool),
            None => warn!("Skipping tools/list entry {} without a name", index),
        }
    }
    Ok(tools)
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    /// The name of the tool to invoke
    pub name: String,
    /// The arguments to pass to the tool
    pub arguments: JsonValue,
}

impl CallToolRequest {
    pub fn new(name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Builds the request from caller-supplied JSON text. Anything that is not
    /// a JSON object becomes `{}`.
    pub fn from_args_json(name: impl Into<String>, args_json: &str) -> Self {
        let arguments = match serde_json::from_str::<JsonValue>(args_json) {
            Ok(value @ JsonValue::Object(_)) => value,
            _ => json!({}),
        };
        Self::new(name, arguments)
    }
}

/// Text items of a `tools/call` result joined with newlines, in array order.
/// `None` when the result carries no text item.
pub fn tool_result_text(result: &JsonValue) -> Option<String> {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(JsonValue::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(JsonValue::as_str))
                .collect()
        })
        .unwrap_or_default();

    (!texts.is_empty()).then(|| texts.join("\n"))
}

/// Flattens a `tools/call` result for the model.
///
/// Text items of `content` are joined with newlines in array order. With no
/// text item the whole result object is returned as JSON.
pub fn flatten_tool_result(result: &JsonValue) -> String {
    tool_result_text(result).unwrap_or_else(|| result.to_string())
}

/// Whether a `tools/call` result carries `isError: true`.
pub fn is_error_result(result: &JsonValue) -> bool {
    result.get("isError").and_then(JsonValue::as_bool).unwrap_or(false)
}
