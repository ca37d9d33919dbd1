mod manager;
mod sse_transport;

use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{Value as JsonValue, json};

pub(crate) fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

pub(crate) fn rpc_result(id: u64, result: JsonValue) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

pub(crate) fn rpc_error(id: u64, code: i64, message: &str) -> String {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}).to_string()
}

pub(crate) fn initialize_result() -> JsonValue {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {"tools": {}},
        "serverInfo": {"name": "mock-mcp", "version": "0.3.1"}
    })
}

/// Mocks a POST carrying `method` at `path`, answering with `body`.
pub(crate) async fn mock_method(
    server: &mut ServerGuard,
    path: &str,
    method: &str,
    body: String,
) -> Mock {
    server
        .mock("POST", path)
        .match_body(Matcher::PartialJson(json!({"method": method})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

/// Mocks `initialize` (request id 1) and the `initialized` notification.
pub(crate) async fn mock_handshake(server: &mut ServerGuard, path: &str) -> Mock {
    server
        .mock("POST", path)
        .match_body(Matcher::PartialJson(json!({"method": "notifications/initialized"})))
        .with_status(202)
        .create_async()
        .await;
    mock_method(server, path, "initialize", rpc_result(1, initialize_result())).await
}

pub(crate) fn echo_tool_list() -> JsonValue {
    json!({
        "tools": [{
            "name": "echo",
            "description": "Echo text back",
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string"}}
            }
        }]
    })
}
