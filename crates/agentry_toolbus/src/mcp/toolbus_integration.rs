//! ToolBus Integration for MCP Tools
//!
//! [`McpToolWrapper`] exposes one cached MCP tool as a ToolBus [`Tool`](crate::Tool)
//! under the namespaced name `mcp.{server}.{tool}`, routing calls to the
//! client that discovered it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tracing::info;

use crate::mcp::client::McpClient;
use crate::mcp::protocol::{Tool, tool_result_text};
use crate::{ToolBus, ToolResult};

/// Prefix shared by every tool of `server`.
pub fn server_prefix(server: &str) -> String {
    format!("mcp.{}.", server)
}

pub fn namespaced_name(server: &str, tool: &str) -> String {
    format!("mcp.{}.{}", server, tool)
}

/// Wrapper that exposes an MCP tool as a ToolBus tool.
pub struct McpToolWrapper {
    tool: Tool,
    client: Arc<McpClient>,
    namespaced_name: String,
}

impl McpToolWrapper {
    pub fn new(tool: Tool, client: Arc<McpClient>) -> Self {
        let namespaced_name = namespaced_name(client.name(), &tool.name);
        Self {
            tool,
            client,
            namespaced_name,
        }
    }

    /// Format: `mcp.{server}.{tool}`
    pub fn namespaced_name(&self) -> &str {
        &self.namespaced_name
    }

    pub fn server_name(&self) -> &str {
        self.client.name()
    }

    /// Name of the tool on its server.
    pub fn tool_name(&self) -> &str {
        &self.tool.name
    }
}

#[async_trait]
impl crate::Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn parameters_schema(&self) -> JsonValue {
        self.tool.input_schema.clone()
    }

    async fn execute(&self, args: JsonValue) -> ToolResult {
        let arguments = if args.is_object() { args } else { json!({}) };
        match self.client.call_tool_value(&self.tool.name, arguments).await {
            Ok(result) => Ok(match tool_result_text(&result) {
                Some(text) => JsonValue::String(text),
                // Nothing to flatten: hand the result object through as is.
                None => result,
            }),
            Err(e) => Ok(json!({ "error": e.to_string() })),
        }
    }
}

/// Registers every cached tool of `client` with the ToolBus.
///
/// Tools previously registered for the same server are dropped first, so the
/// bus mirrors the client's latest discovery. Returns the number registered.
pub fn register_mcp_tools(toolbus: &mut ToolBus, client: &Arc<McpClient>) -> usize {
    let removed = toolbus.unregister_prefix(&server_prefix(client.name()));
    if removed > 0 {
        info!("[MCP:{}] Dropped {} stale tools", client.name(), removed);
    }

    let tools = client.tools();
    let count = tools.len();
    for tool in tools {
        let wrapper = McpToolWrapper::new(tool, Arc::clone(client));
        info!("Registering MCP tool: {}", wrapper.namespaced_name());
        toolbus.register(wrapper);
    }
    count
}

/// Tool information for display purposes.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    /// The namespaced tool name (e.g., `mcp.filesystem.read_file`)
    pub name: String,
    pub server_name: String,
    /// The original tool name on the server
    pub original_name: String,
    pub description: String,
    pub input_schema: JsonValue,
}

impl McpToolInfo {
    pub fn from_tool(server_name: &str, tool: &Tool) -> Self {
        Self {
            name: namespaced_name(server_name, &tool.name),
            server_name: server_name.to_string(),
            original_name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }

    /// One entry per tool cached by `client`.
    pub fn for_client(client: &McpClient) -> Vec<Self> {
        client
            .tools()
            .iter()
            .map(|tool| Self::from_tool(client.name(), tool))
            .collect()
    }
}
