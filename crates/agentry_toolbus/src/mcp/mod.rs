//! Model Context Protocol (MCP) client support for agentry_toolbus.
//!
//! Discovers and invokes tools hosted by remote MCP servers and exposes them
//! through the [`ToolBus`](crate::ToolBus).
//!
//! # Transports
//!
//! - **http**: Streamable HTTP, one POST per JSON-RPC call
//! - **sse**: long-lived Server-Sent Events stream plus POSTs to the endpoint
//!   the stream announces
//!
//! # Architecture
//!
//! - **protocol**: JSON-RPC codec and MCP message types
//! - **transport**: `McpTransport` trait, SSE parser, both transports
//! - **config**: `.mcp.json` / TOML server list
//! - **client**: one client per server (handshake, tool cache, calls)
//! - **manager**: concurrent fan-out over all configured servers
//! - **toolbus_integration**: adapter registering MCP tools with ToolBus
//! - **error**: Error types for MCP operations

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod toolbus_integration;
pub mod transport;

pub use client::McpClient;
pub use config::{ConfigError, McpServerConfig, McpServersConfig};
pub use error::{McpError, McpResult};
pub use manager::{McpManager, ServerTestResult};
pub use protocol::{
    CallToolRequest, ClientCapabilities, Implementation, InitializeParams, InitializeResult,
    JsonRpcErrorObject, Tool,
};
pub use toolbus_integration::{McpToolInfo, McpToolWrapper, register_mcp_tools};
pub use transport::{
    McpTransport, ReconnectPolicy, SseTransport, StreamableHttpTransport, TransportConfig,
    TransportType, create_transport,
};
