//! MCP Client Implementation
//!
//! [`McpClient`] owns one transport to one remote server. It runs the
//! `initialize` handshake, caches the server's tool list and invokes tools.
//! Every method takes `&self`, so a client is shared as `Arc<McpClient>`
//! between the manager, the ToolBus wrappers and the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use agentry_core::SessionResource;
use agentry_observability::{mcp_request_span, mcp_server_span, record_duration, record_error};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{Instrument, debug, error, info, warn};

use crate::mcp::config::McpServerConfig;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::protocol::{
    CallToolRequest, ClientCapabilities, Implementation, InitializeParams, InitializeResult,
    NOTIFICATION_ID, Tool, decode_response, encode_request, flatten_tool_result, is_error_result,
    parse_tool_list,
};
use crate::mcp::transport::{McpTransport, TransportType, create_transport};

/// Name this client reports in `initialize`.
pub const CLIENT_NAME: &str = "agentry";

#[derive(Debug, Default)]
struct ClientState {
    connected: bool,
    protocol_version: Option<String>,
    server_info: Option<Implementation>,
    tools: Vec<Tool>,
}

/// MCP client for one remote server.
///
/// # Example
///
/// ```ignore
/// use agentry_toolbus::mcp::{McpClient, McpServerConfig};
///
/// let config = McpServerConfig::new("github", "https://mcp.example.com/mcp");
/// let client = McpClient::new(&config)?;
/// client.connect().await?;
/// client.discover_tools().await?;
///
/// let text = client.call_tool("search_repos", r#"{"query":"tokio"}"#).await;
/// println!("{}", text);
/// client.shutdown().await?;
/// ```
pub struct McpClient {
    name: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
    state: RwLock<ClientState>,
    /// Serializes handshakes so concurrent `connect` calls initialize once
    connect_lock: AsyncMutex<()>,
}

impl McpClient {
    /// Builds a client and its transport from a server entry. Nothing is
    /// sent until [`connect`](Self::connect).
    pub fn new(config: &McpServerConfig) -> McpResult<Self> {
        let transport_config = config
            .to_transport_config()
            .map_err(|e| McpError::Config(e.to_string()))?;
        let transport = create_transport(config.transport_type(), transport_config)?;
        Ok(Self::with_transport(&config.name, transport))
    }

    /// Wraps an already built transport.
    pub fn with_transport(name: impl Into<String>, transport: Box<dyn McpTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            next_id: AtomicU64::new(1),
            state: RwLock::new(ClientState::default()),
            connect_lock: AsyncMutex::new(()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ClientState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ClientState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id == NOTIFICATION_ID {
            self.next_id.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }

    fn ensure_connected(&self) -> McpResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(McpError::NotConnected(self.name.clone()))
        }
    }

    /// Sends a request and returns its decoded `result`.
    async fn rpc(&self, method: &str, params: Option<JsonValue>) -> McpResult<JsonValue> {
        let id = self.next_id();
        let envelope = encode_request(id, method, params);
        let span = mcp_request_span!(self.name.as_str(), method, id);

        async {
            let start = Instant::now();
            let outcome = match self.transport.request(envelope, id).await {
                Ok(Some(raw)) => decode_response(raw),
                Ok(None) => Err(McpError::Protocol(format!(
                    "no response for request {} ({})",
                    id, method
                ))),
                Err(e) => Err(e),
            };
            record_duration("duration_ms", start.elapsed());
            if let Err(e) = &outcome {
                record_error(e);
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn notify(&self, method: &str, params: Option<JsonValue>) -> McpResult<()> {
        let envelope = encode_request(NOTIFICATION_ID, method, params);
        self.transport.request(envelope, NOTIFICATION_ID).await.map(|_| ())
    }

    async fn handshake(&self) -> McpResult<InitializeResult> {
        self.transport.connect().await?;

        let params = InitializeParams::new(
            ClientCapabilities::default(),
            Implementation::new(CLIENT_NAME, env!("CARGO_PKG_VERSION")),
        );
        let result = self
            .rpc("initialize", Some(serde_json::to_value(params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("invalid initialize result: {}", e)))?;

        if let Err(e) = self.notify("notifications/initialized", None).await {
            warn!("[MCP:{}] notifications/initialized failed: {}", self.name, e);
        }
        Ok(init)
    }

    /// Connects the transport and performs the `initialize` handshake.
    ///
    /// No-op when already connected. On failure the transport is
    /// disconnected again and the error is returned.
    pub async fn connect(&self) -> McpResult<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let span = mcp_server_span!(self.name.as_str(), "connect");
        async {
            info!(
                "[MCP:{}] Connecting via {} to {}",
                self.name,
                self.transport.kind(),
                self.transport.url()
            );
            let start = Instant::now();
            let outcome = self.handshake().await;
            record_duration("duration_ms", start.elapsed());

            match outcome {
                Ok(init) => {
                    match &init.server_info {
                        Some(server) => info!(
                            "[MCP:{}] Initialized: {} v{} (protocol {})",
                            self.name, server.name, server.version, init.protocol_version
                        ),
                        None => info!(
                            "[MCP:{}] Initialized (protocol {})",
                            self.name, init.protocol_version
                        ),
                    }
                    let mut state = self.write_state();
                    state.connected = true;
                    state.protocol_version = Some(init.protocol_version);
                    state.server_info = init.server_info;
                    Ok(())
                }
                Err(e) => {
                    record_error(&e);
                    error!("[MCP:{}] Connect failed: {}", self.name, e);
                    if let Err(d) = self.transport.disconnect().await {
                        debug!("[MCP:{}] Disconnect after failed connect: {}", self.name, d);
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Fetches `tools/list` and replaces the cached tool list.
    ///
    /// Returns the number of tools cached.
    pub async fn discover_tools(&self) -> McpResult<usize> {
        self.ensure_connected()?;

        let span = mcp_server_span!(self.name.as_str(), "discover");
        async {
            let result = self.rpc("tools/list", None).await?;
            let tools = parse_tool_list(&result)?;
            let count = tools.len();

            info!("[MCP:{}] Discovered {} tools", self.name, count);
            for tool in &tools {
                debug!("[MCP:{}]   - {}", self.name, tool.name);
            }

            self.write_state().tools = tools;
            Ok(count)
        }
        .instrument(span)
        .await
    }

    /// Snapshot of the cached tools.
    pub fn tools(&self) -> Vec<Tool> {
        self.read_state().tools.clone()
    }

    pub fn find_tool(&self, name: &str) -> Option<Tool> {
        self.read_state().tools.iter().find(|t| t.name == name).cloned()
    }

    pub fn tool_count(&self) -> usize {
        self.read_state().tools.len()
    }

    /// Invokes `tools/call` and returns the raw `result` object.
    pub async fn call_tool_value(&self, name: &str, arguments: JsonValue) -> McpResult<JsonValue> {
        self.ensure_connected()?;

        let request = CallToolRequest::new(name, arguments);
        let result = self
            .rpc("tools/call", Some(serde_json::to_value(request)?))
            .await?;

        if is_error_result(&result) {
            warn!(
                "[MCP:{}] Tool '{}' returned error: {}",
                self.name,
                name,
                flatten_tool_result(&result)
            );
        }
        Ok(result)
    }

    /// Invokes a tool with JSON-text arguments and returns text for the
    /// model.
    ///
    /// Arguments that are not a JSON object are sent as `{}`. Text content is
    /// joined with newlines. Any failure comes back as `{"error":"..."}`.
    pub async fn call_tool(&self, name: &str, args_json: &str) -> String {
        let request = CallToolRequest::from_args_json(name, args_json);
        match self.call_tool_value(name, request.arguments).await {
            Ok(result) => flatten_tool_result(&result),
            Err(e) => {
                warn!("[MCP:{}] Tool '{}' failed: {}", self.name, name, e);
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }

    /// Disconnects the transport. The tool cache is kept so a later
    /// `connect` can reuse it until the next discovery.
    pub async fn shutdown(&self) -> McpResult<()> {
        let was_connected = std::mem::take(&mut self.write_state().connected);
        if was_connected {
            info!("[MCP:{}] Shutting down", self.name);
        }
        self.transport.disconnect().await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport.kind()
    }

    /// True after a successful handshake while the transport is still up.
    pub fn is_connected(&self) -> bool {
        self.read_state().connected && self.transport.is_connected()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.read_state().protocol_version.clone()
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.read_state().server_info.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.transport.last_error()
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("url", &self.transport.url())
            .field("transport", &self.transport.kind())
            .field("connected", &self.is_connected())
            .field("tools", &self.tool_count())
            .finish()
    }
}

#[async_trait]
impl SessionResource for McpClient {
    fn label(&self) -> String {
        format!("mcp:{}", self.name)
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        let outcome = self.shutdown().await;
        self.transport.destroy();
        {
            let mut state = self.write_state();
            state.tools.clear();
            state.server_info = None;
            state.protocol_version = None;
        }
        outcome.map_err(|e| anyhow::anyhow!("MCP server '{}' teardown: {}", self.name, e))
    }
}
