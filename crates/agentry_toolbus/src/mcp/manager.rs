//! MCP Manager - multi-server fan-out and lifecycle
//!
//! [`McpManager`] connects to every enabled server of a configuration set,
//! merges their tools into a [`ToolBus`] and hands each client to the
//! [`Session`] for teardown. One unreachable server never blocks the others.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use agentry_core::{Session, SessionResource};
use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::ToolBus;
use crate::mcp::client::McpClient;
use crate::mcp::config::{McpServerConfig, McpServersConfig};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::toolbus_integration::{McpToolInfo, register_mcp_tools};
use crate::mcp::transport::{ReconnectPolicy, TransportType, create_transport};

/// Result of testing an MCP server connection.
#[derive(Debug, Clone)]
pub struct ServerTestResult {
    pub success: bool,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub protocol_version: Option<String>,
    pub transport: TransportType,
    /// Names of the discovered tools
    pub tools: Vec<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ServerTestResult {
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

/// MCP Manager for managing multiple remote MCP servers.
///
/// # Example
///
/// ```ignore
/// use agentry_core::Session;
/// use agentry_toolbus::{ToolBus, mcp::McpManager};
/// use std::path::Path;
///
/// let manager = McpManager::load(Path::new(".mcp.json"))?;
/// let mut toolbus = ToolBus::new();
/// let mut session = Session::new();
///
/// let connected = manager.connect_configured(&mut toolbus, &mut session).await;
/// println!("{} MCP servers, {} tools", connected, toolbus.len());
///
/// session.close().await;
/// ```
#[derive(Default)]
pub struct McpManager {
    servers: McpServersConfig,
    /// Pooled client shared by every transport, when supplied
    http_client: Option<reqwest::Client>,
    reconnect: ReconnectPolicy,
    running: RwLock<HashMap<String, Arc<McpClient>>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_servers(servers: McpServersConfig) -> Self {
        Self {
            servers,
            ..Self::default()
        }
    }

    /// Loads the server list from `path`. A missing file yields an empty
    /// manager.
    pub fn load(path: &Path) -> McpResult<Self> {
        if !path.exists() {
            info!("No MCP configuration at {}, starting with none", path.display());
            return Ok(Self::new());
        }

        let servers =
            McpServersConfig::load(path).map_err(|e| McpError::Config(e.to_string()))?;
        info!(
            "Loaded {} MCP server configurations from {}",
            servers.len(),
            path.display()
        );
        Ok(Self::with_servers(servers))
    }

    /// Shares one pooled HTTP client between all transports.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn servers(&self) -> &McpServersConfig {
        &self.servers
    }

    fn build_client(&self, config: &McpServerConfig) -> McpResult<McpClient> {
        let mut transport_config = config
            .to_transport_config()
            .map_err(|e| McpError::Config(e.to_string()))?
            .with_reconnect(self.reconnect);
        if let Some(pool) = &self.http_client {
            transport_config = transport_config.with_http_client(pool.clone());
        }
        let transport = create_transport(config.transport_type(), transport_config)?;
        Ok(McpClient::with_transport(&config.name, transport))
    }

    /// Drops running entries whose client is no longer connected, e.g. torn
    /// down by the session that owned it, so the server can be reconnected.
    async fn prune_disconnected(&self) {
        let stale: Vec<Arc<McpClient>> = {
            let mut running = self.running.write().await;
            let names: Vec<String> = running
                .iter()
                .filter(|(_, client)| !client.is_connected())
                .map(|(name, _)| name.clone())
                .collect();
            names.iter().filter_map(|name| running.remove(name)).collect()
        };

        for client in stale {
            info!("[MCP:{}] No longer connected, dropping from running set", client.name());
            if let Err(e) = client.shutdown().await {
                debug!("[MCP:{}] {}", client.name(), e);
            }
        }
    }

    /// Builds, connects and discovers one client.
    async fn open_client(&self, config: &McpServerConfig) -> McpResult<Arc<McpClient>> {
        let client = self.build_client(config)?;
        client.connect().await?;
        if let Err(e) = client.discover_tools().await {
            if let Err(d) = client.shutdown().await {
                debug!("[MCP:{}] Shutdown after failed discovery: {}", config.name, d);
            }
            return Err(e);
        }
        Ok(Arc::new(client))
    }

    /// Connects every enabled server in `servers` concurrently, registers
    /// their tools with `toolbus` and their clients with `session`.
    ///
    /// Results are merged in configuration order. Failed servers are logged
    /// and skipped. Returns the number of servers connected.
    pub async fn connect_all(
        &self,
        servers: &[McpServerConfig],
        toolbus: &mut ToolBus,
        session: &mut Session,
    ) -> usize {
        if session.is_closed() {
            warn!("Session {} is closed, not connecting MCP servers", session.id);
            return 0;
        }
        self.prune_disconnected().await;

        let mut seen = Vec::new();
        let mut pending = Vec::new();
        for config in servers.iter().filter(|s| s.enabled) {
            if seen.contains(&config.name.as_str()) {
                warn!("[MCP:{}] Duplicate server entry ignored", config.name);
                continue;
            }
            seen.push(config.name.as_str());
            if self.is_running(&config.name).await {
                warn!("[MCP:{}] Already running, skipping", config.name);
                continue;
            }
            pending.push(config);
        }

        let start = Instant::now();
        let outcomes = join_all(pending.iter().map(|config| self.open_client(config))).await;

        let mut connected = 0;
        for (config, outcome) in pending.iter().zip(outcomes) {
            let client = match outcome {
                Ok(client) => client,
                Err(e) => {
                    error!("[MCP:{}] Failed to connect to {}: {}", config.name, config.url, e);
                    continue;
                }
            };

            let resource: Arc<dyn SessionResource> = client.clone();
            if let Err(e) = session.register(resource) {
                error!("[MCP:{}] Session refused client: {}", config.name, e);
                if let Err(e) = client.teardown().await {
                    debug!("{}", e);
                }
                continue;
            }

            let tools = register_mcp_tools(toolbus, &client);
            info!("[MCP:{}] Registered {} tools", config.name, tools);
            self.running
                .write()
                .await
                .insert(config.name.clone(), client);
            connected += 1;
        }

        info!(
            "Connected {}/{} MCP servers in {}ms",
            connected,
            pending.len(),
            start.elapsed().as_millis()
        );
        connected
    }

    /// [`connect_all`](Self::connect_all) over the loaded configuration.
    pub async fn connect_configured(&self, toolbus: &mut ToolBus, session: &mut Session) -> usize {
        self.connect_all(&self.servers.servers, toolbus, session).await
    }

    /// Connects a single server outside of any session.
    pub async fn start_server(&self, config: &McpServerConfig) -> McpResult<Arc<McpClient>> {
        self.prune_disconnected().await;
        if self.is_running(&config.name).await {
            return Err(McpError::ServerAlreadyRunning(config.name.clone()));
        }

        info!("Starting MCP server: {} ({})", config.name, config.url);
        let client = self.open_client(config).await?;

        let mut running = self.running.write().await;
        if running.get(&config.name).is_some_and(|c| c.is_connected()) {
            drop(running);
            if let Err(e) = client.shutdown().await {
                debug!("[MCP:{}] {}", config.name, e);
            }
            return Err(McpError::ServerAlreadyRunning(config.name.clone()));
        }
        running.insert(config.name.clone(), Arc::clone(&client));
        Ok(client)
    }

    pub async fn stop_server(&self, name: &str) -> McpResult<()> {
        let client = self
            .running
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::ServerNotRunning(name.to_string()))?;

        info!("Stopping MCP server: {}", name);
        client.shutdown().await
    }

    pub async fn stop_all(&self) {
        let clients: Vec<Arc<McpClient>> = self.running.write().await.drain().map(|(_, c)| c).collect();
        for client in clients {
            if let Err(e) = client.shutdown().await {
                error!("Failed to stop MCP server '{}': {}", client.name(), e);
            }
        }
    }

    /// Running client for `name`. Clients torn down elsewhere do not count.
    pub async fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.running
            .read()
            .await
            .get(name)
            .filter(|client| client.is_connected())
            .cloned()
    }

    /// Names of running servers, sorted.
    pub async fn list_running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .running
            .read()
            .await
            .iter()
            .filter(|(_, client)| client.is_connected())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.client(name).await.is_some()
    }

    /// Tools of every running server, sorted by namespaced name.
    pub async fn list_all_tools(&self) -> Vec<McpToolInfo> {
        let running = self.running.read().await;
        let mut tools: Vec<McpToolInfo> = running
            .values()
            .filter(|client| client.is_connected())
            .flat_map(|client| McpToolInfo::for_client(client))
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Calls `tool` on a running server and returns the flattened text.
    pub async fn call_tool(&self, server: &str, tool: &str, args_json: &str) -> McpResult<String> {
        let client = self
            .client(server)
            .await
            .ok_or_else(|| McpError::ServerNotRunning(server.to_string()))?;

        if client.find_tool(tool).is_none() {
            return Err(McpError::ToolNotFound(format!("{}.{}", server, tool)));
        }

        debug!("Calling tool '{}' on server '{}'", tool, server);
        Ok(client.call_tool(tool, args_json).await)
    }

    /// Connects, initializes, lists tools and disconnects again.
    pub async fn test_server(&self, config: &McpServerConfig) -> ServerTestResult {
        info!("Testing MCP server: {} ({})", config.name, config.url);
        let start = Instant::now();

        let mut report = ServerTestResult {
            success: false,
            server_name: None,
            server_version: None,
            protocol_version: None,
            transport: config.transport_type(),
            tools: Vec::new(),
            error: None,
            duration_ms: 0,
        };

        match self.open_client(config).await {
            Ok(client) => {
                if let Some(info) = client.server_info() {
                    report.server_name = Some(info.name);
                    report.server_version = Some(info.version);
                }
                report.protocol_version = client.protocol_version();
                report.tools = client.tools().into_iter().map(|t| t.name).collect();
                report.success = true;
                if let Err(e) = client.shutdown().await {
                    debug!("[MCP:{}] Shutdown after test: {}", config.name, e);
                }
            }
            Err(e) => report.error = Some(e.to_string()),
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }
}
