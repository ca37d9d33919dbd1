//! Streamable HTTP transport: every JSON-RPC call is one self-contained POST.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::mcp::error::{McpError, McpResult};
use crate::mcp::protocol::{NOTIFICATION_ID, parse_response_text};
use crate::mcp::transport::{ErrorSlot, McpTransport, TransportConfig, TransportType};

pub(crate) const STREAMABLE_ACCEPT: &str = "application/json, text/event-stream";
const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct StreamableHttpTransport {
    config: TransportConfig,
    http_client: HttpClient,
    connected: AtomicBool,
    /// Session id the server assigned on a previous response
    session_id: Mutex<Option<String>>,
    last_error: ErrorSlot,
}

impl StreamableHttpTransport {
    pub fn new(config: TransportConfig) -> McpResult<Self> {
        let http_client = config.acquire_http_client()?;
        Ok(Self {
            config,
            http_client,
            connected: AtomicBool::new(false),
            session_id: Mutex::new(None),
            last_error: ErrorSlot::default(),
        })
    }

    /// Session id currently echoed to the server, if one was assigned.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    fn build_request(&self, envelope: &JsonValue) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, STREAMABLE_ACCEPT)
            .json(envelope);
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }
        self.config.authorize(builder)
    }

    async fn post(&self, envelope: JsonValue, id: u64) -> McpResult<Option<JsonValue>> {
        let server = &self.config.server_name;
        debug!("[MCP:{}] HTTP POST {} (id {})", server, self.config.url, id);

        let response = self
            .build_request(&envelope)
            .send()
            .await
            .map_err(|e| McpError::from_http("HTTP request failed", e))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.lock() {
                if slot.as_deref() != Some(session) {
                    debug!("[MCP:{}] Session id assigned: {}", server, session);
                    *slot = Some(session.to_string());
                }
            }
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| McpError::from_http("failed to read response body", e))?;

        if !status.is_success() {
            return Err(McpError::Protocol(format!("HTTP error {}: {}", status, body.trim())));
        }

        if id == NOTIFICATION_ID {
            // Servers commonly answer notifications with 202 and no body.
            return Ok(None);
        }

        if body.trim().is_empty() {
            return Err(McpError::Protocol(format!("empty response body (HTTP {})", status)));
        }

        debug!("[MCP:{}] Response: {}", server, body);
        parse_response_text(&body).map(Some)
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn connect(&self) -> McpResult<()> {
        // Stateless: nothing to open.
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request(&self, envelope: JsonValue, id: u64) -> McpResult<Option<JsonValue>> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(format!(
                "HTTP transport for '{}' is not connected",
                self.config.server_name
            )));
        }
        self.post(envelope, id).await.map_err(|e| self.last_error.record(e))
    }

    async fn disconnect(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.session_id.lock() {
            *slot = None;
        }
        self.last_error.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportType {
        TransportType::Http
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }

    fn url(&self) -> &str {
        &self.config.url
    }
}
