//! MCP Transport Abstraction
//!
//! Two remote transports implement [`McpTransport`]:
//! - **Streamable HTTP** ([`StreamableHttpTransport`]): one POST per JSON-RPC call
//! - **SSE** ([`SseTransport`]): a long-lived GET event stream carrying
//!   responses, plus POSTs to the endpoint the stream announces
//!
//! Transports move raw JSON envelopes; encoding and result extraction live in
//! [`crate::mcp::protocol`].

pub mod http;
pub mod sse;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value as JsonValue;

use crate::mcp::error::{McpError, McpResult};

pub use http::StreamableHttpTransport;
pub use sse::SseTransport;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time without any event on the SSE stream before it is reopened.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest error message a transport keeps.
const MAX_ERROR_LEN: usize = 512;

/// Uniform capability set of a remote MCP transport.
///
/// All methods take `&self`: one transport is shared by every caller of its
/// client and may be disconnected while requests are in flight.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Establishes readiness. Calling it on a connected transport is a no-op.
    async fn connect(&self) -> McpResult<()>;

    /// Sends one JSON-RPC envelope and returns the raw response, or `None`
    /// for a notification (`id == 0`).
    async fn request(&self, envelope: JsonValue, id: u64) -> McpResult<Option<JsonValue>>;

    /// Stops accepting requests and shuts background work down.
    async fn disconnect(&self) -> McpResult<()>;

    /// Releases transport-owned buffers and tasks. The transport is unusable
    /// until the next `connect`.
    fn destroy(&self);

    fn is_connected(&self) -> bool;

    fn kind(&self) -> TransportType;

    /// Most recent error recorded by the transport.
    fn last_error(&self) -> Option<String>;

    fn url(&self) -> &str;
}

/// Transport type configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Streamable HTTP, one POST per call
    Http,
    /// Server-Sent Events stream plus POST endpoint
    Sse,
}

impl TransportType {
    /// Guesses the transport from a server URL: paths ending in `/sse` use
    /// the SSE transport, everything else Streamable HTTP.
    pub fn infer(url: &str) -> Self {
        let path = url::Url::parse(url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        if path.ends_with("/sse") {
            Self::Sse
        } else {
            Self::Http
        }
    }
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Http => write!(f, "http"),
            TransportType::Sse => write!(f, "sse"),
        }
    }
}

/// How the SSE reader reopens a dropped stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait between attempts
    pub delay: Duration,
    /// Consecutive failed attempts before the reader gives up; `None` retries
    /// forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based), or `None` once the
    /// budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}

/// Settings shared by both transports.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server name used in logs
    pub server_name: String,
    pub url: String,
    /// Bearer credential
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub verify_tls: bool,
    pub reconnect: ReconnectPolicy,
    pub idle_timeout: Duration,
    /// Shared pooled client; a private one is built when absent
    pub http_client: Option<HttpClient>,
}

impl TransportConfig {
    pub fn new(server_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            url: url.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            verify_tls: true,
            reconnect: ReconnectPolicy::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            http_client: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_http_client(mut self, client: HttpClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Returns the pooled client if one was supplied, otherwise builds a
    /// private handle honouring `verify_tls`.
    pub(crate) fn acquire_http_client(&self) -> McpResult<HttpClient> {
        if let Some(client) = &self.http_client {
            return Ok(client.clone());
        }
        HttpClient::builder()
            .connect_timeout(self.timeout)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
            .map_err(|e| McpError::Config(format!("failed to build HTTP client: {}", e)))
    }

    /// Adds the bearer credential to a request, if configured.
    pub(crate) fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }
}

/// Bounded slot holding a transport's most recent error message.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot(Mutex<Option<String>>);

impl ErrorSlot {
    pub(crate) fn set(&self, message: impl Into<String>) {
        let mut message = message.into();
        if message.len() > MAX_ERROR_LEN {
            let mut cut = MAX_ERROR_LEN;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(message);
        }
    }

    pub(crate) fn get(&self) -> Option<String> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = None;
        }
    }

    /// Records the error and hands it back, for use in `map_err` chains.
    pub(crate) fn record(&self, err: McpError) -> McpError {
        self.set(err.to_string());
        err
    }
}

/// Builds the transport selected by `kind`.
pub fn create_transport(
    kind: TransportType,
    config: TransportConfig,
) -> McpResult<Box<dyn McpTransport>> {
    Ok(match kind {
        TransportType::Http => Box::new(StreamableHttpTransport::new(config)?),
        TransportType::Sse => Box::new(SseTransport::new(config)?),
    })
}
