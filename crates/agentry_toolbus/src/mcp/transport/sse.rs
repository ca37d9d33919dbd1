//! SSE transport for remote MCP servers.
//!
//! A reader task owns the long-lived `GET` event stream. The server first
//! announces, via an `endpoint` event, where JSON-RPC calls must be POSTed;
//! responses then arrive either in the POST body or later as events on the
//! stream. Stream responses are routed by id to the caller waiting for them
//! through a oneshot channel. Responses nobody is waiting for yet are parked
//! in a bounded queue.
//!
//! The reader reopens the stream after it ends (server close, network error,
//! idle timeout) until the transport is disconnected or the
//! [`ReconnectPolicy`](super::ReconnectPolicy) gives up.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde_json::Value as JsonValue;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::mcp::error::{McpError, McpResult};
use crate::mcp::protocol::{NOTIFICATION_ID, is_jsonrpc_response, parse_response_text, response_id};
use crate::mcp::transport::http::STREAMABLE_ACCEPT;
use crate::mcp::transport::{ErrorSlot, McpTransport, TransportConfig, TransportType};

/// Upper bound on responses parked without a waiter.
pub const MAX_PENDING_RESPONSES: usize = 64;

/// Lifecycle of the event stream as seen by `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamStatus {
    Idle,
    Connecting,
    Ready,
    Failed(String),
    Stopped,
}

/// Why a stream ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Closed,
    Idle,
}

#[derive(Debug)]
struct PendingResponse {
    id: u64,
    raw: JsonValue,
}

/// State touched by both the reader task and callers. Guarded by one mutex
/// that is never held across an await point.
#[derive(Debug, Default)]
struct StreamState {
    endpoint: Option<String>,
    connected: bool,
    reader_alive: bool,
    waiters: HashMap<u64, oneshot::Sender<JsonValue>>,
    unclaimed: VecDeque<PendingResponse>,
}

struct Shared {
    server_name: String,
    state: Mutex<StreamState>,
    status: watch::Sender<StreamStatus>,
    last_error: ErrorSlot,
}

impl Shared {
    fn new(server_name: String) -> Self {
        let (status, _) = watch::channel(StreamStatus::Idle);
        Self {
            server_name,
            state: Mutex::new(StreamState::default()),
            status,
            last_error: ErrorSlot::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the POST endpoint. Returns true the first time the transport
    /// becomes connected.
    fn set_endpoint(&self, endpoint: String) -> bool {
        let mut state = self.lock();
        if !state.reader_alive {
            return false;
        }
        state.endpoint = Some(endpoint);
        if state.connected {
            return false;
        }
        state.connected = true;
        drop(state);
        self.status.send_replace(StreamStatus::Ready);
        true
    }

    fn has_endpoint(&self) -> bool {
        self.lock().endpoint.is_some()
    }

    /// Hands a response to its waiter, or parks it.
    fn deliver(&self, id: u64, raw: JsonValue) {
        let mut state = self.lock();
        if !state.reader_alive {
            return;
        }
        let raw = match state.waiters.remove(&id) {
            Some(waiter) => match waiter.send(raw) {
                Ok(()) => return,
                // The caller gave up between lookup and send.
                Err(raw) => raw,
            },
            None => raw,
        };

        if state.unclaimed.len() >= MAX_PENDING_RESPONSES {
            warn!(
                "[MCP:{}] Pending response queue full ({}), dropping response id {}",
                self.server_name, MAX_PENDING_RESPONSES, id
            );
            return;
        }
        state.unclaimed.push_back(PendingResponse { id, raw });
    }

    fn register_waiter(&self, id: u64) -> oneshot::Receiver<JsonValue> {
        let (tx, rx) = oneshot::channel();
        self.lock().waiters.insert(id, tx);
        rx
    }

    fn remove_waiter(&self, id: u64) {
        self.lock().waiters.remove(&id);
    }

    fn take_unclaimed(&self, id: u64) -> Option<JsonValue> {
        let mut state = self.lock();
        let index = state.unclaimed.iter().position(|p| p.id == id)?;
        state.unclaimed.remove(index).map(|p| p.raw)
    }

    /// Called by the reader on exit. Dropping the waiters wakes every caller
    /// still blocked on a response.
    fn reader_stopped(&self) {
        let mut state = self.lock();
        state.reader_alive = false;
        state.waiters.clear();
        drop(state);
        self.status.send_replace(StreamStatus::Stopped);
    }

    fn reset(&self) {
        let mut state = self.lock();
        state.endpoint = None;
        state.connected = false;
        state.reader_alive = false;
        state.waiters.clear();
        state.unclaimed.clear();
        drop(state);
        self.status.send_replace(StreamStatus::Idle);
    }
}

/// Removes the waiter for `id` however the request future ends, including
/// when the caller drops it.
struct WaiterGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.shared.remove_waiter(self.id);
    }
}

struct ReaderHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Everything the reader task needs, owned.
struct ReaderContext {
    config: TransportConfig,
    base_url: String,
    stream_client: HttpClient,
    shared: Arc<Shared>,
}

pub struct SseTransport {
    config: TransportConfig,
    base_url: String,
    stream_client: HttpClient,
    /// Separate handle used only for POSTs
    post_client: HttpClient,
    shared: Arc<Shared>,
    reader: Mutex<Option<ReaderHandle>>,
}

impl SseTransport {
    pub fn new(config: TransportConfig) -> McpResult<Self> {
        let base_url = base_url_of(&config.url)?;
        let stream_client = config.acquire_http_client()?;
        let post_client = config.acquire_http_client()?;
        let shared = Arc::new(Shared::new(config.server_name.clone()));

        Ok(Self {
            config,
            base_url,
            stream_client,
            post_client,
            shared,
            reader: Mutex::new(None),
        })
    }

    /// Scheme, host and port of the server URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST endpoint announced by the server, once known.
    pub fn endpoint(&self) -> Option<String> {
        self.shared.lock().endpoint.clone()
    }

    /// Number of responses parked without a waiter.
    pub fn pending_responses(&self) -> usize {
        self.shared.lock().unclaimed.len()
    }

    fn reader_slot(&self) -> MutexGuard<'_, Option<ReaderHandle>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the reader unless one is already running.
    fn start_reader(&self) {
        let mut slot = self.reader_slot();
        if slot.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return;
        }

        {
            let mut state = self.shared.lock();
            state.connected = false;
            state.endpoint = None;
            state.reader_alive = true;
        }
        self.shared.status.send_replace(StreamStatus::Connecting);

        let cancel = CancellationToken::new();
        let context = ReaderContext {
            config: self.config.clone(),
            base_url: self.base_url.clone(),
            stream_client: self.stream_client.clone(),
            shared: Arc::clone(&self.shared),
        };
        let task = tokio::spawn(reader_loop(context, cancel.clone()));
        *slot = Some(ReaderHandle { task, cancel });
    }

    async fn wait_until_ready(&self) -> McpResult<()> {
        let mut status = self.shared.status.subscribe();
        let outcome = tokio::time::timeout(self.config.timeout, async {
            status
                .wait_for(|s| *s != StreamStatus::Connecting)
                .await
                .map(|s| (*s).clone())
                .unwrap_or(StreamStatus::Stopped)
        })
        .await;

        match outcome {
            Ok(StreamStatus::Ready) => Ok(()),
            Ok(StreamStatus::Failed(message)) => Err(McpError::Connection(message)),
            Ok(_) => Err(McpError::Connection(
                "SSE reader stopped before the endpoint event".to_string(),
            )),
            Err(_) => Err(McpError::Timeout(format!(
                "no endpoint event from {} within {:?}",
                self.config.url, self.config.timeout
            ))),
        }
    }

    async fn post(&self, endpoint: &str, envelope: &JsonValue, deadline: Instant) -> McpResult<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let builder = self
            .post_client
            .post(endpoint)
            .timeout(remaining)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, STREAMABLE_ACCEPT)
            .json(envelope);

        let response = self
            .config
            .authorize(builder)
            .send()
            .await
            .map_err(|e| McpError::from_http("SSE POST failed", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| McpError::from_http("failed to read POST response", e))?;

        if !status.is_success() {
            return Err(McpError::Protocol(format!("HTTP error {}: {}", status, body.trim())));
        }
        Ok(body)
    }

    async fn exchange(&self, envelope: JsonValue, id: u64) -> McpResult<Option<JsonValue>> {
        let endpoint = {
            let state = self.shared.lock();
            match &state.endpoint {
                Some(endpoint) if state.connected && state.reader_alive => endpoint.clone(),
                _ if state.connected => {
                    return Err(McpError::Connection(format!(
                        "SSE reader for '{}' has stopped",
                        self.config.server_name
                    )));
                }
                _ => {
                    return Err(McpError::NotConnected(format!(
                        "no SSE endpoint received from '{}' yet",
                        self.config.server_name
                    )));
                }
            }
        };

        let deadline = Instant::now() + self.config.timeout;
        let waiter = (id != NOTIFICATION_ID).then(|| self.shared.register_waiter(id));
        let _guard = waiter.as_ref().map(|_| WaiterGuard {
            shared: &self.shared,
            id,
        });

        debug!("[MCP:{}] POST {} (id {})", self.config.server_name, endpoint, id);
        let body = self.post(&endpoint, &envelope, deadline).await?;

        let Some(waiter) = waiter else {
            return Ok(None);
        };

        // Some servers answer directly in the POST body.
        if !body.trim().is_empty() {
            if let Ok(value) = parse_response_text(&body) {
                if is_jsonrpc_response(&value) {
                    return Ok(Some(value));
                }
            }
        }

        if let Some(raw) = self.shared.take_unclaimed(id) {
            return Ok(Some(raw));
        }

        match tokio::time::timeout_at(deadline, waiter).await {
            Ok(Ok(raw)) => Ok(Some(raw)),
            Ok(Err(_)) => Err(McpError::Connection(format!(
                "SSE stream stopped while waiting for response {}",
                id
            ))),
            Err(_) => Err(McpError::Timeout(format!(
                "no response for request {} within {:?}",
                id, self.config.timeout
            ))),
        }
    }

    fn take_reader(&self) -> Option<ReaderHandle> {
        self.reader_slot().take()
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn connect(&self) -> McpResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        info!("[MCP:{}] Opening SSE stream: {}", self.config.server_name, self.config.url);
        self.start_reader();

        match self.wait_until_ready().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.last_error.set(e.to_string());
                self.disconnect().await?;
                Err(e)
            }
        }
    }

    async fn request(&self, envelope: JsonValue, id: u64) -> McpResult<Option<JsonValue>> {
        self.exchange(envelope, id)
            .await
            .map_err(|e| self.shared.last_error.record(e))
    }

    async fn disconnect(&self) -> McpResult<()> {
        if let Some(handle) = self.take_reader() {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                if !e.is_cancelled() {
                    warn!("[MCP:{}] SSE reader ended abnormally: {}", self.config.server_name, e);
                }
            }
            info!("[MCP:{}] SSE stream closed", self.config.server_name);
        }
        self.shared.reset();
        Ok(())
    }

    fn destroy(&self) {
        if let Some(handle) = self.take_reader() {
            handle.cancel.cancel();
            handle.task.abort();
        }
        self.shared.reset();
        self.shared.last_error.clear();
    }

    fn is_connected(&self) -> bool {
        let state = self.shared.lock();
        state.connected && state.reader_alive
    }

    fn kind(&self) -> TransportType {
        TransportType::Sse
    }

    fn last_error(&self) -> Option<String> {
        self.shared.last_error.get()
    }

    fn url(&self) -> &str {
        &self.config.url
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.take_reader() {
            handle.cancel.cancel();
            handle.task.abort();
        }
    }
}

async fn reader_loop(ctx: ReaderContext, cancel: CancellationToken) {
    let server = ctx.config.server_name.clone();
    let mut attempt: u32 = 0;

    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = pump_stream(&ctx, &mut attempt) => outcome,
        };

        match outcome {
            Ok(StreamEnd::Closed) => info!("[MCP:{}] SSE stream closed by server", server),
            Ok(StreamEnd::Idle) => info!(
                "[MCP:{}] SSE stream idle for {:?}",
                server, ctx.config.idle_timeout
            ),
            Err(e) => {
                warn!("[MCP:{}] SSE stream error: {}", server, e);
                ctx.shared.last_error.set(e.to_string());
                if !ctx.shared.has_endpoint() {
                    ctx.shared.status.send_replace(StreamStatus::Failed(describe(&e)));
                }
            }
        }

        attempt += 1;
        let Some(delay) = ctx.config.reconnect.delay_for(attempt) else {
            error!(
                "[MCP:{}] Giving up on SSE stream after {} attempts without an event",
                server,
                attempt - 1
            );
            break;
        };

        debug!("[MCP:{}] Reconnecting in {:?} (attempt {})", server, delay, attempt);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    ctx.shared.reader_stopped();
    debug!("[MCP:{}] SSE reader exited", server);
}

/// Opens the stream once and routes its events until it ends.
///
/// The attempt counter is reset by the first event, not by the HTTP status:
/// a server that accepts the stream and hangs up at once still uses up the
/// reconnect budget.
async fn pump_stream(ctx: &ReaderContext, attempt: &mut u32) -> McpResult<StreamEnd> {
    let request = ctx.config.authorize(ctx.stream_client.get(&ctx.config.url));
    let mut source = EventSource::new(request)
        .map_err(|e| McpError::Connection(format!("cannot open SSE stream: {}", e)))?;
    // Reopening is driven by `reader_loop` and its ReconnectPolicy.
    source.set_retry_policy(Box::new(Never));

    let outcome = loop {
        match tokio::time::timeout(ctx.config.idle_timeout, source.next()).await {
            Err(_) => break Ok(StreamEnd::Idle),
            Ok(None) | Ok(Some(Err(EventSourceError::StreamEnded))) => break Ok(StreamEnd::Closed),
            Ok(Some(Err(e))) => break Err(stream_error(e)),
            Ok(Some(Ok(Event::Open))) => {
                debug!("[MCP:{}] SSE stream open", ctx.config.server_name);
            }
            Ok(Some(Ok(Event::Message(message)))) => {
                *attempt = 0;
                handle_event(ctx, &message.event, &message.data);
            }
        }
    };

    source.close();
    outcome
}

fn stream_error(err: EventSourceError) -> McpError {
    match err {
        EventSourceError::Transport(e) => McpError::from_http("SSE stream failed", e),
        EventSourceError::InvalidStatusCode(status, _) => {
            McpError::Connection(format!("SSE stream returned HTTP {}", status))
        }
        EventSourceError::InvalidContentType(content_type, _) => McpError::Connection(format!(
            "SSE stream has content type {:?}",
            content_type
        )),
        other => McpError::Protocol(format!("unreadable SSE stream: {}", other)),
    }
}

fn handle_event(ctx: &ReaderContext, event: &str, data: &str) {
    let server = &ctx.config.server_name;

    if event == "endpoint" {
        let Some(endpoint) = endpoint_from_data(&ctx.base_url, data) else {
            warn!("[MCP:{}] Ignoring empty endpoint event", server);
            return;
        };
        if ctx.shared.set_endpoint(endpoint.clone()) {
            info!("[MCP:{}] SSE endpoint: {}", server, endpoint);
        } else {
            debug!("[MCP:{}] SSE endpoint refreshed: {}", server, endpoint);
        }
        return;
    }

    let Ok(value) = serde_json::from_str::<JsonValue>(data) else {
        debug!("[MCP:{}] Ignoring non-JSON '{}' event", server, event);
        return;
    };
    if !is_jsonrpc_response(&value) {
        debug!(
            "[MCP:{}] Ignoring server message: {}",
            server,
            value.get("method").and_then(JsonValue::as_str).unwrap_or("?")
        );
        return;
    }

    match response_id(&value) {
        Some(id) if id != NOTIFICATION_ID => ctx.shared.deliver(id, value),
        _ => debug!("[MCP:{}] Ignoring response without a request id", server),
    }
}

/// Error text without the variant prefix, for re-wrapping.
fn describe(err: &McpError) -> String {
    match err {
        McpError::Connection(message) | McpError::Timeout(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Scheme, host and port of `url`.
fn base_url_of(url: &str) -> McpResult<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| McpError::Config(format!("invalid server URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.origin().ascii_serialization()),
        other => Err(McpError::Config(format!(
            "unsupported URL scheme '{}' in '{}'",
            other, url
        ))),
    }
}

/// Reads the endpoint from an `endpoint` event. Plain paths and
/// `{"uri": ...}` objects are both accepted.
fn endpoint_from_data(base_url: &str, data: &str) -> Option<String> {
    let data = data.trim();
    let raw = if data.starts_with('{') {
        let value: JsonValue = serde_json::from_str(data).ok()?;
        value
            .get("uri")
            .or_else(|| value.get("url"))
            .and_then(JsonValue::as_str)?
            .trim()
            .to_string()
    } else {
        data.to_string()
    };

    (!raw.is_empty()).then(|| resolve_endpoint(base_url, &raw))
}

/// Resolves an announced endpoint against the base URL.
fn resolve_endpoint(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if endpoint.starts_with('/') {
        format!("{}{}", base_url, endpoint)
    } else {
        format!("{}/{}", base_url, endpoint)
    }
}
