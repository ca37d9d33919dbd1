//! Span helpers for MCP traffic

/// Create a span for one JSON-RPC exchange with an MCP server
///
/// `duration_ms` and `error` start empty and are filled by
/// [`record_duration`] and [`record_error`].
///
/// # Example
///
/// ```rust
/// use agentry_observability::mcp_request_span;
/// use tracing::Instrument;
///
/// # async fn send() {}
/// # async fn run() {
/// let span = mcp_request_span!("github", "tools/list", 3u64);
/// send().instrument(span).await;
/// # }
/// ```
#[macro_export]
macro_rules! mcp_request_span {
    ($server:expr, $method:expr, $id:expr) => {
        tracing::info_span!(
            "mcp.request",
            mcp.server = $server,
            rpc.method = $method,
            rpc.id = $id,
            duration_ms = tracing::field::Empty,
            error = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    };
}

/// Create a span covering a server lifecycle operation (connect, discover,
/// shutdown)
///
/// # Example
///
/// ```rust
/// use agentry_observability::mcp_server_span;
///
/// let span = mcp_server_span!("github", "connect");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! mcp_server_span {
    ($server:expr, $operation:expr) => {
        tracing::info_span!(
            "mcp.server",
            mcp.server = $server,
            operation = $operation,
            duration_ms = tracing::field::Empty,
            error = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    };
}

/// Record an error on the current span and log it
pub fn record_error<E: std::fmt::Display + ?Sized>(error: &E) {
    let span = tracing::Span::current();
    span.record("error", true);
    span.record("error.message", tracing::field::display(error));
    tracing::debug!(error = %error, "Operation failed");
}

/// Record latency on the current span under `key`
pub fn record_duration(key: &str, duration: std::time::Duration) {
    let span = tracing::Span::current();
    span.record(key, duration.as_millis() as u64);
}
