use thiserror::Error;

/// MCP-related errors
#[derive(Error, Debug)]
pub enum McpError {
    /// Server unreachable, stream failed, or the handshake could not complete.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed payload, missing result, or unexpected HTTP response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with a JSON-RPC error object.
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc { code: i64, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("MCP server already running: {0}")]
    ServerAlreadyRunning(String),

    #[error("MCP server not running: {0}")]
    ServerNotRunning(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Maps a reqwest failure onto the MCP taxonomy, keeping timeouts apart.
    pub(crate) fn from_http(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            McpError::Timeout(format!("{}: {}", context, err))
        } else {
            McpError::Connection(format!("{}: {}", context, err))
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, McpError::Connection(_) | McpError::Timeout(_))
    }
}

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
