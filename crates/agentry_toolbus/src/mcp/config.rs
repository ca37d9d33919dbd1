//! MCP Server Configuration Types
//!
//! Remote servers are listed in `.mcp.json` (or a TOML file with the same
//! schema). Credentials may reference environment variables with `$VAR`.
//!
//! # Example `.mcp.json`
//!
//! ```json
//! {
//!   "servers": [
//!     { "name": "github", "url": "https://mcp.example.com/mcp", "apiKey": "$GITHUB_TOKEN" },
//!     { "name": "search", "url": "https://search.example.com/sse", "timeoutMs": 10000 },
//!     { "name": "legacy", "url": "https://old.example.com/events", "transport": "sse", "enabled": false }
//!   ]
//! }
//! ```
//!
//! # Example TOML
//!
//! ```toml
//! [[servers]]
//! name = "github"
//! url = "https://mcp.example.com/mcp"
//! apiKey = "$GITHUB_TOKEN"
//! verifyTls = false
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::transport::{TransportConfig, TransportType};

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read or write the configuration file.
    #[error("Failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Environment variable not found during credential resolution.
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid server configuration: {0}")]
    Invalid(String),
}

fn default_enabled() -> bool {
    true
}

fn default_verify_tls() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// Configuration for a single remote MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Unique name; used for tool namespacing and in logs.
    pub name: String,

    pub url: String,

    /// Bearer credential. May be `$VAR` or contain `$VAR` references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_enabled", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Explicit transport; inferred from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportType>,

    #[serde(default = "default_verify_tls", skip_serializing_if = "is_true")]
    pub verify_tls: bool,
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: None,
            timeout_ms: None,
            enabled: true,
            transport: None,
            verify_tls: true,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Explicit transport, or the one the URL suggests.
    pub fn transport_type(&self) -> TransportType {
        self.transport.unwrap_or_else(|| TransportType::infer(&self.url))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Resolves the credential, expanding environment variable references.
    ///
    /// A value that is exactly `$VAR` must name a set variable. Inline
    /// references such as `Bearer-$TOKEN` are substituted when set and left
    /// untouched otherwise.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        match &self.api_key {
            None => Ok(None),
            Some(key) => resolve_env_refs(key, |name| env::var(name).ok()).map(Some),
        }
    }

    /// Checks the fields a connection cannot do without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("server name is empty".to_string()));
        }
        if self.name.contains('.') {
            return Err(ConfigError::Invalid(format!(
                "server name '{}' must not contain '.'",
                self.name
            )));
        }
        let url = url::Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("server '{}': bad URL: {}", self.name, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "server '{}': URL must be http or https",
                self.name
            )));
        }
        Ok(())
    }

    /// Builds the transport settings for this server.
    pub fn to_transport_config(&self) -> Result<TransportConfig, ConfigError> {
        self.validate()?;
        let mut config =
            TransportConfig::new(&self.name, &self.url).with_verify_tls(self.verify_tls);
        if let Some(key) = self.resolve_api_key()? {
            config = config.with_api_key(key);
        }
        if let Some(timeout) = self.timeout() {
            config = config.with_timeout(timeout);
        }
        Ok(config)
    }
}

fn resolve_env_refs(
    value: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let is_var_char = |c: char| c.is_ascii_alphanumeric() || c == '_';

    if let Some(name) = value.strip_prefix('$') {
        if !name.is_empty() && name.chars().all(is_var_char) {
            return lookup(name).ok_or_else(|| ConfigError::EnvVarNotFound(name.to_string()));
        }
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = after.find(|c: char| !is_var_char(c)).unwrap_or(after.len());
        let name = &after[..len];
        match (name.is_empty(), lookup(name)) {
            (false, Some(resolved)) => out.push_str(&resolved),
            _ => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct McpServersConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

impl McpServersConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads from `path`: TOML when the extension is `.toml`, JSON otherwise.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        if is_toml(path) {
            Ok(toml::from_str(&content)?)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Saves to `path` in the format its extension selects, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        fs::write(path, content)?;
        Ok(())
    }

    pub fn add_server(&mut self, config: McpServerConfig) -> &mut Self {
        self.servers.push(config);
        self
    }

    pub fn find_server(&self, name: &str) -> Option<&McpServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn find_server_mut(&mut self, name: &str) -> Option<&mut McpServerConfig> {
        self.servers.iter_mut().find(|s| s.name == name)
    }

    pub fn remove_server(&mut self, name: &str) -> Option<McpServerConfig> {
        let pos = self.servers.iter().position(|s| s.name == name)?;
        Some(self.servers.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Enabled servers, in file order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}
