pub mod mcp;
pub mod tools;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

pub use tools::{Tool, ToolInfo, ToolResult};

/// Registry of tools the agent loop can call by name.
#[derive(Default)]
pub struct ToolBus {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Option<Arc<dyn Tool>> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        debug!("Registering tool: {}", name);
        let replaced = self.tools.insert(name, tool);
        if let Some(old) = &replaced {
            debug!("Replaced previously registered tool: {}", old.name());
        }
        replaced
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// Drops every tool whose name starts with `prefix`. Returns how many
    /// were removed.
    pub fn unregister_prefix(&mut self, prefix: &str) -> usize {
        let before = self.tools.len();
        self.tools.retain(|name, _| !name.starts_with(prefix));
        before - self.tools.len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn call(&self, tool_name: &str, args: JsonValue) -> Result<(JsonValue, u64)> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| anyhow!("Tool not found: {}", tool_name))?;

        let start = Instant::now();
        let result = tool.execute(args).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok((result, duration_ms))
    }

    /// Calls a tool with JSON-text arguments and always returns well-formed
    /// JSON text. Failures come back as `{"error": "..."}`.
    pub async fn call_json(&self, tool_name: &str, args_json: &str) -> String {
        let args = match args_json.trim() {
            "" => json!({}),
            text => match serde_json::from_str::<JsonValue>(text) {
                Ok(value @ JsonValue::Object(_)) => value,
                _ => {
                    warn!("Tool '{}' got non-object arguments, using {{}}", tool_name);
                    json!({})
                }
            },
        };

        match self.call(tool_name, args).await {
            Ok((result, duration_ms)) => {
                debug!("Tool '{}' finished in {}ms", tool_name, duration_ms);
                result.to_string()
            }
            Err(e) => json!({ "error": e.to_string() }).to_string(),
        }
    }

    /// Registered tools sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo::from_tool(t.as_ref()))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolBus").field("tools", &names).finish()
    }
}
