use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AgentryError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Running,
    Closed,
    Failed { error: String },
}

/// Something whose lifetime is bounded by a [`Session`].
///
/// Resources are torn down in registration order when the session closes.
/// Remote MCP clients are the main implementors: teardown disconnects the
/// transport and releases its buffers.
#[async_trait]
pub trait SessionResource: Send + Sync {
    /// Short human-readable identity used in logs.
    fn label(&self) -> String;

    async fn teardown(&self) -> anyhow::Result<()>;
}

/// A conversation session. Owns every resource registered with it.
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    resources: Vec<Arc<dyn SessionResource>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            resources: Vec::new(),
        }
    }

    /// Hands a resource to the session for automatic teardown on close.
    pub fn register(&mut self, resource: Arc<dyn SessionResource>) -> Result<()> {
        if self.is_closed() {
            return Err(AgentryError::Session(format!(
                "cannot register '{}': session {} is closed",
                resource.label(),
                self.id
            )));
        }
        debug!("Session {} registered resource {}", self.id, resource.label());
        self.resources.push(resource);
        Ok(())
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Running)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status, SessionStatus::Closed)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Tears down every registered resource, then drops them.
    ///
    /// A failing teardown is logged and does not stop the remaining ones.
    /// Returns how many resources were torn down cleanly. Closing twice is a
    /// no-op.
    pub async fn close(&mut self) -> usize {
        if self.is_closed() {
            return 0;
        }

        info!("Closing session {} ({} resources)", self.id, self.resources.len());

        let mut clean = 0;
        for resource in self.resources.drain(..) {
            match resource.teardown().await {
                Ok(()) => clean += 1,
                Err(e) => warn!(
                    "Session {}: teardown of {} failed: {}",
                    self.id,
                    resource.label(),
                    e
                ),
            }
        }

        self.status = SessionStatus::Closed;
        clean
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field(
                "resources",
                &self.resources.iter().map(|r| r.label()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
