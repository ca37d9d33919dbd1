pub mod error;
pub mod session;

pub use error::{AgentryError, Result};
pub use session::{Session, SessionId, SessionResource, SessionStatus};
