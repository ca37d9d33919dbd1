use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentryError {
    #[error("session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, AgentryError>;
