use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl AgentError {
    /// Wraps any pipeline failure, keeping the full context chain in the message.
    pub fn request(cause: impl Into<anyhow::Error>) -> Self {
        AgentError::Request(format!("{:#}", cause.into()))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, AgentError::Configuration(_))
    }

    pub fn is_request(&self) -> bool {
        matches!(self, AgentError::Request(_))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
