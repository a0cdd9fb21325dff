use memory_center::StoreError;
use thiserror::Error;

use crate::actuation::ActuationError;

/// Errors emitted by the agent-core crate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Raised when a request is malformed or missing required fields.
    #[error("invalid agent request: {0}")]
    InvalidRequest(String),

    /// A model call failed in a way that may succeed on retry.
    #[error("model call failed: {0}")]
    ModelTransient(String),

    /// Every retry of a model call failed.
    #[error("model call failed after {attempts} attempts: {last}")]
    ModelRetriesExhausted { attempts: u32, last: String },

    /// The actuation environment is gone and cannot be used again.
    #[error("environment closed: {0}")]
    EnvironmentClosed(String),

    #[error("actuation failed: {0}")]
    Actuation(String),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    /// A stored reference record matched no known schema version.
    #[error("failed to decode reference record: {0}")]
    ReferenceDecode(String),

    #[error("session {0} already has an active goal")]
    SessionBusy(String),

    #[error("session {0} not found")]
    SessionNotFound(String),
}

impl AgentError {
    /// Helper for wrapping static string errors.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Helper for retryable model failures.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::ModelTransient(message.into())
    }

    pub fn reference_decode(message: impl Into<String>) -> Self {
        Self::ReferenceDecode(message.into())
    }

    /// Whether the execution loop should retry the model call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelTransient(_))
    }
}

impl From<ActuationError> for AgentError {
    fn from(err: ActuationError) -> Self {
        match err {
            ActuationError::EnvironmentClosed(message) => Self::EnvironmentClosed(message),
            ActuationError::Failed(message) => Self::Actuation(message),
        }
    }
}
