//! Actuation boundary.
//!
//! The execution loop validates every tool call into an [`Action`] before it
//! reaches an [`Actuator`]; implementations never see unknown action names.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use waymark_core_types::Action;

use crate::model::Observation;

/// Result of dispatching one action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActuationOutcome {
    /// Location after the action ran.
    pub location: String,
    /// Non-fatal failure reported by the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActuationOutcome {
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActuationError {
    /// The environment is unusable (target closed, browser crashed).
    #[error("environment closed: {0}")]
    EnvironmentClosed(String),

    /// The action failed but the environment is still usable.
    #[error("{0}")]
    Failed(String),
}

impl ActuationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EnvironmentClosed(_))
    }
}

/// External environment driven by the execution loop.
///
/// A session owns exactly one actuator for its lifetime and reuses it across
/// consecutive goals.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn execute(&self, action: &Action) -> Result<ActuationOutcome, ActuationError>;

    /// Fresh snapshot of the current environment state.
    async fn observe(&self) -> Result<Observation, ActuationError>;

    async fn current_location(&self) -> Result<String, ActuationError>;

    /// Release the environment. Called once when the owning session ends.
    async fn shutdown(&self) -> Result<(), ActuationError> {
        Ok(())
    }
}
