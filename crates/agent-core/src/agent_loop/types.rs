//! Core data types for the execution loop.

use serde::{Deserialize, Serialize};
use waymark_core_types::{TaskStatus, WorkflowRecord};

/// State of the execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLoopStatus {
    /// Created, not started.
    Idle,
    /// Inside a turn.
    Running,
    /// The model stopped calling tools, or the turn limit was reached.
    Completed,
    /// Model retries exhausted or the environment closed.
    Failed,
    /// Stop signal observed between turns.
    Stopped,
}

impl AgentLoopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Status reported to observers and stored in task history.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Idle => TaskStatus::Pending,
            Self::Running => TaskStatus::Running,
            Self::Completed => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
            Self::Stopped => TaskStatus::Stopped,
        }
    }
}

/// Result of one goal execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopResult {
    /// Final status of the loop.
    pub status: AgentLoopStatus,
    /// Completion or error message, shown to users verbatim.
    pub message: String,
    /// Steps executed, in order. Kept on every exit path.
    pub record: WorkflowRecord,
    /// Model turns started.
    pub turns: u32,
    /// Last text the model produced, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,
    /// Whether static reference data was injected into the context.
    #[serde(default)]
    pub static_context_loaded: bool,
    /// Whether the run's reasoning mentioned that static data.
    #[serde(default)]
    pub static_context_referenced: bool,
    /// The actuator reported its environment closed; it must not be reused.
    #[serde(default)]
    pub environment_closed: bool,
}

impl AgentLoopResult {
    fn with_status(
        status: AgentLoopStatus,
        message: String,
        record: WorkflowRecord,
        turns: u32,
    ) -> Self {
        Self {
            status,
            message,
            record,
            turns,
            final_text: None,
            static_context_loaded: false,
            static_context_referenced: false,
            environment_closed: false,
        }
    }

    /// Create a completed result.
    pub fn completed(message: String, record: WorkflowRecord, turns: u32) -> Self {
        Self::with_status(AgentLoopStatus::Completed, message, record, turns)
    }

    /// Create a failed result.
    pub fn failed(message: String, record: WorkflowRecord, turns: u32) -> Self {
        Self::with_status(AgentLoopStatus::Failed, message, record, turns)
    }

    /// Failed because the environment became unusable.
    pub fn environment_closed(message: String, record: WorkflowRecord, turns: u32) -> Self {
        let mut result = Self::failed(message, record, turns);
        result.environment_closed = true;
        result
    }

    /// Create a stopped result.
    pub fn stopped(record: WorkflowRecord, turns: u32) -> Self {
        Self::with_status(
            AgentLoopStatus::Stopped,
            "Stopped by user".to_string(),
            record,
            turns,
        )
    }

    /// Turn limit reached: completed with partial progress kept.
    pub fn max_turns_reached(record: WorkflowRecord, turns: u32) -> Self {
        Self::with_status(
            AgentLoopStatus::Completed,
            format!("Reached max turns ({turns}) before the model finished"),
            record,
            turns,
        )
    }

    pub fn with_final_text(mut self, text: Option<String>) -> Self {
        self.final_text = text;
        self
    }

    /// Check if the loop completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self.status, AgentLoopStatus::Completed)
    }

    pub fn steps_taken(&self) -> usize {
        self.record.len()
    }
}
