//! Session registry: one context and one actuator per session, at most one
//! running goal per session.

mod service;

use agent_core::agent_loop::{AgentLoopResult, AgentLoopStatus};
use agent_core::guardrails::DeviationReport;
use agent_core::retrieval::MatchTier;
use serde::{Deserialize, Serialize};
use waymark_core_types::{SessionId, WorkflowRecord};

pub use service::SessionService;

/// Everything one goal produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalReport {
    pub session_id: SessionId,
    pub status: AgentLoopStatus,
    pub message: String,
    pub turns: u32,
    pub record: WorkflowRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_by: Option<MatchTier>,
    /// Absent for session commands, which never reach the loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation: Option<DeviationReport>,
    /// Version id the run was indexed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_as: Option<String>,
    /// The environment closed during the run and the session was ended.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub session_ended: bool,
}

impl GoalReport {
    fn from_result(session_id: SessionId, result: AgentLoopResult) -> Self {
        Self {
            session_id,
            status: result.status,
            message: result.message,
            turns: result.turns,
            record: result.record,
            reference_id: None,
            matched_by: None,
            deviation: None,
            indexed_as: None,
            session_ended: result.environment_closed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentLoopStatus::Completed
    }
}
