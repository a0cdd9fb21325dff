//! Memory-augmented agent core.
//!
//! Retrieves reference workflows from the record store, drives the
//! execution loop against an actuator, and checks finished runs for drift.

pub mod actuation;
pub mod agent_loop;
pub mod errors;
pub mod guardrails;
pub mod llm_provider;
pub mod model;
pub mod retrieval;
pub mod session;

pub use actuation::{ActuationError, ActuationOutcome, Actuator};
pub use agent_loop::{
    AgentLoopConfig, AgentLoopController, AgentLoopResult, AgentLoopStatus, GoalRequest,
    LoopEvent, LoopObserver,
};
pub use errors::AgentError;
pub use guardrails::{validate, CheckResult, DeviationReport, DriftKind, GuardrailContext};
pub use llm_provider::{LlmProvider, MockLlmProvider, MockReply};
pub use model::{
    ContentPart, ConversationRole, ConversationTurn, ModelResponse, Observation, ToolCall,
    ToolResponse, ToolSchema,
};
pub use retrieval::{
    ReferenceEntry, RetrievalConfig, RetrievalEngine, StaticContext, WorkflowIndexer,
};
pub use session::{SessionCommand, SessionContext, TaskSummary};
