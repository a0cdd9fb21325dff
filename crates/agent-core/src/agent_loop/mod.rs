//! Turn-bounded observe-think-act execution.
//!
//! ```text
//! navigate(start) ; observe
//! for turn in 1..=max_turns:
//!     stop requested?           -> Stopped
//!     response = model(history) (retried with backoff)
//!     no tool calls             -> Completed
//!     for call: execute ; observe ; record step
//! -> Completed (turn limit)
//! ```
//!
//! - [`AgentLoopConfig`]: turn, retry and context-window limits
//! - [`AgentLoopController`]: drives one goal against an actuator
//! - [`LoopObserver`]: status and step notifications
//! - [`compose_context`]: first-turn composite context

pub mod clipboard;
pub mod config;
pub mod controller;
pub mod observer;
pub mod prompt;
pub mod types;

pub use clipboard::detect_copied_value;
pub use config::AgentLoopConfig;
pub use controller::{trim_history, AgentLoopController, GoalRequest, SAFETY_DECISION_ARG};
pub use observer::{LoopEvent, LoopObserver, NoopObserver};
pub use prompt::{compose_context, render_reference, ContextInputs, EXECUTION_RULES};
pub use types::{AgentLoopResult, AgentLoopStatus};
