//! Notification surface of the execution loop.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use waymark_core_types::{Step, TaskStatus};

/// Event emitted while a goal runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    Status {
        status: TaskStatus,
        message: String,
    },
    Step {
        step: Step,
        /// Path or location of the observation captured after the step.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        observation: Option<String>,
    },
}

/// Receives loop events. Implementations must not block.
pub trait LoopObserver: Send + Sync {
    fn on_status(&self, status: TaskStatus, message: &str);

    fn on_step(&self, step: &Step, observation: Option<&str>);
}

/// Observer that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LoopObserver for NoopObserver {
    fn on_status(&self, _status: TaskStatus, _message: &str) {}

    fn on_step(&self, _step: &Step, _observation: Option<&str>) {}
}

/// Forwards events to a channel; a closed receiver is ignored.
impl LoopObserver for UnboundedSender<LoopEvent> {
    fn on_status(&self, status: TaskStatus, message: &str) {
        let _ = self.send(LoopEvent::Status {
            status,
            message: message.to_string(),
        });
    }

    fn on_step(&self, step: &Step, observation: Option<&str>) {
        let _ = self.send(LoopEvent::Step {
            step: step.clone(),
            observation: observation.map(str::to_string),
        });
    }
}
