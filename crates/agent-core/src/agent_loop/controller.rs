//! Execution loop controller.
//!
//! One controller drives one goal at a time against the actuator it was
//! built with. Turns are strictly sequential; the stop token is polled
//! between turns only, so an in-flight action always completes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waymark_core_types::{Action, Step, TaskId, TaskStatus, WorkflowRecord};

use super::clipboard::detect_copied_value;
use super::config::AgentLoopConfig;
use super::observer::{LoopObserver, NoopObserver};
use super::prompt::{compose_context, ContextInputs};
use super::types::AgentLoopResult;
use crate::actuation::{ActuationError, Actuator};
use crate::errors::AgentError;
use crate::llm_provider::LlmProvider;
use crate::model::{
    action_tool_schemas, ContentPart, ConversationRole, ConversationTurn, ModelResponse,
    Observation, ToolCall, ToolResponse, ToolSchema,
};
use crate::retrieval::{ReferenceEntry, StaticContext};
use crate::session::{SessionContext, TaskSummary};

/// Argument carrying a safety confirmation request; stripped before dispatch.
pub const SAFETY_DECISION_ARG: &str = "safety_decision";

/// One goal to execute.
#[derive(Debug, Clone, Copy)]
pub struct GoalRequest<'a> {
    pub goal: &'a str,
    pub start_location: Option<&'a str>,
    pub reference: Option<&'a ReferenceEntry>,
    pub static_context: &'a StaticContext,
}

impl<'a> GoalRequest<'a> {
    pub fn new(goal: &'a str, static_context: &'a StaticContext) -> Self {
        Self {
            goal,
            start_location: None,
            reference: None,
            static_context,
        }
    }

    pub fn start_at(mut self, location: Option<&'a str>) -> Self {
        self.start_location = location.filter(|loc| !loc.trim().is_empty());
        self
    }

    pub fn with_reference(mut self, reference: Option<&'a ReferenceEntry>) -> Self {
        self.reference = reference;
        self
    }
}

/// How one tool call ended.
enum CallOutcome {
    Executed(ToolResponse),
    /// The environment is gone; the loop must stop.
    Fatal(String),
}

/// Controller for the turn-bounded execution loop.
pub struct AgentLoopController {
    config: AgentLoopConfig,
    provider: Arc<dyn LlmProvider>,
    actuator: Arc<dyn Actuator>,
    observer: Arc<dyn LoopObserver>,
    tools: Vec<ToolSchema>,
}

impl AgentLoopController {
    /// Create a new controller over the given services.
    pub fn new(
        config: AgentLoopConfig,
        provider: Arc<dyn LlmProvider>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        Self {
            config,
            provider,
            actuator,
            observer: Arc::new(NoopObserver),
            tools: action_tool_schemas(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LoopObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    /// Run one goal to a terminal state.
    ///
    /// Every exit path returns the steps executed so far, refreshes the
    /// session location and appends a task summary to the session.
    pub async fn run(
        &self,
        request: GoalRequest<'_>,
        session: &mut SessionContext,
        stop: &CancellationToken,
    ) -> AgentLoopResult {
        let goal = request.goal.trim();
        let record = WorkflowRecord::for_goal(TaskId::new(), goal);
        let result = if goal.is_empty() {
            AgentLoopResult::failed("Goal is required".to_string(), record, 0)
        } else {
            session.record_instruction(goal);
            info!(
                task = %record.id,
                session = %session.session_id(),
                reference = request.reference.map(|r| r.id.as_str()),
                static_loaded = request.static_context.is_loaded(),
                "goal started"
            );
            self.observer
                .on_status(TaskStatus::Running, &format!("Starting task: {goal}"));
            self.drive(goal, request, record, session, stop).await
        };
        self.finish(goal, request.static_context, result, session)
            .await
    }

    async fn drive(
        &self,
        goal: &str,
        request: GoalRequest<'_>,
        mut record: WorkflowRecord,
        session: &mut SessionContext,
        stop: &CancellationToken,
    ) -> AgentLoopResult {
        if let Some(location) = request.start_location {
            let action = Action::Navigate {
                url: location.to_string(),
            };
            match self.actuator.execute(&action).await {
                Ok(outcome) => session.set_location(outcome.location),
                Err(err) if err.is_fatal() => {
                    return AgentLoopResult::environment_closed(err.to_string(), record, 0);
                }
                Err(err) => warn!(error = %err, location, "start navigation failed"),
            }
        }

        let context = compose_context(&ContextInputs {
            goal,
            session: &*session,
            reference: request.reference,
            static_context: request.static_context,
            config: &self.config,
        });
        debug!(chars = context.len(), "composite context built");
        let mut first = vec![ContentPart::Text { text: context }];
        match self.actuator.observe().await {
            Ok(observation) => first.push(ContentPart::Observation { observation }),
            Err(err) if err.is_fatal() => {
                return AgentLoopResult::environment_closed(err.to_string(), record, 0);
            }
            Err(err) => warn!(error = %err, "initial observation failed"),
        }

        let mut history = vec![ConversationTurn::new(ConversationRole::User, first)];
        let mut final_text = None;

        for turn in 1..=self.config.max_turns {
            if stop.is_cancelled() {
                info!(turn, steps = record.len(), "stop requested");
                return AgentLoopResult::stopped(record, turn - 1).with_final_text(final_text);
            }
            debug!(turn, "model turn");

            let response = match self.generate_with_retry(&history).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(turn, error = %err, "model call failed");
                    return AgentLoopResult::failed(err.to_string(), record, turn)
                        .with_final_text(final_text);
                }
            };
            history.push(response.to_turn());
            let reasoning = response
                .text
                .as_ref()
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty());
            if reasoning.is_some() {
                final_text = reasoning.clone();
            }

            if response.tool_calls.is_empty() {
                let message = reasoning
                    .clone()
                    .unwrap_or_else(|| "Task completed".to_string());
                info!(turn, steps = record.len(), "model finished");
                return AgentLoopResult::completed(message, record, turn)
                    .with_final_text(final_text);
            }

            let mut responses = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                match self
                    .execute_call(call, reasoning.as_deref(), &mut record, session)
                    .await
                {
                    CallOutcome::Executed(tool_response) => {
                        responses.push(ContentPart::ToolResponse {
                            response: tool_response,
                        });
                    }
                    CallOutcome::Fatal(message) => {
                        warn!(turn, error = %message, "environment closed");
                        return AgentLoopResult::environment_closed(message, record, turn)
                            .with_final_text(final_text);
                    }
                }
            }
            history.push(ConversationTurn::new(ConversationRole::User, responses));
            trim_history(&mut history, self.config.max_context_turns);
        }

        info!(max_turns = self.config.max_turns, "turn limit reached");
        AgentLoopResult::max_turns_reached(record, self.config.max_turns)
            .with_final_text(final_text)
    }

    /// Call the model; retries transient errors and empty responses.
    async fn generate_with_retry(
        &self,
        history: &[ConversationTurn],
    ) -> Result<ModelResponse, AgentError> {
        let attempts = self.config.model_retry_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match self.provider.generate(history, &self.tools).await {
                Ok(response) if !response.is_empty() => return Ok(response),
                Ok(_) => {
                    last = "empty model response".to_string();
                    warn!(attempt, attempts, "empty model response");
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempt, attempts, error = %err, "model call failed");
                    last = err.to_string();
                }
                Err(err) => return Err(err),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }
        }
        Err(AgentError::ModelRetriesExhausted { attempts, last })
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
        reasoning: Option<&str>,
        record: &mut WorkflowRecord,
        session: &mut SessionContext,
    ) -> CallOutcome {
        let mut args = call.args.clone();
        let mut response = Map::new();
        if let Some(decision) = args.remove(SAFETY_DECISION_ARG) {
            let kind = decision
                .get("decision")
                .and_then(Value::as_str)
                .unwrap_or_default();
            info!(action = %call.name, decision = kind, "safety decision acknowledged");
            if !kind.is_empty() {
                self.observer
                    .on_status(TaskStatus::Running, &format!("Safety check: {kind}"));
            }
            response.insert("safety_acknowledgement".into(), json!("true"));
        }

        let mut warning = None;
        let action = match Action::from_call(&call.name, &args) {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(action = %call.name, error = %err, "tool call rejected");
                warning = Some(err.to_string());
                None
            }
        };
        if let Some(message) = action.as_ref().and_then(|a| milestone(a, reasoning)) {
            self.observer.on_status(TaskStatus::Running, &message);
        }

        let mut location = session.current_location().map(str::to_string);
        if let Some(action) = &action {
            match self.actuator.execute(action).await {
                Ok(outcome) => {
                    if let Some(error) = outcome.error {
                        warning = Some(error);
                    }
                    if !outcome.location.is_empty() {
                        location = Some(outcome.location);
                    }
                }
                Err(ActuationError::EnvironmentClosed(message)) => {
                    return CallOutcome::Fatal(message);
                }
                Err(err) => warning = Some(err.to_string()),
            }
        }
        if let Some(location) = &location {
            session.set_location(location.clone());
        }

        if let Some(value) =
            detect_copied_value(action.as_ref(), reasoning, session.scratch_history())
        {
            info!(value = %value, "copied value captured");
            session.set_scratch(value);
        }

        let observation = match self.actuator.observe().await {
            Ok(observation) => Some(observation),
            Err(ActuationError::EnvironmentClosed(message)) => {
                return CallOutcome::Fatal(message);
            }
            Err(err) => {
                warn!(error = %err, "observation failed");
                None
            }
        };

        let mut step = Step::new(call.name.clone(), args)
            .with_reasoning(reasoning.map(str::to_string))
            .with_warning(warning.clone())
            .with_observation_path(observation.as_ref().and_then(|o| o.path.clone()));
        if let Some(location) = &location {
            step = step.with_url(location.clone());
        }
        let step = record.push_step(step);
        debug!(step = step.step_number, action = %step.action_type, "step recorded");
        self.observer
            .on_step(step, observation_ref(observation.as_ref()).as_deref());

        response.insert("url".into(), json!(location.unwrap_or_default()));
        if let Some(warning) = warning {
            response.insert("error".into(), json!(warning));
        }
        CallOutcome::Executed(ToolResponse {
            call_id: call.id.clone(),
            name: call.name.clone(),
            response,
            observation,
        })
    }

    async fn finish(
        &self,
        goal: &str,
        static_context: &StaticContext,
        mut result: AgentLoopResult,
        session: &mut SessionContext,
    ) -> AgentLoopResult {
        match self.actuator.current_location().await {
            Ok(location) => session.set_location(location),
            Err(err) => debug!(error = %err, "location refresh failed"),
        }

        result.static_context_loaded = static_context.is_loaded();
        result.static_context_referenced = static_context.referenced_by(result.record.reasonings());

        let status = result.status.task_status();
        session.record_task(TaskSummary {
            goal: goal.to_string(),
            status,
            result: result.message.clone(),
            steps_count: result.record.len(),
            final_location: session.current_location().map(str::to_string),
            timestamp: Utc::now(),
        });
        info!(
            status = %status,
            steps = result.record.len(),
            turns = result.turns,
            "goal finished"
        );
        self.observer.on_status(status, &result.message);
        result
    }
}

/// Keep the first turn and the most recent `2 * max_context_turns` turns.
pub fn trim_history(history: &mut Vec<ConversationTurn>, max_context_turns: usize) {
    let keep = max_context_turns.saturating_mul(2);
    if history.len() > keep + 1 {
        let before = history.len();
        history.drain(1..before - keep);
        debug!(before, after = history.len(), "context window trimmed");
    }
}

fn observation_ref(observation: Option<&Observation>) -> Option<String> {
    observation.map(|o| o.path.clone().unwrap_or_else(|| o.location.clone()))
}

/// Short progress message for notable actions.
fn milestone(action: &Action, reasoning: Option<&str>) -> Option<String> {
    match action {
        Action::Navigate { url } => {
            let lowered = url.to_lowercase();
            if lowered.contains("login") || lowered.contains("signin") {
                Some("Navigating to login...".to_string())
            } else {
                let host = url::Url::parse(url)
                    .ok()
                    .and_then(|parsed| parsed.host_str().map(str::to_string))
                    .unwrap_or_else(|| url.clone());
                Some(format!("Opening {host}..."))
            }
        }
        Action::ClickAt(_) => {
            let reasoning = reasoning?.to_lowercase();
            ["sign in", "login", "submit", "save"]
                .iter()
                .any(|kw| reasoning.contains(kw))
                .then(|| "Submitting form...".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trim_keeps_first_and_recent_turns() {
        let mut history: Vec<ConversationTurn> = (0..9)
            .map(|n| ConversationTurn::user_text(format!("turn {n}")))
            .collect();
        trim_history(&mut history, 2);
        let texts: Vec<String> = history.iter().map(ConversationTurn::text).collect();
        assert_eq!(texts, vec!["turn 0", "turn 5", "turn 6", "turn 7", "turn 8"]);

        let mut short: Vec<ConversationTurn> = (0..3)
            .map(|n| ConversationTurn::user_text(format!("turn {n}")))
            .collect();
        trim_history(&mut short, 2);
        assert_eq!(short.len(), 3);
    }

    #[test]
    fn milestones_for_navigation_and_submit() {
        let nav = Action::Navigate {
            url: "https://portal.example.com/home".into(),
        };
        assert_eq!(
            milestone(&nav, None).as_deref(),
            Some("Opening portal.example.com...")
        );
        let args = json!({"x": 10, "y": 20});
        let click = Action::from_call("click_at", args.as_object().unwrap()).unwrap();
        assert_eq!(
            milestone(&click, Some("Click the Login button")).as_deref(),
            Some("Submitting form...")
        );
        assert_eq!(milestone(&click, Some("open menu")), None);
    }
}
