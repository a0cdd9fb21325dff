use std::sync::Arc;

use agent_core::actuation::{ActuationError, ActuationOutcome, Actuator};
use agent_core::agent_loop::{
    AgentLoopConfig, AgentLoopController, AgentLoopStatus, GoalRequest, LoopEvent,
    LoopObserver,
};
use agent_core::llm_provider::{MockLlmProvider, MockReply};
use agent_core::model::{ContentPart, ModelResponse, Observation, ToolCall};
use agent_core::retrieval::StaticContext;
use agent_core::session::SessionContext;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use waymark_core_types::{Action, Step, TaskStatus};

/// Actuator that follows navigations and records every action.
#[derive(Default)]
struct ScriptedActuator {
    location: Mutex<String>,
    executed: Mutex<Vec<Action>>,
    closed: Mutex<bool>,
}

impl ScriptedActuator {
    fn closed() -> Self {
        let actuator = Self::default();
        *actuator.closed.lock() = true;
        actuator
    }

    fn executed(&self) -> Vec<Action> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl Actuator for ScriptedActuator {
    async fn execute(&self, action: &Action) -> Result<ActuationOutcome, ActuationError> {
        if *self.closed.lock() {
            return Err(ActuationError::EnvironmentClosed("target closed".into()));
        }
        self.executed.lock().push(action.clone());
        if let Action::Navigate { url } = action {
            *self.location.lock() = url.clone();
        }
        Ok(ActuationOutcome::at(self.location.lock().clone()))
    }

    async fn observe(&self) -> Result<Observation, ActuationError> {
        Ok(Observation::png(self.location.lock().clone(), vec![0x89, 0x50]))
    }

    async fn current_location(&self) -> Result<String, ActuationError> {
        Ok(self.location.lock().clone())
    }
}

fn call(name: &str, args: serde_json::Value) -> ModelResponse {
    ModelResponse::calls(vec![ToolCall::new(name, args)])
}

fn controller(
    config: AgentLoopConfig,
    provider: Arc<MockLlmProvider>,
    actuator: Arc<ScriptedActuator>,
) -> AgentLoopController {
    AgentLoopController::new(config, provider, actuator)
}

#[tokio::test]
async fn login_goal_runs_to_completion() {
    let provider = Arc::new(MockLlmProvider::with_replies([
        MockReply::Respond(
            call("navigate", json!({"url": "https://portal.test/login"}))
                .with_text("Open the login page"),
        ),
        MockReply::Respond(call(
            "type_text_at",
            json!({"x": 500, "y": 300, "text": "user@portal.test"}),
        )),
        MockReply::Respond(call(
            "type_text_at",
            json!({"x": 500, "y": 360, "text": "hunter2"}),
        )),
        MockReply::Respond(
            call("click_at", json!({"x": 500, "y": 420})).with_text("Click the Login button"),
        ),
        MockReply::Respond(ModelResponse::text("Logged in successfully")),
    ]));
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator.clone());
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(
            GoalRequest::new("login to the portal", &static_context),
            &mut session,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, AgentLoopStatus::Completed);
    assert_eq!(result.message, "Logged in successfully");
    assert_eq!(result.turns, 5);
    assert_eq!(result.steps_taken(), 4);
    let numbers: Vec<u32> = result.record.steps().iter().map(|s| s.step_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(
        result.record.steps()[0].url.as_deref(),
        Some("https://portal.test/login")
    );
    assert_eq!(actuator.executed().len(), 4);
    assert_eq!(provider.calls(), 5);

    assert_eq!(session.current_location(), Some("https://portal.test/login"));
    assert_eq!(session.instructions(), ["login to the portal"]);
    let history = session.task_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TaskStatus::Completed);
    assert_eq!(history[0].steps_count, 4);
}

#[tokio::test]
async fn start_location_is_not_a_step() {
    let provider = Arc::new(MockLlmProvider::new());
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider, actuator.clone());
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(
            GoalRequest::new("check the dashboard", &static_context)
                .start_at(Some("https://portal.test/home")),
            &mut session,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.is_success());
    assert_eq!(result.steps_taken(), 0);
    assert_eq!(actuator.executed().len(), 1);
    assert_eq!(session.current_location(), Some("https://portal.test/home"));
}

#[tokio::test]
async fn turn_limit_completes_with_partial_steps() {
    let provider = Arc::new(
        MockLlmProvider::new().repeating(call("scroll_document", json!({"direction": "down"}))),
    );
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::minimal().max_turns(3), provider, actuator);
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(
            GoalRequest::new("scroll forever", &static_context),
            &mut session,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, AgentLoopStatus::Completed);
    assert!(result.message.contains("Reached max turns (3)"));
    assert_eq!(result.steps_taken(), 3);
    assert_eq!(result.turns, 3);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let provider = Arc::new(MockLlmProvider::with_replies([
        MockReply::Fail("503".into()),
        MockReply::Empty,
        MockReply::Respond(ModelResponse::text("done")),
    ]));
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator);
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let started = tokio::time::Instant::now();
    let result = controller
        .run(
            GoalRequest::new("open reports", &static_context),
            &mut session,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.is_success());
    assert_eq!(provider.calls(), 3);
    assert!(started.elapsed() >= std::time::Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_goal() {
    let provider = Arc::new(MockLlmProvider::with_replies([
        MockReply::Fail("503".into()),
        MockReply::Fail("503".into()),
        MockReply::Fail("overloaded".into()),
    ]));
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator);
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(
            GoalRequest::new("open reports", &static_context),
            &mut session,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, AgentLoopStatus::Failed);
    assert!(result.message.contains("after 3 attempts"));
    assert!(result.message.contains("overloaded"));
    assert_eq!(provider.calls(), 3);
    assert_eq!(session.task_history()[0].status, TaskStatus::Failed);
}

#[tokio::test]
async fn stop_before_first_turn() {
    let provider = Arc::new(MockLlmProvider::new());
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator);
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();
    let stop = CancellationToken::new();
    stop.cancel();

    let result = controller
        .run(GoalRequest::new("anything", &static_context), &mut session, &stop)
        .await;

    assert_eq!(result.status, AgentLoopStatus::Stopped);
    assert_eq!(result.message, "Stopped by user");
    assert_eq!(provider.calls(), 0);
    assert_eq!(session.task_history()[0].status, TaskStatus::Stopped);
}

/// Raises the stop signal as soon as the first step lands.
struct StopAfterFirstStep(CancellationToken);

impl LoopObserver for StopAfterFirstStep {
    fn on_status(&self, _status: TaskStatus, _message: &str) {}

    fn on_step(&self, _step: &Step, _observation: Option<&str>) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn stop_mid_goal_keeps_executed_steps() {
    let provider = Arc::new(MockLlmProvider::with_replies([
        MockReply::Respond(
            call("navigate", json!({"url": "https://portal.test/login"}))
                .with_text("Open the login page"),
        ),
        MockReply::Respond(call("click_at", json!({"x": 500, "y": 420}))),
        MockReply::Respond(ModelResponse::text("Signed in")),
    ]));
    let actuator = Arc::new(ScriptedActuator::default());
    let stop = CancellationToken::new();
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator.clone())
        .with_observer(Arc::new(StopAfterFirstStep(stop.clone())));
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(GoalRequest::new("login", &static_context), &mut session, &stop)
        .await;

    assert_eq!(result.status, AgentLoopStatus::Stopped);
    assert_eq!(result.turns, 1);
    assert_eq!(result.steps_taken(), 1);
    assert_eq!(result.record.steps()[0].action_type, "navigate");
    assert_eq!(provider.calls(), 1);
    assert_eq!(actuator.executed().len(), 1);
    assert_eq!(session.current_location(), Some("https://portal.test/login"));
    let summary = &session.task_history()[0];
    assert_eq!(summary.status, TaskStatus::Stopped);
    assert_eq!(summary.steps_count, 1);
}

#[tokio::test]
async fn closed_environment_fails_the_goal() {
    let provider = Arc::new(MockLlmProvider::with_replies([MockReply::Respond(call(
        "click_at",
        json!({"x": 1, "y": 2}),
    ))]));
    let actuator = Arc::new(ScriptedActuator::closed());
    let controller = controller(AgentLoopConfig::default(), provider, actuator);
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(GoalRequest::new("click it", &static_context), &mut session, &CancellationToken::new())
        .await;

    assert_eq!(result.status, AgentLoopStatus::Failed);
    assert!(result.message.contains("target closed"));
    assert!(result.environment_closed);
    assert_eq!(result.steps_taken(), 0);
}

#[tokio::test]
async fn invalid_call_is_recorded_with_warning() {
    let provider = Arc::new(MockLlmProvider::with_replies([
        MockReply::Respond(call("teleport", json!({"to": "mars"}))),
        MockReply::Respond(ModelResponse::text("gave up")),
    ]));
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator.clone());
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(GoalRequest::new("go", &static_context), &mut session, &CancellationToken::new())
        .await;

    assert!(result.is_success());
    assert_eq!(result.steps_taken(), 1);
    let warning = result.record.steps()[0].warning.clone().unwrap_or_default();
    assert!(warning.contains("teleport"));
    assert!(actuator.executed().is_empty());

    let second_history = &provider.histories()[1];
    let responses: Vec<_> = second_history
        .last()
        .map(|turn| turn.tool_responses().cloned().collect())
        .unwrap_or_default();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].response.contains_key("error"));
}

#[tokio::test]
async fn copied_value_lands_in_scratch() {
    let provider = Arc::new(MockLlmProvider::with_replies([
        MockReply::Respond(
            call("key_combination", json!({"keys": "ctrl+c"}))
                .with_text("I copied US66254 from the supplier grid"),
        ),
        MockReply::Respond(ModelResponse::text("copied")),
    ]));
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator);
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();
    let stop = CancellationToken::new();

    controller
        .run(GoalRequest::new("copy the supplier id", &static_context), &mut session, &stop)
        .await;
    assert_eq!(session.scratch(), Some("US66254"));

    controller
        .run(GoalRequest::new("paste it into search", &static_context), &mut session, &stop)
        .await;
    let last_history = provider.histories().pop().unwrap_or_default();
    let context = last_history.first().map(|turn| turn.text()).unwrap_or_default();
    assert!(context.contains("CLIPBOARD (last copied value): US66254"));
    assert!(context.contains("CONVERSATION HISTORY"));
    assert!(context.contains("PREVIOUS TASKS IN THIS SESSION:"));
}

#[tokio::test]
async fn first_turn_carries_context_and_observation() {
    let provider = Arc::new(MockLlmProvider::new());
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator);
    let static_context = StaticContext {
        entries: vec!["Company ACME has id 4411".into()],
    };
    let mut session = SessionContext::new();

    controller
        .run(
            GoalRequest::new("find the id of ACME", &static_context),
            &mut session,
            &CancellationToken::new(),
        )
        .await;

    let first = &provider.histories()[0][0];
    assert!(matches!(first.parts[0], ContentPart::Text { .. }));
    assert!(matches!(first.parts[1], ContentPart::Observation { .. }));
    assert!(first.text().contains("STATIC REFERENCE DATA"));
    assert!(first.text().contains("1. Company ACME has id 4411"));
}

#[tokio::test]
async fn static_usage_is_reported() {
    let provider = Arc::new(MockLlmProvider::with_replies([
        MockReply::Respond(
            call("click_at", json!({"x": 10, "y": 10})).with_text("Company ACME row is visible"),
        ),
        MockReply::Respond(ModelResponse::text("done")),
    ]));
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider, actuator);
    let static_context = StaticContext {
        entries: vec!["Company ACME has id 4411".into()],
    };
    let mut session = SessionContext::new();

    let result = controller
        .run(
            GoalRequest::new("open ACME", &static_context),
            &mut session,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.static_context_loaded);
    assert!(result.static_context_referenced);
}

#[tokio::test]
async fn empty_goal_is_rejected() {
    let provider = Arc::new(MockLlmProvider::new());
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator);
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(GoalRequest::new("   ", &static_context), &mut session, &CancellationToken::new())
        .await;

    assert_eq!(result.status, AgentLoopStatus::Failed);
    assert_eq!(result.message, "Goal is required");
    assert_eq!(provider.calls(), 0);
    assert!(session.instructions().is_empty());
}

#[tokio::test]
async fn safety_decision_is_acknowledged() {
    let provider = Arc::new(MockLlmProvider::with_replies([
        MockReply::Respond(call(
            "click_at",
            json!({"x": 5, "y": 5, "safety_decision": {"decision": "require_confirmation"}}),
        )),
        MockReply::Respond(ModelResponse::text("ok")),
    ]));
    let actuator = Arc::new(ScriptedActuator::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = controller(AgentLoopConfig::default(), provider.clone(), actuator)
        .with_observer(Arc::new(tx));
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();

    let result = controller
        .run(GoalRequest::new("press it", &static_context), &mut session, &CancellationToken::new())
        .await;

    assert!(!result.record.steps()[0].args.contains_key("safety_decision"));
    let responses: Vec<_> = provider.histories()[1]
        .last()
        .map(|turn| turn.tool_responses().cloned().collect())
        .unwrap_or_default();
    assert_eq!(responses[0].response["safety_acknowledgement"], json!("true"));

    let mut statuses = Vec::new();
    let mut steps = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            LoopEvent::Status { message, .. } => statuses.push(message),
            LoopEvent::Step { .. } => steps += 1,
        }
    }
    assert_eq!(statuses.first().map(String::as_str), Some("Starting task: press it"));
    assert!(statuses.iter().any(|s| s == "Safety check: require_confirmation"));
    assert_eq!(statuses.last().map(String::as_str), Some("ok"));
    assert_eq!(steps, 1);
}

#[tokio::test]
async fn reset_discards_session_memory() {
    let provider = Arc::new(MockLlmProvider::new());
    let actuator = Arc::new(ScriptedActuator::default());
    let controller = controller(AgentLoopConfig::default(), provider, actuator);
    let static_context = StaticContext::default();
    let mut session = SessionContext::new();
    session.set_scratch("CCR-7");

    controller
        .run(GoalRequest::new("first", &static_context), &mut session, &CancellationToken::new())
        .await;
    let old_id = session.session_id().clone();
    let previous = session.reset();

    assert_eq!(previous.task_history().len(), 1);
    assert_ne!(session.session_id(), &old_id);
    assert!(session.scratch().is_none());
    assert!(session.task_history().is_empty());
    assert!(session.instructions().is_empty());
}
