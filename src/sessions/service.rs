use std::sync::Arc;

use agent_core::actuation::Actuator;
use agent_core::agent_loop::{
    AgentLoopConfig, AgentLoopController, AgentLoopResult, GoalRequest, LoopObserver,
    NoopObserver,
};
use agent_core::errors::AgentError;
use agent_core::guardrails::{validate, GuardrailContext};
use agent_core::llm_provider::LlmProvider;
use agent_core::retrieval::{RetrievalEngine, StaticContext, WorkflowIndexer};
use agent_core::session::{SessionCommand, SessionContext, TaskSummary};
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use waymark_core_types::{SessionId, TaskId, TaskStatus, WorkflowRecord};

use super::GoalReport;

struct SessionHandle {
    context: Mutex<SessionContext>,
    actuator: Arc<dyn Actuator>,
    stop: SyncMutex<CancellationToken>,
}

/// Owns every live session and runs goals against them.
///
/// Goals on different sessions run concurrently; a second goal on a busy
/// session fails with [`AgentError::SessionBusy`] instead of queueing.
pub struct SessionService {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    provider: Arc<dyn LlmProvider>,
    retrieval: RetrievalEngine,
    indexer: Option<WorkflowIndexer>,
    loop_config: AgentLoopConfig,
    observer: Arc<dyn LoopObserver>,
}

impl SessionService {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        retrieval: RetrievalEngine,
        loop_config: AgentLoopConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            provider,
            retrieval,
            indexer: None,
            loop_config,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Index finished runs so later goals can recall them.
    pub fn with_indexer(mut self, indexer: WorkflowIndexer) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LoopObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register a session that owns `actuator` until it ends.
    pub fn create(&self, actuator: Arc<dyn Actuator>) -> SessionId {
        let context = SessionContext::new();
        let id = context.session_id().clone();
        self.sessions.insert(
            id.clone(),
            Arc::new(SessionHandle {
                context: Mutex::new(context),
                actuator,
                stop: SyncMutex::new(CancellationToken::new()),
            }),
        );
        info!(session = %id, "session created");
        id
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn handle(&self, id: &SessionId) -> Result<Arc<SessionHandle>, AgentError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))
    }

    /// Retrieve, run, and check one goal.
    ///
    /// A run that ends with the environment closed also ends the session.
    /// Input shaped like `remember: VALUE` or `note: KEY=VALUE` edits session
    /// memory and never reaches the loop.
    pub async fn run_goal(
        &self,
        id: &SessionId,
        goal: &str,
        start_location: Option<&str>,
    ) -> Result<GoalReport, AgentError> {
        let handle = self.handle(id)?;
        // The token swap and the busy mark happen under the stop lock so a
        // concurrent `stop` always cancels the token this goal polls.
        let (mut context, stop) = {
            let mut current = handle.stop.lock();
            let context = handle
                .context
                .try_lock()
                .map_err(|_| AgentError::SessionBusy(id.to_string()))?;
            let stop = CancellationToken::new();
            *current = stop.clone();
            (context, stop)
        };

        if let Some(command) = SessionCommand::parse(goal) {
            let message = command.apply(&mut context);
            info!(session = %id, %message, "session command applied");
            let record = WorkflowRecord::for_goal(TaskId::new(), goal.trim());
            return Ok(GoalReport::from_result(
                id.clone(),
                AgentLoopResult::completed(message, record, 0),
            ));
        }

        let reference = match self.retrieval.recall(goal).await {
            Ok(reference) => reference,
            Err(AgentError::InvalidRequest(_)) => None,
            Err(err) => {
                warn!(session = %id, error = %err, "retrieval failed; running without guidance");
                None
            }
        };
        let static_context = match self.retrieval.load_static(goal, reference.as_ref()).await {
            Ok(static_context) => static_context,
            Err(err) => {
                warn!(session = %id, error = %err, "static data lookup failed");
                StaticContext::default()
            }
        };

        let controller = AgentLoopController::new(
            self.loop_config.clone(),
            Arc::clone(&self.provider),
            Arc::clone(&handle.actuator),
        )
        .with_observer(Arc::clone(&self.observer));
        let request = GoalRequest::new(goal, &static_context)
            .start_at(start_location)
            .with_reference(reference.as_ref());
        let result = controller.run(request, &mut context, &stop).await;

        let deviation = validate(&GuardrailContext::from_reference(
            reference.as_ref(),
            &result.record,
            result.static_context_loaded,
            result.static_context_referenced,
        ));
        if deviation.drift_detected {
            warn!(
                session = %id,
                pollution = deviation.context_pollution,
                "drift detected against reference"
            );
        }

        let indexed_as = self
            .index_run(&result.record, result.status.task_status(), goal)
            .await;
        if result.environment_closed {
            self.retire(id, &handle).await;
        }

        let mut report = GoalReport::from_result(id.clone(), result);
        report.reference_id = reference.as_ref().map(|r| r.id.clone());
        report.matched_by = reference.and_then(|r| r.matched_by);
        report.deviation = Some(deviation);
        report.indexed_as = indexed_as;
        Ok(report)
    }

    /// Drop a session whose environment closed under it.
    async fn retire(&self, id: &SessionId, handle: &SessionHandle) {
        if self.sessions.remove(id).is_none() {
            return;
        }
        warn!(session = %id, "environment closed; ending session");
        if let Err(err) = handle.actuator.shutdown().await {
            warn!(session = %id, error = %err, "actuator shutdown failed");
        }
    }

    async fn index_run(
        &self,
        record: &WorkflowRecord,
        status: TaskStatus,
        goal: &str,
    ) -> Option<String> {
        let indexer = self.indexer.as_ref()?;
        if record.is_empty() {
            return None;
        }
        match indexer
            .index(record, status, &[goal.trim().to_string()], None)
            .await
        {
            Ok(indexed) => Some(indexed.version_id),
            Err(err) => {
                warn!(task = %record.id, error = %err, "failed to index run");
                None
            }
        }
    }

    /// Store a note in the session; waits for a running goal to finish.
    pub async fn remember(&self, id: &SessionId, key: &str, value: &str) -> Result<(), AgentError> {
        let handle = self.handle(id)?;
        handle.context.lock().await.remember(key, value);
        Ok(())
    }

    /// Ask the running goal to stop after its current turn.
    ///
    /// Returns `false` when the session had no goal running.
    pub fn stop(&self, id: &SessionId) -> Result<bool, AgentError> {
        let handle = self.handle(id)?;
        let token = handle.stop.lock();
        let running = handle.context.try_lock().is_err();
        token.cancel();
        drop(token);
        if running {
            info!(session = %id, "stop requested");
        }
        Ok(running)
    }

    /// Replace the session memory with a fresh context under a new id.
    pub async fn reset(&self, id: &SessionId) -> Result<SessionId, AgentError> {
        let handle = self.handle(id)?;
        let new_id = {
            let mut context = handle
                .context
                .try_lock()
                .map_err(|_| AgentError::SessionBusy(id.to_string()))?;
            context.reset();
            context.session_id().clone()
        };
        self.sessions.remove(id);
        self.sessions.insert(new_id.clone(), handle);
        info!(old = %id, new = %new_id, "session reset");
        Ok(new_id)
    }

    pub async fn task_history(&self, id: &SessionId) -> Result<Vec<TaskSummary>, AgentError> {
        let handle = self.handle(id)?;
        let context = handle.context.lock().await;
        Ok(context.task_history().to_vec())
    }

    /// Stop any running goal, then release the session's actuator.
    pub async fn end(&self, id: &SessionId) -> Result<(), AgentError> {
        let (_, handle) = self
            .sessions
            .remove(id)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
        handle.stop.lock().cancel();
        let _idle = handle.context.lock().await;
        handle.actuator.shutdown().await?;
        info!(session = %id, "session ended");
        Ok(())
    }
}
