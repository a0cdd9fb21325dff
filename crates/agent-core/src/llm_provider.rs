use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::AgentError;
use crate::model::{ConversationTurn, ModelResponse, ToolSchema};

/// Abstraction over tool-calling model services so multiple vendors can plug
/// into the execution loop.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Produce the next response for the accumulated conversation.
    ///
    /// Failures that may succeed on retry should be reported as
    /// [`AgentError::ModelTransient`]; anything else aborts the turn at once.
    async fn generate(
        &self,
        history: &[ConversationTurn],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, AgentError>;

    fn name(&self) -> &str {
        "llm"
    }
}

/// Scripted reply for [`MockLlmProvider`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(ModelResponse),
    /// Fails the call with a transient error.
    Fail(String),
    /// Returns a response with neither text nor tool calls.
    Empty,
}

/// Deterministic provider used for tests and offline development.
///
/// Replies are served from a queue. Once it runs dry the provider either
/// repeats a configured response or reports completion in plain text.
#[derive(Debug, Default)]
pub struct MockLlmProvider {
    script: Mutex<VecDeque<MockReply>>,
    repeat: Option<ModelResponse>,
    histories: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Serve `response` forever once the script is exhausted.
    pub fn repeating(mut self, response: ModelResponse) -> Self {
        self.repeat = Some(response);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    /// Number of `generate` calls received.
    pub fn calls(&self) -> usize {
        self.histories.lock().len()
    }

    /// Conversation passed to each `generate` call, in call order.
    pub fn histories(&self) -> Vec<Vec<ConversationTurn>> {
        self.histories.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate(
        &self,
        history: &[ConversationTurn],
        _tools: &[ToolSchema],
    ) -> Result<ModelResponse, AgentError> {
        if history.is_empty() {
            return Err(AgentError::invalid_request(
                "conversation history must not be empty",
            ));
        }
        self.histories.lock().push(history.to_vec());

        let next = self.script.lock().pop_front();
        match next {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(message)) => Err(AgentError::transient(message)),
            Some(MockReply::Empty) => Ok(ModelResponse::default()),
            None => Ok(self
                .repeat
                .clone()
                .unwrap_or_else(|| ModelResponse::text("Mock task complete"))),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
