//! Configuration for the execution loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the turn-bounded execution loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Model turns before the loop stops with a "reached max turns" result.
    /// Default: 20
    pub max_turns: u32,

    /// Attempts per model call, including the first.
    /// Default: 3
    pub model_retry_attempts: u32,

    /// Backoff before retry `n` is `base * 2^(n-1)`.
    /// Default: 1000 (1s, 2s, 4s)
    pub retry_base_delay_ms: u64,

    /// Turn pairs kept in the sliding window after the first context turn.
    /// Default: 10
    pub max_context_turns: usize,

    /// Task-history summaries shown in the composite context.
    /// Default: 5
    pub recent_task_limit: usize,

    /// Steps of a reference shown when it has no execution summary.
    /// Default: 10
    pub reference_step_limit: usize,

    /// Characters of step reasoning shown per reference step.
    /// Default: 100
    pub reasoning_excerpt_chars: usize,

    /// Characters of a legacy execution log shown in the context.
    /// Default: 4000
    pub legacy_log_chars: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            model_retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            max_context_turns: 10,
            recent_task_limit: 5,
            reference_step_limit: 10,
            reasoning_excerpt_chars: 100,
            legacy_log_chars: 4_000,
        }
    }
}

impl AgentLoopConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a minimal config for testing.
    pub fn minimal() -> Self {
        Self {
            max_turns: 5,
            model_retry_attempts: 1,
            retry_base_delay_ms: 10,
            max_context_turns: 3,
            recent_task_limit: 2,
            reference_step_limit: 3,
            reasoning_excerpt_chars: 60,
            legacy_log_chars: 500,
        }
    }

    /// Create a config for short interactive goals.
    pub fn fast() -> Self {
        Self {
            max_turns: 10,
            retry_base_delay_ms: 250,
            max_context_turns: 5,
            ..Self::default()
        }
    }

    /// Builder: set max turns.
    pub fn max_turns(mut self, turns: u32) -> Self {
        self.max_turns = turns;
        self
    }

    /// Builder: set model retry attempts.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.model_retry_attempts = attempts;
        self
    }

    /// Builder: set the backoff base.
    pub fn retry_base_delay(mut self, ms: u64) -> Self {
        self.retry_base_delay_ms = ms;
        self
    }

    /// Builder: set the sliding window size.
    pub fn context_turns(mut self, turns: usize) -> Self {
        self.max_context_turns = turns;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}
