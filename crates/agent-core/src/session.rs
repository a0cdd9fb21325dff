//! Per-session memory shared by every goal executed in one session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use waymark_core_types::{SessionId, TaskStatus};

static REMEMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:remember|clipboard|store):\s*(.+)$").expect("remember command regex")
});
static NOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^note:\s*(\w+)\s*=\s*(.+)$").expect("note command regex"));

/// Input that edits session memory instead of starting a goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// `remember: VALUE` sets the scratch value.
    Remember(String),
    /// `note: KEY=VALUE` stores a note.
    Note { key: String, value: String },
}

impl SessionCommand {
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some(caps) = NOTE_RE.captures(input) {
            return Some(Self::Note {
                key: caps[1].trim().to_string(),
                value: caps[2].trim().to_string(),
            });
        }
        REMEMBER_RE
            .captures(input)
            .map(|caps| Self::Remember(caps[1].trim().to_string()))
            .filter(|cmd| !matches!(cmd, Self::Remember(value) if value.is_empty()))
    }

    /// Apply to `ctx`; returns the acknowledgement shown to the user.
    pub fn apply(self, ctx: &mut SessionContext) -> String {
        match self {
            Self::Remember(value) => {
                let message = format!("Remembered: {value}");
                ctx.set_scratch(value);
                message
            }
            Self::Note { key, value } => {
                let message = format!("Noted: {key} = {value}");
                ctx.remember(key, value);
                message
            }
        }
    }
}

/// Outcome of one goal, kept in the session task history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub goal: String,
    pub status: TaskStatus,
    pub result: String,
    pub steps_count: usize,
    pub final_location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Runtime state that outlives a single goal. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    session_id: SessionId,
    scratch: Option<String>,
    scratch_history: Vec<String>,
    task_history: Vec<TaskSummary>,
    current_location: Option<String>,
    instructions: Vec<String>,
    notes: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self::with_id(SessionId::new())
    }

    pub fn with_id(session_id: SessionId) -> Self {
        Self {
            session_id,
            scratch: None,
            scratch_history: Vec::new(),
            task_history: Vec::new(),
            current_location: None,
            instructions: Vec::new(),
            notes: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Replace this context with a fresh one under a new id.
    ///
    /// Returns the discarded context.
    pub fn reset(&mut self) -> SessionContext {
        std::mem::replace(self, SessionContext::new())
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Set the clipboard value; it also becomes the newest history entry.
    pub fn set_scratch(&mut self, value: impl Into<String>) {
        let value = value.into();
        self.scratch_history.push(value.clone());
        self.scratch = Some(value);
    }

    pub fn scratch(&self) -> Option<&str> {
        self.scratch.as_deref()
    }

    pub fn scratch_history(&self) -> &[String] {
        &self.scratch_history
    }

    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.notes.insert(key.into(), value.into());
    }

    /// Store a free-form `key: value` (or `key=value`) note.
    ///
    /// Text without a separator is stored under a generated `note_<n>` key.
    pub fn remember_text(&mut self, text: &str) -> String {
        let text = text.trim();
        let split = text
            .split_once(':')
            .or_else(|| text.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, value)| !key.is_empty() && !value.is_empty());
        let (key, value) = match split {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (format!("note_{}", self.notes.len() + 1), text.to_string()),
        };
        self.notes.insert(key.clone(), value);
        key
    }

    pub fn notes(&self) -> &BTreeMap<String, String> {
        &self.notes
    }

    pub fn record_instruction(&mut self, instruction: impl Into<String>) {
        self.instructions.push(instruction.into());
    }

    pub fn instructions(&self) -> &[String] {
        &self.instructions
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        let location = location.into();
        if !location.is_empty() {
            self.current_location = Some(location);
        }
    }

    pub fn current_location(&self) -> Option<&str> {
        self.current_location.as_deref()
    }

    pub fn record_task(&mut self, summary: TaskSummary) {
        self.task_history.push(summary);
    }

    pub fn task_history(&self) -> &[TaskSummary] {
        &self.task_history
    }

    /// Up to `limit` most recent task summaries, oldest first.
    pub fn recent_tasks(&self, limit: usize) -> &[TaskSummary] {
        let start = self.task_history.len().saturating_sub(limit);
        &self.task_history[start..]
    }
}
