use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::action::ActionKind;
use crate::TaskId;

/// One executed action inside a [`WorkflowRecord`].
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub step_number: u32,
    /// Wire name of the action. Unknown names are kept verbatim so the
    /// record shows what the model actually asked for.
    pub action_type: String,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub args: Map<String, Value>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub reasoning: Option<String>,
    #[cfg_attr(feature = "serde-full", serde(default, alias = "screenshot_path"))]
    pub observation_path: Option<String>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub warning: Option<String>,
}

impl Step {
    pub fn new(action_type: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            step_number: 0,
            action_type: action_type.into(),
            args,
            url: None,
            timestamp: Utc::now(),
            reasoning: None,
            observation_path: None,
            warning: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_warning(mut self, warning: Option<String>) -> Self {
        self.warning = warning;
        self
    }

    pub fn with_observation_path(mut self, path: Option<String>) -> Self {
        self.observation_path = path;
        self
    }

    pub fn kind(&self) -> Option<ActionKind> {
        self.action_type.parse().ok()
    }
}

/// Ordered trace of the steps one goal execution produced.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowRecord {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub tags: BTreeSet<String>,
}

impl WorkflowRecord {
    pub fn new(id: TaskId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
            created_at: Utc::now(),
            tags: BTreeSet::new(),
        }
    }

    /// Record for a goal execution, named after the task id prefix.
    pub fn for_goal(id: TaskId, goal: &str) -> Self {
        let name = format!("Task {}", id.short());
        Self::new(id, name, goal)
    }

    /// Append a step, assigning the next step number.
    pub fn push_step(&mut self, mut step: Step) -> &Step {
        step.step_number = self.steps.len() as u32 + 1;
        self.steps.push(step);
        &self.steps[self.steps.len() - 1]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    /// Rewrites step numbers to `1..=n` in stored order.
    ///
    /// Record files read back from disk go through this when their numbering
    /// has gaps, before they are compared or re-indexed.
    pub fn renumber(&mut self) {
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.step_number = index as u32 + 1;
        }
    }

    pub fn is_sequentially_numbered(&self) -> bool {
        self.steps
            .iter()
            .enumerate()
            .all(|(index, step)| step.step_number == index as u32 + 1)
    }

    /// Count of each action type in the record.
    pub fn action_histogram(&self) -> BTreeMap<String, u32> {
        let mut histogram = BTreeMap::new();
        for step in &self.steps {
            *histogram.entry(step.action_type.clone()).or_insert(0) += 1;
        }
        histogram
    }

    /// Visited URLs in first-seen order.
    pub fn urls_visited(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut urls = Vec::new();
        for url in self.steps.iter().filter_map(|step| step.url.as_deref()) {
            if !url.is_empty() && seen.insert(url.to_string()) {
                urls.push(url.to_string());
            }
        }
        urls
    }

    pub fn final_url(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find_map(|step| step.url.as_deref().filter(|url| !url.is_empty()))
    }

    pub fn reasonings(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter_map(|step| step.reasoning.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(actions: &[(&str, Option<&str>)]) -> WorkflowRecord {
        let mut record = WorkflowRecord::for_goal(TaskId::new(), "test goal");
        for (action, url) in actions {
            let mut step = Step::new(*action, Map::new());
            if let Some(url) = url {
                step = step.with_url(*url);
            }
            record.push_step(step);
        }
        record
    }

    #[test]
    fn push_step_numbers_from_one() {
        let record = record_with(&[("navigate", None), ("click_at", None), ("click_at", None)]);
        let numbers: Vec<u32> = record.steps().iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(record.is_sequentially_numbered());
    }

    #[test]
    fn push_step_overrides_caller_number() {
        let mut record = WorkflowRecord::for_goal(TaskId::new(), "goal");
        let mut step = Step::new("navigate", Map::new());
        step.step_number = 42;
        assert_eq!(record.push_step(step).step_number, 1);
    }

    #[test]
    fn histogram_and_urls() {
        let record = record_with(&[
            ("navigate", Some("https://a.test/login")),
            ("click_at", Some("https://a.test/login")),
            ("click_at", Some("https://a.test/home?x=1")),
            ("wait_5_seconds", None),
        ]);
        let histogram = record.action_histogram();
        assert_eq!(histogram.get("click_at"), Some(&2));
        assert_eq!(histogram.get("navigate"), Some(&1));
        assert_eq!(
            record.urls_visited(),
            vec!["https://a.test/login", "https://a.test/home?x=1"]
        );
        assert_eq!(record.final_url(), Some("https://a.test/home?x=1"));
    }

    #[test]
    fn record_name_uses_short_id() {
        let record = WorkflowRecord::for_goal(TaskId("abcdef0123456789".into()), "login");
        assert_eq!(record.name, "Task abcdef01");
        assert_eq!(record.description, "login");
        assert!(record.is_empty());
    }
}
