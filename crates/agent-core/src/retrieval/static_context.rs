//! Supplementary reference data (company ids, lookup tables) loaded lazily
//! for goals that look like they need it.

use memory_center::{SharedRecordStore, STATIC_DATA_NAMESPACE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::reference::{truncate_chars, ReferenceEntry};
use crate::errors::AgentError;

/// Words of a loaded entry checked against the run's reasoning.
const REFERENCE_PROBE_WORDS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StaticContextConfig {
    pub namespace: String,
    pub threshold: f32,
    pub top_k: usize,
    /// Each entry is cut to this many characters before injection.
    pub char_limit: usize,
    /// Goal phrases that trigger a lookup.
    pub trigger_terms: Vec<String>,
}

impl Default for StaticContextConfig {
    fn default() -> Self {
        Self {
            namespace: STATIC_DATA_NAMESPACE.to_string(),
            threshold: 0.25,
            top_k: 5,
            char_limit: 500,
            trigger_terms: [
                "company id",
                "company_id",
                "companyid",
                "get the id",
                "find the id",
                "lookup",
                "look up",
                "reference data",
                "static data",
            ]
            .iter()
            .map(|term| term.to_string())
            .collect(),
        }
    }
}

/// Whether a goal (or its reference) calls for static data.
pub fn needs_static_lookup(
    goal: &str,
    reference: Option<&ReferenceEntry>,
    config: &StaticContextConfig,
) -> bool {
    let goal = goal.to_lowercase();
    if config
        .trigger_terms
        .iter()
        .any(|term| goal.contains(&term.to_lowercase()))
    {
        return true;
    }
    reference.is_some_and(|entry| {
        let text = entry.searchable_text().to_lowercase();
        text.contains("static") || (text.contains("company") && text.contains(" id"))
    })
}

/// Static entries loaded for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StaticContext {
    pub entries: Vec<String>,
}

impl StaticContext {
    pub fn is_loaded(&self) -> bool {
        !self.entries.is_empty()
    }

    /// True when any of the first few words of a loaded entry shows up in the
    /// run's reasoning. Words shorter than three characters are ignored.
    pub fn referenced_by<'a>(&self, reasonings: impl IntoIterator<Item = &'a str>) -> bool {
        if !self.is_loaded() {
            return false;
        }
        let reasoning = reasonings
            .into_iter()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if reasoning.is_empty() {
            return false;
        }
        self.entries.iter().any(|entry| {
            entry
                .split_whitespace()
                .take(REFERENCE_PROBE_WORDS)
                .map(|word| {
                    word.trim_matches(|c: char| !c.is_alphanumeric())
                        .to_lowercase()
                })
                .filter(|word| word.chars().count() >= 3)
                .any(|word| reasoning.contains(&word))
        })
    }
}

#[derive(Clone)]
pub struct StaticContextLoader {
    store: SharedRecordStore,
    config: StaticContextConfig,
}

impl StaticContextLoader {
    pub fn new(store: SharedRecordStore, config: StaticContextConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &StaticContextConfig {
        &self.config
    }

    /// Query the static namespace; an empty context when nothing qualifies.
    pub async fn load(&self, goal_embedding: &[f32]) -> Result<StaticContext, AgentError> {
        let hits = self
            .store
            .query(goal_embedding, self.config.top_k, &self.config.namespace, None)
            .await?;
        let entries: Vec<String> = hits
            .iter()
            .filter(|hit| hit.score >= self.config.threshold)
            .filter_map(|hit| {
                ["data", "text", "content"]
                    .iter()
                    .find_map(|key| hit.metadata.get(*key).and_then(entry_text))
            })
            .map(|text| truncate_chars(&text, self.config.char_limit))
            .collect();
        if entries.is_empty() {
            debug!(namespace = %self.config.namespace, "no static data above threshold");
        } else {
            info!(count = entries.len(), "static reference data loaded");
        }
        Ok(StaticContext { entries })
    }
}

fn entry_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
