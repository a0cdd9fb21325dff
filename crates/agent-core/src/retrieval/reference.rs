//! Stored reference records and their normalized projection.
//!
//! Three metadata schemas exist in stores written over time. Each decodes
//! into [`StoredReference`] and is normalized at once into a
//! [`ReferenceEntry`], which carries no pixel coordinates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use memory_center::ScoredRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use waymark_core_types::WorkflowRecord;

use super::matcher::MatchTier;
use crate::errors::AgentError;

pub const FORMAT_JSON_V2: &str = "json_v2";
/// Reasoning is cut to this many characters when a record is encoded.
pub const STORED_REASONING_LIMIT: usize = 300;

static STEP_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--- STEP (\d+) ---").expect("step marker regex"));
static ACTION_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"- (\w+): (\d+) time").expect("action count regex"));
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s,\]\)"']+"#).expect("url regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceFormat {
    JsonV2,
    LegacyText,
    LegacyNested,
}

impl ReferenceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonV2 => "json_v2",
            Self::LegacyText => "legacy_text",
            Self::LegacyNested => "legacy_nested",
        }
    }
}

/// Coordinate-free summary of one stored step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceStep {
    pub step: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// A retrieved prior execution, used as guidance and never replayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceEntry {
    pub id: String,
    pub score: f32,
    /// Records sharing this id are versions of the same workflow.
    pub group_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub urls_visited: Vec<String>,
    #[serde(default)]
    pub actions: BTreeMap<String, u32>,
    #[serde(default)]
    pub steps: Vec<ReferenceStep>,
    #[serde(default)]
    pub user_prompts: Vec<String>,
    #[serde(default)]
    pub execution_summary: Option<String>,
    /// Human-readable execution log of legacy text records.
    #[serde(default)]
    pub execution_log: Option<String>,
    /// Step count stated by the record itself when it has no step list.
    #[serde(default)]
    pub declared_step_count: Option<u32>,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
    pub format: ReferenceFormat,
    #[serde(default)]
    pub matched_by: Option<MatchTier>,
}

impl ReferenceEntry {
    /// Decode a store hit, whatever schema version wrote it.
    pub fn from_scored(hit: &ScoredRecord) -> Result<Self, AgentError> {
        let stored = StoredReference::detect(&hit.metadata)?;
        Ok(stored.normalize(hit))
    }

    pub fn with_tier(mut self, tier: MatchTier) -> Self {
        self.matched_by = Some(tier);
        self
    }

    /// Number of steps the reference run took, when known and non-zero.
    pub fn expected_step_count(&self) -> Option<usize> {
        let count = match self.format {
            ReferenceFormat::LegacyText => self.declared_step_count.map(|n| n as usize),
            ReferenceFormat::JsonV2 | ReferenceFormat::LegacyNested => {
                if self.steps.is_empty() {
                    self.declared_step_count.map(|n| n as usize)
                } else {
                    Some(self.steps.len())
                }
            }
        };
        count.filter(|n| *n > 0)
    }

    pub fn final_location(&self) -> Option<&str> {
        self.urls_visited
            .last()
            .map(String::as_str)
            .or_else(|| self.steps.iter().rev().find_map(|step| step.url.as_deref()))
    }

    /// Free text of the entry (names, prompts, summary, log, reasoning).
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.extend(self.name.as_deref());
        parts.extend(self.description.as_deref());
        parts.extend(self.user_prompts.iter().map(String::as_str));
        parts.extend(self.execution_summary.as_deref());
        parts.extend(self.execution_log.as_deref());
        parts.extend(self.steps.iter().filter_map(|step| step.reasoning.as_deref()));
        parts.join("\n")
    }
}

/// Metadata decoded per schema version, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredReference {
    JsonV2(JsonV2Reference),
    LegacyText(LegacyTextReference),
    LegacyNested(LegacyNestedReference),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonV2Reference {
    pub urls_visited: Vec<String>,
    pub actions: BTreeMap<String, u32>,
    pub steps: Vec<ReferenceStep>,
    pub user_prompts: Vec<String>,
    pub execution_summary: Option<String>,
}

/// Pre-v2 records: human-readable text blobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyTextReference {
    pub urls_visited: Option<String>,
    pub actions_performed: Option<String>,
    pub system_logs: Option<String>,
    pub user_prompts: Option<String>,
}

/// Records that embed the whole saved workflow as JSON in `step_details`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyNestedReference {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub step_count: Option<u32>,
    #[serde(default)]
    pub steps: Vec<LegacyNestedStep>,
    #[serde(default)]
    pub execution_summary: Option<String>,
}

/// Only the coordinate-free parts of a legacy step are read.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyNestedStep {
    #[serde(default)]
    pub step_number: Option<u32>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl StoredReference {
    pub fn detect(metadata: &Map<String, Value>) -> Result<Self, AgentError> {
        let format = metadata.get("format").and_then(Value::as_str);
        if format == Some(FORMAT_JSON_V2) {
            return Ok(Self::JsonV2(JsonV2Reference {
                urls_visited: json_field(metadata, "urls_visited")?.unwrap_or_default(),
                actions: json_field(metadata, "actions")?.unwrap_or_default(),
                steps: json_field(metadata, "steps")?.unwrap_or_default(),
                user_prompts: json_field(metadata, "user_prompts")?.unwrap_or_default(),
                execution_summary: text_field(metadata, "execution_summary"),
            }));
        }
        if metadata.contains_key("step_details") {
            let nested: LegacyNestedReference = json_field(metadata, "step_details")?
                .ok_or_else(|| AgentError::reference_decode("step_details is empty"))?;
            return Ok(Self::LegacyNested(nested));
        }
        let legacy = LegacyTextReference {
            urls_visited: text_field(metadata, "urls_visited"),
            actions_performed: text_field(metadata, "actions_performed"),
            system_logs: text_field(metadata, "system_logs"),
            user_prompts: text_field(metadata, "user_prompts"),
        };
        if format == Some("new") || legacy.system_logs.is_some() || legacy.actions_performed.is_some()
        {
            return Ok(Self::LegacyText(legacy));
        }
        Err(AgentError::reference_decode(format!(
            "unrecognized reference format {:?}",
            format.unwrap_or("<missing>")
        )))
    }

    pub fn format(&self) -> ReferenceFormat {
        match self {
            Self::JsonV2(_) => ReferenceFormat::JsonV2,
            Self::LegacyText(_) => ReferenceFormat::LegacyText,
            Self::LegacyNested(_) => ReferenceFormat::LegacyNested,
        }
    }

    pub fn normalize(self, hit: &ScoredRecord) -> ReferenceEntry {
        let metadata = &hit.metadata;
        let mut entry = ReferenceEntry {
            id: hit.id.clone(),
            score: hit.score,
            group_id: text_field(metadata, "step_group_id").unwrap_or_else(|| hit.id.clone()),
            name: text_field(metadata, "workflow_name"),
            description: text_field(metadata, "goal_description"),
            urls_visited: Vec::new(),
            actions: BTreeMap::new(),
            steps: Vec::new(),
            user_prompts: Vec::new(),
            execution_summary: text_field(metadata, "execution_summary"),
            execution_log: None,
            declared_step_count: None,
            indexed_at: indexed_at(metadata),
            format: self.format(),
            matched_by: None,
        };

        match self {
            Self::JsonV2(v2) => {
                entry.urls_visited = v2.urls_visited;
                entry.actions = v2.actions;
                entry.steps = v2
                    .steps
                    .into_iter()
                    .map(|step| ReferenceStep {
                        reasoning: step
                            .reasoning
                            .map(|text| truncate_chars(&text, STORED_REASONING_LIMIT)),
                        ..step
                    })
                    .collect();
                entry.user_prompts = v2.user_prompts;
                entry.execution_summary = v2.execution_summary.or(entry.execution_summary);
            }
            Self::LegacyText(legacy) => {
                if let Some(urls) = legacy.urls_visited.as_deref() {
                    entry.urls_visited = dedup(URL_RE.find_iter(urls).map(|m| m.as_str()));
                }
                if let Some(actions) = legacy.actions_performed.as_deref() {
                    for caps in ACTION_COUNT_RE.captures_iter(actions) {
                        if let Ok(count) = caps[2].parse::<u32>() {
                            entry.actions.insert(caps[1].to_string(), count);
                        }
                    }
                }
                if let Some(logs) = legacy.system_logs.as_deref() {
                    entry.declared_step_count = STEP_MARKER_RE
                        .captures_iter(logs)
                        .filter_map(|caps| caps[1].parse::<u32>().ok())
                        .max();
                }
                entry.execution_log = legacy.system_logs;
                entry.user_prompts = legacy
                    .user_prompts
                    .into_iter()
                    .filter(|text| !text.trim().is_empty())
                    .collect();
            }
            Self::LegacyNested(nested) => {
                entry.name = nested.name.or(entry.name);
                entry.description = nested.description.or(entry.description);
                entry.declared_step_count = nested.step_count;
                entry.execution_summary = nested.execution_summary.or(entry.execution_summary);
                for (index, step) in nested.steps.into_iter().enumerate() {
                    if let Some(action) = step.action_type.filter(|a| !a.is_empty()) {
                        *entry.actions.entry(action).or_insert(0) += 1;
                    }
                    entry.steps.push(ReferenceStep {
                        step: step.step_number.unwrap_or(index as u32 + 1),
                        url: step.url,
                        reasoning: step
                            .reasoning
                            .map(|text| truncate_chars(&text, STORED_REASONING_LIMIT)),
                    });
                }
                entry.urls_visited =
                    dedup(entry.steps.iter().filter_map(|step| step.url.as_deref()));
            }
        }
        entry
    }
}

/// Schema v2 metadata for a finished record.
pub fn encode_v2(record: &WorkflowRecord, user_prompts: &[String]) -> Map<String, Value> {
    let steps: Vec<ReferenceStep> = record
        .steps()
        .iter()
        .map(|step| ReferenceStep {
            step: step.step_number,
            url: step.url.clone(),
            reasoning: step
                .reasoning
                .as_deref()
                .map(|text| truncate_chars(text, STORED_REASONING_LIMIT)),
        })
        .collect();
    let mut metadata = Map::new();
    metadata.insert("urls_visited".into(), json!(record.urls_visited()));
    metadata.insert("actions".into(), json!(record.action_histogram()));
    metadata.insert("steps".into(), json!(steps));
    metadata.insert("user_prompts".into(), json!(user_prompts));
    metadata.insert("format".into(), json!(FORMAT_JSON_V2));
    metadata
}

/// Read a field that may hold native JSON or a JSON-encoded string.
fn json_field<T: DeserializeOwned>(
    metadata: &Map<String, Value>,
    key: &str,
) -> Result<Option<T>, AgentError> {
    let decoded = match metadata.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(raw)) if raw.trim().is_empty() => return Ok(None),
        Some(Value::String(raw)) => serde_json::from_str(raw),
        Some(value) => serde_json::from_value(value.clone()),
    };
    decoded
        .map(Some)
        .map_err(|err| AgentError::reference_decode(format!("field '{key}': {err}")))
}

fn text_field(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn indexed_at(metadata: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let raw = metadata.get("indexed_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })
        .ok()
}

fn dedup<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}

/// First `limit` characters of `text`.
pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
