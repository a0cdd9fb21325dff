use std::sync::Arc;

use chrono::Utc;
use memory_center::{
    Embedder, SharedRecordStore, EXECUTION_STEPS_NAMESPACE, STATIC_DATA_NAMESPACE,
    SUCCESS_CASES_NAMESPACE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;
use waymark_core_types::{TaskStatus, WorkflowRecord};

use super::reference::encode_v2;
use crate::errors::AgentError;

/// Category used when a record carries no tags.
pub const DEFAULT_CATEGORY: &str = "steps";

/// Where one indexed record ended up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedWorkflow {
    pub version_id: String,
    pub group_id: String,
    pub namespaces: Vec<String>,
}

/// Stable id shared by every saved version of the same workflow.
pub fn step_group_id(category: &str, description: &str) -> String {
    let digest = Sha256::digest(format!("{category}:{}", description.trim()).as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Category of a record: its first tag, or [`DEFAULT_CATEGORY`].
pub fn record_category(record: &WorkflowRecord) -> &str {
    record
        .tags
        .iter()
        .next()
        .map(String::as_str)
        .unwrap_or(DEFAULT_CATEGORY)
}

/// Writes finished records back into the store so later goals can recall them.
#[derive(Clone)]
pub struct WorkflowIndexer {
    store: SharedRecordStore,
    embedder: Arc<dyn Embedder>,
}

impl WorkflowIndexer {
    pub fn new(store: SharedRecordStore, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub async fn index(
        &self,
        record: &WorkflowRecord,
        status: TaskStatus,
        user_prompts: &[String],
        execution_summary: Option<&str>,
    ) -> Result<IndexedWorkflow, AgentError> {
        let category = record_category(record);
        let group_id = step_group_id(category, &record.description);
        let version_id = format!("{group_id}_{}", Utc::now().format("%Y%m%d%H%M%S%3f"));
        let vector = self
            .embedder
            .embed(&format!("{}: {}", record.name, record.description));

        let mut metadata: Map<String, Value> = encode_v2(record, user_prompts);
        metadata.insert("step_group_id".into(), json!(group_id));
        metadata.insert("goal_description".into(), json!(record.description));
        metadata.insert("workflow_name".into(), json!(record.name));
        metadata.insert("category".into(), json!(category));
        metadata.insert("status".into(), json!(status.as_str()));
        metadata.insert("indexed_at".into(), json!(Utc::now().to_rfc3339()));
        if let Some(summary) = execution_summary.filter(|s| !s.trim().is_empty()) {
            metadata.insert("execution_summary".into(), json!(summary));
        }

        let mut namespaces = vec![EXECUTION_STEPS_NAMESPACE.to_string()];
        if status == TaskStatus::Completed {
            namespaces.push(SUCCESS_CASES_NAMESPACE.to_string());
        }
        for namespace in &namespaces {
            self.store
                .upsert(&version_id, vector.clone(), metadata.clone(), namespace)
                .await?;
        }
        info!(
            version = %version_id,
            group = %group_id,
            steps = record.len(),
            "workflow indexed"
        );
        Ok(IndexedWorkflow {
            version_id,
            group_id,
            namespaces,
        })
    }

    /// Add one static reference entry (`data` metadata key).
    pub async fn index_static(&self, id: &str, data: &str) -> Result<String, AgentError> {
        let mut metadata = Map::new();
        metadata.insert("data".into(), json!(data));
        let id = self
            .store
            .upsert(id, self.embedder.embed(data), metadata, STATIC_DATA_NAMESPACE)
            .await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_is_stable_and_short() {
        let a = step_group_id("steps", "create supplier");
        let b = step_group_id("steps", " create supplier ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, step_group_id("billing", "create supplier"));
    }

    #[test]
    fn category_defaults_to_steps() {
        let mut record = WorkflowRecord::for_goal(Default::default(), "login");
        assert_eq!(record_category(&record), DEFAULT_CATEGORY);
        record.add_tag("auth");
        assert_eq!(record_category(&record), "auth");
    }
}
