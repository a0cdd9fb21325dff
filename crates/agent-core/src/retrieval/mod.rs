//! Retrieval engine: recall the best prior execution for a new goal.
//!
//! ```text
//! goal ──embed──► store.query(top 20) ──► similarity tiers ──► keyword fallback
//!                                                 │
//!                                    best member per step group ──► ReferenceEntry
//! ```

pub mod indexer;
pub mod keywords;
pub mod matcher;
pub mod reference;
pub mod static_context;

use std::sync::Arc;

use memory_center::{Embedder, SharedRecordStore, EXECUTION_STEPS_NAMESPACE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AgentError;

pub use indexer::{record_category, step_group_id, IndexedWorkflow, WorkflowIndexer};
pub use keywords::{extract_keywords, keyword_hits};
pub use matcher::{rank_candidates, MatchTier, MatcherConfig, RankedCandidate, TieredMatcher};
pub use reference::{
    encode_v2, ReferenceEntry, ReferenceFormat, ReferenceStep, StoredReference, FORMAT_JSON_V2,
    STORED_REASONING_LIMIT,
};
pub use static_context::{
    needs_static_lookup, StaticContext, StaticContextConfig, StaticContextLoader,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Namespace searched for references.
    pub namespace: String,
    pub matcher: MatcherConfig,
    pub static_context: StaticContextConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            namespace: EXECUTION_STEPS_NAMESPACE.to_string(),
            matcher: MatcherConfig::default(),
            static_context: StaticContextConfig::default(),
        }
    }
}

/// Explicit handle passed to whoever runs goals; holds no per-session state.
#[derive(Clone)]
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    matcher: TieredMatcher,
    static_loader: StaticContextLoader,
    namespace: String,
}

impl RetrievalEngine {
    pub fn new(
        store: SharedRecordStore,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            matcher: TieredMatcher::new(store.clone(), config.matcher),
            static_loader: StaticContextLoader::new(store, config.static_context),
            namespace: config.namespace,
            embedder,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Reference entry for `goal`, or `None` to run without guidance.
    pub async fn recall(&self, goal: &str) -> Result<Option<ReferenceEntry>, AgentError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(AgentError::invalid_request("goal must not be empty"));
        }
        let embedding = self.embedder.embed(goal);
        let keywords = extract_keywords(goal);
        debug!(?keywords, namespace = %self.namespace, "recalling reference");
        self.matcher
            .best_match(&embedding, &keywords, &self.namespace)
            .await
    }

    /// Static data for `goal`, loaded only when the goal or its reference
    /// asks for it.
    pub async fn load_static(
        &self,
        goal: &str,
        reference: Option<&ReferenceEntry>,
    ) -> Result<StaticContext, AgentError> {
        if !needs_static_lookup(goal, reference, self.static_loader.config()) {
            return Ok(StaticContext::default());
        }
        self.static_loader.load(&self.embedder.embed(goal)).await
    }
}
