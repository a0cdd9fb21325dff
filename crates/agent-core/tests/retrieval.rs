use std::collections::HashMap;
use std::sync::Arc;

use agent_core::retrieval::{
    encode_v2, MatchTier, RetrievalConfig, RetrievalEngine, WorkflowIndexer,
};
use memory_center::{
    Embedder, InMemoryRecordStore, RecordStore, EXECUTION_STEPS_NAMESPACE,
    SUCCESS_CASES_NAMESPACE,
};
use serde_json::{json, Map, Value};
use waymark_core_types::{Step, TaskId, TaskStatus, WorkflowRecord};

/// Embedder with hand-picked vectors; unknown text is orthogonal to the
/// goal axis.
struct ScriptedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl ScriptedEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
        }
    }
}

impl Embedder for ScriptedEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        self.vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
    }

    fn dimension(&self) -> usize {
        3
    }
}

const GOAL_AXIS: [f32; 3] = [1.0, 0.0, 0.0];

/// Unit vector whose cosine similarity with the goal axis is `score`.
fn at_score(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).sqrt(), 0.0]
}

fn login_record(name: &str, goal: &str) -> WorkflowRecord {
    let mut record = WorkflowRecord::new(TaskId::new(), name, goal);
    record.push_step(
        Step::new("navigate", Map::new())
            .with_url("https://portal.test/login")
            .with_reasoning(Some("Open the login page".into())),
    );
    record.push_step(Step::new("click_at", Map::new()).with_url("https://portal.test/home"));
    record
}

fn metadata(goal: &str, group: &str, indexed_at: &str) -> Map<String, Value> {
    let mut metadata = encode_v2(&login_record("Login", goal), &[goal.to_string()]);
    metadata.insert("goal_description".into(), json!(goal));
    metadata.insert("step_group_id".into(), json!(group));
    metadata.insert("indexed_at".into(), json!(indexed_at));
    metadata
}

fn engine(store: Arc<InMemoryRecordStore>, embedder: ScriptedEmbedder) -> RetrievalEngine {
    RetrievalEngine::new(store, Arc::new(embedder), RetrievalConfig::default())
}

#[tokio::test]
async fn indexed_run_is_recalled() {
    let store = Arc::new(InMemoryRecordStore::new());
    let goal = "login to the portal";
    let embedder = Arc::new(ScriptedEmbedder::new(&[
        ("Login flow: login to the portal", GOAL_AXIS.to_vec()),
        (goal, GOAL_AXIS.to_vec()),
    ]));
    let indexer = WorkflowIndexer::new(store.clone(), embedder.clone());
    let indexed = indexer
        .index(
            &login_record("Login flow", goal),
            TaskStatus::Completed,
            &[goal.to_string()],
            Some("Open login, then submit"),
        )
        .await
        .unwrap();
    assert_eq!(indexed.namespaces.len(), 2);
    assert_eq!(store.len(EXECUTION_STEPS_NAMESPACE), 1);
    assert_eq!(store.len(SUCCESS_CASES_NAMESPACE), 1);

    let engine = RetrievalEngine::new(store, embedder, RetrievalConfig::default());
    let reference = engine.recall(goal).await.unwrap().expect("reference");
    assert_eq!(reference.id, indexed.version_id);
    assert_eq!(reference.group_id, indexed.group_id);
    assert_eq!(
        reference.matched_by,
        Some(MatchTier::Similarity { threshold: 0.35 })
    );
    assert_eq!(reference.expected_step_count(), Some(2));
    assert_eq!(reference.final_location(), Some("https://portal.test/home"));
    assert_eq!(
        reference.execution_summary.as_deref(),
        Some("Open login, then submit")
    );
}

#[tokio::test]
async fn failed_runs_are_not_success_cases() {
    let store = Arc::new(InMemoryRecordStore::new());
    let embedder = Arc::new(ScriptedEmbedder::new(&[]));
    let indexer = WorkflowIndexer::new(store.clone(), embedder);
    indexer
        .index(&login_record("Login", "login"), TaskStatus::Failed, &[], None)
        .await
        .unwrap();
    assert_eq!(store.len(EXECUTION_STEPS_NAMESPACE), 1);
    assert_eq!(store.len(SUCCESS_CASES_NAMESPACE), 0);
}

#[tokio::test]
async fn highest_qualifying_tier_wins() {
    let store = Arc::new(InMemoryRecordStore::new());
    for (id, score, group) in [("weak", 0.20, "g1"), ("strong", 0.30, "g2")] {
        store
            .upsert(
                id,
                at_score(score),
                metadata("open supplier page", group, "2024-01-01T00:00:00Z"),
                EXECUTION_STEPS_NAMESPACE,
            )
            .await
            .unwrap();
    }
    let goal = "open supplier page";
    let engine = engine(store, ScriptedEmbedder::new(&[(goal, GOAL_AXIS.to_vec())]));

    let reference = engine.recall(goal).await.unwrap().expect("reference");
    assert_eq!(reference.id, "strong");
    assert_eq!(
        reference.matched_by,
        Some(MatchTier::Similarity { threshold: 0.25 })
    );
}

#[tokio::test]
async fn newest_version_represents_its_group() {
    let store = Arc::new(InMemoryRecordStore::new());
    for (id, indexed_at) in [
        ("v1", "2024-01-01T00:00:00Z"),
        ("v2", "2024-06-01T00:00:00Z"),
    ] {
        store
            .upsert(
                id,
                at_score(0.9),
                metadata("create supplier", "same-group", indexed_at),
                EXECUTION_STEPS_NAMESPACE,
            )
            .await
            .unwrap();
    }
    let goal = "create supplier";
    let engine = engine(store, ScriptedEmbedder::new(&[(goal, GOAL_AXIS.to_vec())]));

    let reference = engine.recall(goal).await.unwrap().expect("reference");
    assert_eq!(reference.id, "v2");
}

#[tokio::test]
async fn keyword_fallback_needs_overlap_and_floor() {
    let store = Arc::new(InMemoryRecordStore::new());
    store
        .upsert(
            "overlap",
            at_score(0.13),
            metadata("export invoice report", "g1", "2024-01-01T00:00:00Z"),
            EXECUTION_STEPS_NAMESPACE,
        )
        .await
        .unwrap();
    store
        .upsert(
            "unrelated",
            at_score(0.14),
            metadata("change password", "g2", "2024-01-01T00:00:00Z"),
            EXECUTION_STEPS_NAMESPACE,
        )
        .await
        .unwrap();
    let goal = "export the invoice";
    let engine = engine(store, ScriptedEmbedder::new(&[(goal, GOAL_AXIS.to_vec())]));

    let reference = engine.recall(goal).await.unwrap().expect("reference");
    assert_eq!(reference.id, "overlap");
    assert_eq!(reference.matched_by, Some(MatchTier::Keyword { hits: 2 }));
}

#[tokio::test]
async fn below_floor_runs_without_guidance() {
    let store = Arc::new(InMemoryRecordStore::new());
    store
        .upsert(
            "faint",
            at_score(0.05),
            metadata("export invoice report", "g1", "2024-01-01T00:00:00Z"),
            EXECUTION_STEPS_NAMESPACE,
        )
        .await
        .unwrap();
    let goal = "export the invoice";
    let engine = engine(store, ScriptedEmbedder::new(&[(goal, GOAL_AXIS.to_vec())]));

    assert!(engine.recall(goal).await.unwrap().is_none());
}

#[tokio::test]
async fn undecodable_candidates_are_skipped() {
    let store = Arc::new(InMemoryRecordStore::new());
    let mut broken = Map::new();
    broken.insert("steps".into(), json!("{not json"));
    broken.insert("format".into(), json!("json_v2"));
    store
        .upsert("broken", at_score(0.9), broken, EXECUTION_STEPS_NAMESPACE)
        .await
        .unwrap();
    store
        .upsert(
            "good",
            at_score(0.8),
            metadata("open dashboard", "g2", "2024-01-01T00:00:00Z"),
            EXECUTION_STEPS_NAMESPACE,
        )
        .await
        .unwrap();
    let goal = "open dashboard";
    let engine = engine(store, ScriptedEmbedder::new(&[(goal, GOAL_AXIS.to_vec())]));

    let reference = engine.recall(goal).await.unwrap().expect("reference");
    assert_eq!(reference.id, "good");
}

#[tokio::test]
async fn empty_goal_is_an_error() {
    let store = Arc::new(InMemoryRecordStore::new());
    let engine = engine(store, ScriptedEmbedder::new(&[]));
    assert!(engine.recall("  ").await.is_err());
}

#[tokio::test]
async fn static_data_loads_only_when_asked() {
    let store = Arc::new(InMemoryRecordStore::new());
    let entry = "Company ACME id 4411";
    let lookup_goal = "find the company id for ACME";
    let embedder = Arc::new(ScriptedEmbedder::new(&[
        (entry, GOAL_AXIS.to_vec()),
        (lookup_goal, GOAL_AXIS.to_vec()),
        ("open ACME dashboard", GOAL_AXIS.to_vec()),
    ]));
    WorkflowIndexer::new(store.clone(), embedder.clone())
        .index_static("acme", entry)
        .await
        .unwrap();
    let engine = RetrievalEngine::new(store, embedder, RetrievalConfig::default());

    let loaded = engine.load_static(lookup_goal, None).await.unwrap();
    assert_eq!(loaded.entries, vec![entry.to_string()]);

    let skipped = engine.load_static("open ACME dashboard", None).await.unwrap();
    assert!(!skipped.is_loaded());
}
