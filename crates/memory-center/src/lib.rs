//! Workflow record store.
//!
//! Past execution traces are kept as `(vector, metadata)` pairs partitioned
//! by namespace. The store only answers similarity queries; ranking policy
//! lives with the retrieval engine in `agent-core`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub mod embed;

pub use embed::{cosine_similarity, Embedder, HashingEmbedder};

/// Step-level execution records, one per saved workflow version.
pub const EXECUTION_STEPS_NAMESPACE: &str = "test_execution_steps";
/// Records of runs that finished successfully.
pub const SUCCESS_CASES_NAMESPACE: &str = "test_success_cases";
/// Supplementary reference data (company ids, lookup tables).
pub const STATIC_DATA_NAMESPACE: &str = "static_data";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record vector must not be empty")]
    EmptyVector,

    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error("record store io failed: {0}")]
    Io(#[from] io::Error),

    #[error("record store backend failed: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub namespace: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One similarity-query hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ScoredRecord {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Exact-match metadata filter applied before ranking.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    equals: BTreeMap<String, Value>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Similarity-search collaborator consumed by the retrieval engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace `id` in `namespace`; returns the stored id.
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
        namespace: &str,
    ) -> Result<String, StoreError>;

    /// Top `top_k` records of `namespace` ranked by cosine similarity.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>, StoreError>;
}

pub type SharedRecordStore = Arc<dyn RecordStore>;

#[derive(Default)]
struct StoreMetrics {
    queries: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    upserts: AtomicU64,
}

impl StoreMetrics {
    fn record_query(&self, hit: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatsSnapshot {
    pub total_queries: u64,
    pub hit_queries: u64,
    pub miss_queries: u64,
    pub hit_rate: f64,
    pub upserts: u64,
    pub current_records: u64,
    pub namespaces: BTreeMap<String, u64>,
}

/// Process-local [`RecordStore`] with optional JSON persistence.
#[derive(Default)]
pub struct InMemoryRecordStore {
    inner: DashMap<String, Vec<StoredRecord>>,
    storage_path: Option<PathBuf>,
    metrics: StoreMetrics,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from `path` if it exists and write back after every upsert.
    pub fn with_persistence(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let store = Self {
            inner: DashMap::new(),
            storage_path: Some(path.clone()),
            metrics: StoreMetrics::default(),
        };

        if path.exists() {
            let bytes = fs::read(&path)?;
            if !bytes.is_empty() {
                let records: Vec<StoredRecord> = serde_json::from_slice(&bytes)
                    .map_err(|err| io::Error::new(ErrorKind::InvalidData, format!("{err}")))?;
                for record in records {
                    store
                        .inner
                        .entry(record.namespace.clone())
                        .or_insert_with(Vec::new)
                        .push(record);
                }
            }
        }

        Ok(store)
    }

    pub fn len(&self, namespace: &str) -> usize {
        self.inner.get(namespace).map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }

    pub fn get(&self, namespace: &str, id: &str) -> Option<StoredRecord> {
        self.inner
            .get(namespace)
            .and_then(|records| records.iter().find(|record| record.id == id).cloned())
    }

    pub fn persist_now(&self) -> io::Result<()> {
        self.persist_to_disk()
    }

    pub fn stats_snapshot(&self) -> StoreStatsSnapshot {
        let total_queries = self.metrics.queries.load(Ordering::Relaxed);
        let hit_queries = self.metrics.hits.load(Ordering::Relaxed);
        let miss_queries = self.metrics.misses.load(Ordering::Relaxed);
        let hit_rate = if total_queries == 0 {
            0.0
        } else {
            hit_queries as f64 / total_queries as f64
        };
        let namespaces = self
            .inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len() as u64))
            .collect();
        StoreStatsSnapshot {
            total_queries,
            hit_queries,
            miss_queries,
            hit_rate,
            upserts: self.metrics.upserts.load(Ordering::Relaxed),
            current_records: self.total_records() as u64,
            namespaces,
        }
    }

    fn total_records(&self) -> usize {
        self.inner.iter().map(|entry| entry.value().len()).sum()
    }

    fn persist_to_disk(&self) -> io::Result<()> {
        let Some(path) = self.storage_path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut all_records: Vec<StoredRecord> = Vec::new();
        for entry in self.inner.iter() {
            all_records.extend(entry.value().clone());
        }
        all_records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let json = serde_json::to_vec_pretty(&all_records)
            .map_err(|err| io::Error::new(ErrorKind::Other, format!("{err}")))?;
        fs::write(path, json)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
        namespace: &str,
    ) -> Result<String, StoreError> {
        if vector.is_empty() {
            return Err(StoreError::EmptyVector);
        }
        if namespace.trim().is_empty() {
            return Err(StoreError::EmptyNamespace);
        }
        let now = Utc::now();
        {
            let mut records = self
                .inner
                .entry(namespace.to_string())
                .or_insert_with(Vec::new);
            match records.iter_mut().find(|record| record.id == id) {
                Some(existing) => {
                    existing.vector = vector;
                    existing.metadata = metadata;
                    existing.updated_at = now;
                }
                None => records.push(StoredRecord {
                    id: id.to_string(),
                    namespace: namespace.to_string(),
                    vector,
                    metadata,
                    created_at: now,
                    updated_at: now,
                }),
            }
        }
        self.metrics.upserts.fetch_add(1, Ordering::Relaxed);
        debug!(namespace, id, "record upserted");
        if let Err(err) = self.persist_to_disk() {
            warn!(error = %err, "record store persist failed after upsert");
        }
        Ok(id.to_string())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        if vector.is_empty() {
            return Err(StoreError::EmptyVector);
        }
        let mut scored: Vec<ScoredRecord> = match self.inner.get(namespace) {
            Some(records) => records
                .iter()
                .filter(|record| filter.map_or(true, |f| f.matches(&record.metadata)))
                .map(|record| ScoredRecord {
                    id: record.id.clone(),
                    score: cosine_similarity(vector, &record.vector),
                    metadata: record.metadata.clone(),
                })
                .collect(),
            None => Vec::new(),
        };
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        self.metrics.record_query(!scored.is_empty());
        Ok(scored)
    }
}
