use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::retrieval::{RetrievalEngine, WorkflowIndexer};
use anyhow::{Context, Result};
use memory_center::{Embedder, HashingEmbedder, InMemoryRecordStore, SharedRecordStore};
use tokio::sync::OnceCell;

use crate::archive::WorkflowArchive;
use crate::settings::Config;

use super::output::OutputFormat;

/// Per-invocation state shared by every command.
pub struct CliContext {
    config: Arc<Config>,
    config_path: PathBuf,
    output: OutputFormat,
    store: OnceCell<Arc<InMemoryRecordStore>>,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
            store: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    /// The record store, opened on first use.
    pub async fn store(&self) -> Result<Arc<InMemoryRecordStore>> {
        self.store
            .get_or_try_init(|| async {
                let store = match &self.config.store.path {
                    Some(path) => InMemoryRecordStore::with_persistence(path).with_context(|| {
                        format!("Failed to open record store {}", path.display())
                    })?,
                    None => InMemoryRecordStore::new(),
                };
                Ok::<_, anyhow::Error>(Arc::new(store))
            })
            .await
            .map(Arc::clone)
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::new(HashingEmbedder::new(self.config.embedding.dimension))
    }

    pub async fn retrieval(&self) -> Result<RetrievalEngine> {
        let store: SharedRecordStore = self.store().await?;
        Ok(RetrievalEngine::new(
            store,
            self.embedder(),
            self.config.retrieval.clone(),
        ))
    }

    pub async fn indexer(&self) -> Result<WorkflowIndexer> {
        let store: SharedRecordStore = self.store().await?;
        Ok(WorkflowIndexer::new(store, self.embedder()))
    }

    pub fn archive(&self) -> WorkflowArchive {
        WorkflowArchive::new(self.config.archive_dir())
    }
}
