//! Application configuration.
//!
//! A YAML file layered with `WAYMARK__`-prefixed environment overrides, e.g.
//! `WAYMARK__AGENT__MAX_TURNS=5`.

use std::path::{Path, PathBuf};

use agent_core::agent_loop::AgentLoopConfig;
use agent_core::retrieval::RetrievalConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "WAYMARK";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelSettings,
    pub agent: AgentLoopConfig,
    pub retrieval: RetrievalConfig,
    pub store: StoreSettings,
    pub embedding: EmbeddingSettings,
    /// Directory of archived workflow records.
    pub archive_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    /// OpenAI-compatible chat completions over HTTP.
    #[default]
    Http,
    /// Offline scripted provider.
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub backend: ModelBackend,
    pub api_base: String,
    pub model: String,
    /// Environment variable holding the API key. Comma-separated values
    /// rotate on rate limits.
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: ModelBackend::Http,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// JSON snapshot of the record store; in-memory only when unset.
    pub path: Option<PathBuf>,
    /// Index finished runs so later goals can recall them.
    pub index_runs: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            index_runs: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

impl Config {
    /// Layer `path` (if it exists) and the environment over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            );
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn archive_dir(&self) -> PathBuf {
        if self.archive_dir.as_os_str().is_empty() {
            PathBuf::from("waymark-archive")
        } else {
            self.archive_dir.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "agent:\n  max_turns: 7\nretrieval:\n  matcher:\n    keyword_floor: 0.2\nmodel:\n  backend: mock\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.agent.max_turns, 7);
        assert_eq!(config.agent.model_retry_attempts, 3);
        assert_eq!(config.retrieval.matcher.keyword_floor, 0.2);
        assert_eq!(config.retrieval.matcher.thresholds, vec![0.35, 0.25, 0.15]);
        assert_eq!(config.model.backend, ModelBackend::Mock);
        assert_eq!(config.embedding.dimension, 256);
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/waymark.yaml"))).unwrap();
        assert_eq!(config.agent.max_turns, 20);
        assert!(config.store.index_runs);
        assert_eq!(config.archive_dir(), PathBuf::from("waymark-archive"));
    }
}
