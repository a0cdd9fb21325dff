pub mod openai;

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agent_core::llm_provider::{LlmProvider, MockLlmProvider, MockReply};
use agent_core::model::ModelResponse;
use anyhow::{Context, Result};
use tokio::fs;

use crate::settings::{ModelBackend, ModelSettings};

pub use openai::{OpenAiConfig, OpenAiLlmProvider};

/// Provider for the configured backend.
pub fn build_provider(settings: &ModelSettings) -> Result<Arc<dyn LlmProvider>> {
    match settings.backend {
        ModelBackend::Mock => Ok(Arc::new(MockLlmProvider::new())),
        ModelBackend::Http => {
            let raw = env::var(&settings.api_key_env).with_context(|| {
                format!("API key variable {} is not set", settings.api_key_env)
            })?;
            let api_keys: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect();
            let provider = OpenAiLlmProvider::new(OpenAiConfig {
                api_keys,
                model: settings.model.clone(),
                api_base: settings.api_base.clone(),
                temperature: settings.temperature,
                timeout: Duration::from_secs(settings.timeout_secs),
            })?;
            Ok(Arc::new(provider))
        }
    }
}

/// Mock provider replaying responses from a JSON array file.
pub async fn scripted_provider(path: &Path) -> Result<Arc<dyn LlmProvider>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    let responses: Vec<ModelResponse> =
        serde_json::from_str(&content).context("Failed to parse model script")?;
    Ok(Arc::new(MockLlmProvider::with_replies(
        responses.into_iter().map(MockReply::Respond),
    )))
}
