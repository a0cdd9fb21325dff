use std::env;

use anyhow::Result;
use serde::Serialize;

use crate::settings::ModelBackend;

use super::context::CliContext;
use super::output::emit;

#[derive(Debug, Serialize)]
struct SystemInfo {
    version: &'static str,
    build_date: &'static str,
    git_commit: &'static str,
    config_path: String,
    model_backend: ModelBackend,
    model: String,
    api_key_present: bool,
    max_turns: u32,
    retry_attempts: u32,
    namespace: String,
    thresholds: Vec<f32>,
    store_path: Option<String>,
    archive_dir: String,
}

pub async fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let info = SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
        git_commit: env!("GIT_HASH"),
        config_path: ctx.config_path().display().to_string(),
        model_backend: config.model.backend,
        model: config.model.model.clone(),
        api_key_present: env::var(&config.model.api_key_env).is_ok(),
        max_turns: config.agent.max_turns,
        retry_attempts: config.agent.model_retry_attempts,
        namespace: config.retrieval.namespace.clone(),
        thresholds: config.retrieval.matcher.thresholds.clone(),
        store_path: config
            .store
            .path
            .as_ref()
            .map(|path| path.display().to_string()),
        archive_dir: config.archive_dir().display().to_string(),
    };

    emit(ctx.output(), &info, |info| {
        println!("Waymark System Information");
        println!("==========================");
        println!("Version: {}", info.version);
        println!("Build Date: {}", info.build_date);
        println!("Git Commit: {}", info.git_commit);
        println!();
        println!("Configuration:");
        println!("- Config File: {}", info.config_path);
        println!("- Model Backend: {:?}", info.model_backend);
        println!("- Model: {}", info.model);
        println!(
            "- API Key: {}",
            if info.api_key_present { "set" } else { "missing" }
        );
        println!("- Max Turns: {}", info.max_turns);
        println!("- Retry Attempts: {}", info.retry_attempts);
        println!("- Retrieval Namespace: {}", info.namespace);
        println!("- Similarity Thresholds: {:?}", info.thresholds);
        println!(
            "- Record Store: {}",
            info.store_path.as_deref().unwrap_or("(in memory)")
        );
        println!("- Archive Directory: {}", info.archive_dir);
    })
}
