use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use memory_center::StoreStatsSnapshot;
use waymark_core_types::TaskStatus;

use crate::archive::read_record;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum StoreCommand {
    /// Show record counts and query counters
    Stats,
    /// Add one static reference entry
    AddStatic {
        #[arg(long)]
        id: String,
        /// Text injected into goals that ask for reference data
        #[arg(long)]
        data: String,
    },
    /// Index a workflow record file so goals can recall it
    Index {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Index as a failed run (execution steps only)
        #[arg(long)]
        failed: bool,
    },
}

pub async fn cmd_store(args: StoreArgs, ctx: &CliContext) -> Result<()> {
    match args.command {
        StoreCommand::Stats => {
            let stats = ctx.store().await?.stats_snapshot();
            emit(ctx.output(), &stats, print_stats)
        }
        StoreCommand::AddStatic { id, data } => {
            let id = ctx.indexer().await?.index_static(&id, &data).await?;
            println!("Stored static entry {id}");
            Ok(())
        }
        StoreCommand::Index { file, failed } => {
            let record = read_record(&file).await?;
            let status = if failed {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            let indexed = ctx
                .indexer()
                .await?
                .index(&record, status, &[record.description.clone()], None)
                .await
                .with_context(|| format!("Failed to index {}", file.display()))?;
            emit(ctx.output(), &indexed, |indexed| {
                println!(
                    "Indexed {} as {} in {}",
                    record.id,
                    indexed.version_id,
                    indexed.namespaces.join(", ")
                );
            })
        }
    }
}

fn print_stats(stats: &StoreStatsSnapshot) {
    println!("Record Store Stats:");
    println!("- Total queries: {}", stats.total_queries);
    println!("- Hits: {}", stats.hit_queries);
    println!("- Misses: {}", stats.miss_queries);
    println!("- Hit rate: {:.2}%", stats.hit_rate * 100.0);
    println!("- Upserts: {}", stats.upserts);
    println!("- Current records: {}", stats.current_records);
    if !stats.namespaces.is_empty() {
        println!("- Namespaces:");
        for (namespace, count) in &stats.namespaces {
            println!("  - {namespace}: {count}");
        }
    }
}
