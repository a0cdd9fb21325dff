use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use waymark_core_types::WorkflowRecord;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct ArchiveArgs {
    #[command(subcommand)]
    pub command: ArchiveCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ArchiveCommand {
    /// List archived records, newest first
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print one archived record
    Show {
        #[arg(value_name = "RECORD_ID")]
        id: String,
    },
    /// Remove one archived record
    Delete {
        #[arg(value_name = "RECORD_ID")]
        id: String,
    },
}

pub async fn cmd_archive(args: ArchiveArgs, ctx: &CliContext) -> Result<()> {
    let archive = ctx.archive();
    match args.command {
        ArchiveCommand::List { limit } => {
            let mut entries = archive.list().await?;
            if let Some(limit) = limit {
                entries.truncate(limit);
            }
            emit(ctx.output(), &entries, |entries| {
                if entries.is_empty() {
                    println!("No archived records in {}", archive.dir().display());
                    return;
                }
                for entry in entries {
                    println!(
                        "{}  {}  {:>3} step(s)  {}",
                        entry.id,
                        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.steps,
                        entry.description
                    );
                }
            })
        }
        ArchiveCommand::Show { id } => {
            let record = archive.load(&id).await?;
            emit(ctx.output(), &record, print_record)
        }
        ArchiveCommand::Delete { id } => {
            if !archive.delete(&id).await? {
                bail!("No archived record found for id {id}");
            }
            println!("Deleted archived record {id}");
            Ok(())
        }
    }
}

fn print_record(record: &WorkflowRecord) {
    println!("{} ({})", record.name, record.id);
    println!("Goal: {}", record.description);
    println!("Created: {}", record.created_at.to_rfc3339());
    for step in record.steps() {
        println!(
            "  {}. {} {}",
            step.step_number,
            step.action_type,
            step.url.as_deref().unwrap_or("")
        );
        if let Some(reasoning) = &step.reasoning {
            println!("     {reasoning}");
        }
    }
}
