use agent_core::agent_loop::render_reference;
use agent_core::retrieval::ReferenceEntry;
use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct RecallArgs {
    /// Goal to look up
    pub goal: String,
}

#[derive(Debug, Serialize)]
struct RecallOutput {
    reference: Option<ReferenceEntry>,
    static_context: Vec<String>,
}

pub async fn cmd_recall(args: RecallArgs, ctx: &CliContext) -> Result<()> {
    let retrieval = ctx.retrieval().await?;
    let reference = retrieval.recall(&args.goal).await?;
    let static_context = retrieval
        .load_static(&args.goal, reference.as_ref())
        .await?;
    let output = RecallOutput {
        reference,
        static_context: static_context.entries,
    };

    let loop_config = &ctx.config().agent;
    emit(ctx.output(), &output, |output| {
        match &output.reference {
            Some(entry) => {
                println!(
                    "Reference {} (score {:.3}, {} format)",
                    entry.id,
                    entry.score,
                    entry.format.as_str()
                );
                println!();
                println!("{}", render_reference(entry, loop_config));
            }
            None => println!("No reference qualifies; the goal would run without guidance."),
        }
        if !output.static_context.is_empty() {
            println!();
            println!("Static context ({} entries):", output.static_context.len());
            for entry in &output.static_context {
                println!("- {entry}");
            }
        }
    })
}
