use super::archive::cmd_archive;
use super::env::CliArgs;
use super::guardrail::cmd_guardrail;
use super::info::cmd_info;
use super::recall::cmd_recall;
use super::run::cmd_run;
use super::store::cmd_store;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Recall(args) => cmd_recall(args, ctx).await,
        Commands::Guardrail(args) => cmd_guardrail(args, ctx).await,
        Commands::Archive(args) => cmd_archive(args, ctx).await,
        Commands::Store(args) => cmd_store(args, ctx).await,
        Commands::Info => cmd_info(ctx).await,
    }
}
