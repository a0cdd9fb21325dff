use clap::Subcommand;

use super::archive::ArchiveArgs;
use super::guardrail::GuardrailArgs;
use super::recall::RecallArgs;
use super::run::RunArgs;
use super::store::StoreArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run goals against a dry-run browser, guided by recalled workflows
    Run(RunArgs),

    /// Show the reference workflow a goal would be guided by
    Recall(RecallArgs),

    /// Compare a finished workflow against a reference workflow
    Guardrail(GuardrailArgs),

    /// Inspect archived workflow records
    Archive(ArchiveArgs),

    /// Inspect and seed the workflow record store
    Store(StoreArgs),

    /// Show system information and effective configuration
    Info,
}
