use std::path::PathBuf;

use agent_core::guardrails::{validate, GuardrailContext};
use anyhow::Result;
use clap::Args;

use crate::archive::read_record;

use super::context::CliContext;
use super::output::emit;
use super::run::print_deviation;

#[derive(Args, Clone, Debug)]
pub struct GuardrailArgs {
    /// Recorded workflow to compare against (JSON)
    #[arg(long, value_name = "FILE")]
    pub reference: PathBuf,

    /// Workflow that actually ran (JSON)
    #[arg(long, value_name = "FILE")]
    pub actual: PathBuf,

    /// Static data was loaded into the run's context
    #[arg(long)]
    pub static_loaded: bool,

    /// The run's reasoning referred to that static data
    #[arg(long, requires = "static_loaded")]
    pub static_referenced: bool,
}

pub async fn cmd_guardrail(args: GuardrailArgs, ctx: &CliContext) -> Result<()> {
    let reference = read_record(&args.reference).await?;
    let actual = read_record(&args.actual).await?;

    let mut guard = GuardrailContext::from_records(&reference, &actual);
    guard.static_loaded = args.static_loaded;
    guard.static_referenced = args.static_referenced;
    let report = validate(&guard);

    emit(ctx.output(), &report, print_deviation)
}
