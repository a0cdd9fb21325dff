use std::path::PathBuf;
use std::sync::Arc;

use agent_core::agent_loop::{LoopObserver, NoopObserver};
use agent_core::guardrails::DeviationReport;
use agent_core::retrieval::MatchTier;
use anyhow::{bail, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use waymark_core_types::{SessionId, Step, TaskStatus};

use crate::actuation::DryRunActuator;
use crate::llm::{build_provider, scripted_provider};
use crate::sessions::{GoalReport, SessionService};

use super::context::CliContext;
use super::output::{emit, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Goals to run in order within one session; read from stdin when omitted
    pub goals: Vec<String>,

    /// Location to open before each goal
    #[arg(long, value_name = "URL")]
    pub start_url: Option<String>,

    /// Replay model responses from a JSON array instead of calling the model service
    #[arg(long, value_name = "FILE")]
    pub script: Option<PathBuf>,

    /// Save each finished record to the archive
    #[arg(long)]
    pub archive: bool,

    /// Directory recorded as the location of each observation
    #[arg(long, value_name = "DIR")]
    pub observations: Option<PathBuf>,
}

/// Prints steps as they land.
struct ConsoleProgress;

impl LoopObserver for ConsoleProgress {
    fn on_status(&self, status: TaskStatus, message: &str) {
        if status == TaskStatus::Running {
            println!("> {message}");
        }
    }

    fn on_step(&self, step: &Step, _observation: Option<&str>) {
        println!(
            "  [{}] {} {}",
            step.step_number,
            step.action_type,
            step.url.as_deref().unwrap_or("")
        );
        if let Some(warning) = &step.warning {
            println!("      warning: {warning}");
        }
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let provider = match &args.script {
        Some(path) => scripted_provider(path).await?,
        None => build_provider(&config.model)?,
    };
    let observer: Arc<dyn LoopObserver> = match ctx.output() {
        OutputFormat::Human => Arc::new(ConsoleProgress),
        _ => Arc::new(NoopObserver),
    };
    let mut service = SessionService::new(provider, ctx.retrieval().await?, config.agent.clone())
        .with_observer(observer);
    if config.store.index_runs {
        service = service.with_indexer(ctx.indexer().await?);
    }
    let service = Arc::new(service);

    let mut actuator = DryRunActuator::new();
    if let Some(dir) = &args.observations {
        actuator = actuator.with_artifact_dir(dir);
    }
    let session = service.create(Arc::new(actuator));
    let quit = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(Arc::clone(&service), session.clone(), quit.clone());

    let mut outcome = RunOutcome::default();
    if args.goals.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = quit.cancelled() => break,
            };
            let Some(line) = line else { break };
            let goal = line.trim();
            if goal.is_empty() {
                continue;
            }
            if matches!(goal, "exit" | "quit") {
                break;
            }
            if !outcome.record(run_one(&service, &session, goal, &args, ctx).await?) {
                break;
            }
        }
    } else {
        for goal in &args.goals {
            if quit.is_cancelled() {
                break;
            }
            if !outcome.record(run_one(&service, &session, goal, &args, ctx).await?) {
                break;
            }
        }
    }

    interrupt.abort();
    if outcome.session_ended {
        warn!(session = %session, "environment closed; remaining goals skipped");
    } else {
        service.end(&session).await?;
    }
    if quit.is_cancelled() {
        std::process::exit(130);
    }
    if outcome.unfinished > 0 {
        bail!("{} goal(s) did not complete", outcome.unfinished);
    }
    Ok(())
}

#[derive(Default)]
struct RunOutcome {
    unfinished: usize,
    session_ended: bool,
}

impl RunOutcome {
    /// Tally one report; `false` once the session can take no more goals.
    fn record(&mut self, report: GoalReport) -> bool {
        if !report.is_success() {
            self.unfinished += 1;
        }
        self.session_ended = report.session_ended;
        !report.session_ended
    }
}

/// Ctrl-C stops the running goal between turns. With nothing running it
/// cancels `quit` so the session still ends cleanly.
fn spawn_interrupt_handler(
    service: Arc<SessionService>,
    session: SessionId,
    quit: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match service.stop(&session) {
                Ok(true) => warn!("interrupt received; stopping after the current turn"),
                _ => {
                    quit.cancel();
                    break;
                }
            }
        }
    })
}

async fn run_one(
    service: &SessionService,
    session: &SessionId,
    goal: &str,
    args: &RunArgs,
    ctx: &CliContext,
) -> Result<GoalReport> {
    let report = service
        .run_goal(session, goal, args.start_url.as_deref())
        .await?;
    if args.archive && !report.record.is_empty() {
        let path = ctx.archive().save(&report.record).await?;
        info!(path = %path.display(), "record archived");
    }
    emit(ctx.output(), &report, print_report)?;
    Ok(report)
}

fn describe_tier(tier: &MatchTier) -> String {
    match tier {
        MatchTier::Similarity { threshold } => format!("similarity >= {threshold:.2}"),
        MatchTier::Keyword { hits } => format!("keyword overlap, {hits} hit(s)"),
    }
}

fn print_report(report: &GoalReport) {
    println!(
        "Goal {} after {} turn(s), {} step(s)",
        report.status.task_status().as_str(),
        report.turns,
        report.record.len()
    );
    println!("{}", report.message);
    match (&report.reference_id, &report.matched_by) {
        (Some(id), Some(tier)) => println!("Reference: {id} ({})", describe_tier(tier)),
        (Some(id), None) => println!("Reference: {id}"),
        _ => {}
    }
    if let Some(deviation) = &report.deviation {
        print_deviation(deviation);
    }
    if let Some(version) = &report.indexed_as {
        println!("Indexed as: {version}");
    }
    if report.session_ended {
        println!("Session ended: the environment closed");
    }
}

pub(super) fn print_deviation(report: &DeviationReport) {
    let verdict = if report.context_pollution {
        "context pollution"
    } else if report.drift_detected {
        "drift detected"
    } else if report.adaptive_recovery {
        "adaptive recovery"
    } else {
        "ok"
    };
    println!("Guardrails: {verdict}");
    for (name, check) in report.checks() {
        let mark = if check.valid { "pass" } else { "FAIL" };
        println!(
            "  - {name}: {mark} [{}] {}",
            check.kind.as_str(),
            check.message
        );
    }
}
