//! Composite context sent as the first turn of every goal.
//!
//! Sections, highest priority first: session memory, static reference data,
//! conversation history, the current task, fixed rules, and the optional
//! reference workflow.

use std::fmt::Write as _;

use super::config::AgentLoopConfig;
use crate::retrieval::{ReferenceEntry, ReferenceFormat, StaticContext};
use crate::session::SessionContext;

const RULE: &str = "============================================================";

/// Behavioral rules included in every composite context.
pub const EXECUTION_RULES: &str = r#"0. USER PROMPT IS KING: execute exactly what CURRENT TASK asks.
   - Do not add steps the user did not request.
   - A reference workflow is a hint, never a command. Ignore it when it does not match.
   - When in doubt, do less.
1. STOP ON VISUAL SUCCESS: trust the observation, not only the URL. When the goal is visibly done, stop calling tools.
2. POST-ACTION SETTLEMENT: after login, submit or save, expect redirects. Do not correct the URL right away.
3. MINIMAL INTERVENTION: if you are already on the right page, stop.
4. CONTEXT AWARENESS: skip navigation the reference asks for when you are already there.
5. NO HALLUCINATIONS: never invent steps, menus or uploads.
6. CLIPBOARD USAGE: "paste" means the CLIPBOARD value from session memory.
7. Never use a search engine unless asked.
8. Coordinates are normalized to 0-1000 on both axes. Locate elements visually; references carry no coordinates."#;

fn heading(out: &mut String, title: &str) {
    let _ = write!(out, "\n{RULE}\n{title}\n{RULE}\n");
}

/// Inputs of the composite context. The current goal must already be the
/// last recorded instruction of `session`.
pub struct ContextInputs<'a> {
    pub goal: &'a str,
    pub session: &'a SessionContext,
    pub reference: Option<&'a ReferenceEntry>,
    pub static_context: &'a StaticContext,
    pub config: &'a AgentLoopConfig,
}

pub fn compose_context(inputs: &ContextInputs<'_>) -> String {
    let mut out = String::new();
    write_session_memory(&mut out, inputs.session, inputs.config);

    if inputs.static_context.is_loaded() {
        heading(&mut out, "STATIC REFERENCE DATA");
        for (index, entry) in inputs.static_context.entries.iter().enumerate() {
            let _ = writeln!(out, "{}. {entry}", index + 1);
        }
    }

    let instructions = inputs.session.instructions();
    if instructions.len() > 1 {
        heading(&mut out, "CONVERSATION HISTORY - follow this flow");
        for (index, instruction) in instructions.iter().enumerate() {
            let _ = writeln!(out, "   {}. {instruction}", index + 1);
        }
    }

    heading(&mut out, "CURRENT TASK - DO THIS NOW");
    let _ = writeln!(out, "{}", inputs.goal.trim());

    heading(&mut out, "RULES");
    let _ = writeln!(out, "{EXECUTION_RULES}");

    if let Some(reference) = inputs.reference {
        write_reference(&mut out, reference, inputs.config);
    }
    out
}

fn write_session_memory(out: &mut String, session: &SessionContext, config: &AgentLoopConfig) {
    heading(out, "SESSION MEMORY - use this information");
    if let Some(scratch) = session.scratch() {
        let _ = writeln!(out, "CLIPBOARD (last copied value): {scratch}");
        let _ = writeln!(out, "   When the user says 'paste', use this value.");
    }
    if !session.scratch_history().is_empty() {
        let _ = writeln!(
            out,
            "ALL COPIED VALUES (in order): {}",
            session.scratch_history().join(", ")
        );
    }
    if !session.notes().is_empty() {
        let _ = writeln!(out, "NOTES:");
        for (key, value) in session.notes() {
            let _ = writeln!(out, "   - {key}: {value}");
        }
    }
    let recent = session.recent_tasks(config.recent_task_limit);
    if !recent.is_empty() {
        let _ = writeln!(out, "PREVIOUS TASKS IN THIS SESSION:");
        for (index, task) in recent.iter().enumerate() {
            let _ = writeln!(
                out,
                "   {}. {} -> {} ({} steps)",
                index + 1,
                task.goal,
                task.result,
                task.steps_count
            );
        }
    }
    if let Some(location) = session.current_location() {
        let _ = writeln!(out, "CURRENT LOCATION: {location}");
    }
}

/// Guidance text for a reference. Summaries win over step lists.
pub fn render_reference(reference: &ReferenceEntry, config: &AgentLoopConfig) -> String {
    let mut out = String::new();
    if !reference.urls_visited.is_empty() {
        let _ = writeln!(out, "CRITICAL URLs (NAVIGATE IN ORDER):");
        for (index, url) in reference.urls_visited.iter().enumerate() {
            let _ = writeln!(out, "  {}. {url}", index + 1);
        }
        out.push('\n');
    }
    if !reference.actions.is_empty() {
        let _ = writeln!(out, "ACTIONS:");
        for (action, count) in &reference.actions {
            let _ = writeln!(out, "  - {action}: {count}x");
        }
        out.push('\n');
    }

    if let Some(summary) = reference.execution_summary.as_deref() {
        let _ = writeln!(out, "EXECUTION INSTRUCTIONS:\n{summary}\n");
    } else if !reference.steps.is_empty() {
        let _ = writeln!(out, "EXECUTION STEPS:");
        for step in reference.steps.iter().take(config.reference_step_limit) {
            let _ = write!(out, "  {}. {}", step.step, step.url.as_deref().unwrap_or(""));
            if let Some(reasoning) = step.reasoning.as_deref().filter(|r| !r.is_empty()) {
                let excerpt: String = reasoning.chars().take(config.reasoning_excerpt_chars).collect();
                let _ = write!(out, " → {excerpt}");
            }
            out.push('\n');
        }
        out.push('\n');
    } else if let Some(log) = reference.execution_log.as_deref() {
        let _ = writeln!(out, "EXECUTION LOG (in order):");
        if log.chars().count() > config.legacy_log_chars {
            let head: String = log.chars().take(config.legacy_log_chars).collect();
            let _ = writeln!(out, "{head}\n... [truncated]\n");
        } else {
            let _ = writeln!(out, "{log}\n");
        }
    }

    if let Some(first) = reference.user_prompts.first() {
        let label = match reference.format {
            ReferenceFormat::LegacyText => "ORIGINAL USER REQUEST",
            ReferenceFormat::JsonV2 | ReferenceFormat::LegacyNested => "ORIGINAL REQUEST",
        };
        let _ = writeln!(out, "{label}: {first}");
    }
    out
}

fn write_reference(out: &mut String, reference: &ReferenceEntry, config: &AgentLoopConfig) {
    heading(
        out,
        "REFERENCE WORKFLOW - USE ONLY IF DIRECTLY RELEVANT TO CURRENT TASK",
    );
    let _ = writeln!(
        out,
        "This workflow is optional context. If it does not match CURRENT TASK, ignore it.\n"
    );
    out.push_str(&render_reference(reference, config));
}
