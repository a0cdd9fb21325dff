//! Post-run drift checks.
//!
//! Three pure checks compare a finished run with the reference it was given.
//! Findings are advisory: nothing here blocks or rolls back a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use waymark_core_types::WorkflowRecord;

use crate::retrieval::ReferenceEntry;

/// Allowed difference between actual and reference step counts.
pub const STEP_COUNT_TOLERANCE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Check passed.
    None,
    /// Nothing to compare against.
    Skipped,
    ExtraSteps,
    /// Deviation that still reached the reference outcome.
    AdaptiveRecovery,
    SequenceMismatch,
    ContextPollution,
}

impl DriftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftKind::None => "none",
            DriftKind::Skipped => "skipped",
            DriftKind::ExtraSteps => "extra_steps",
            DriftKind::AdaptiveRecovery => "adaptive_recovery",
            DriftKind::SequenceMismatch => "sequence_mismatch",
            DriftKind::ContextPollution => "context_pollution",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub valid: bool,
    pub kind: DriftKind,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl CheckResult {
    fn new(valid: bool, kind: DriftKind, message: impl Into<String>) -> Self {
        Self {
            valid,
            kind,
            message: message.into(),
            details: Map::new(),
        }
    }

    fn detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    /// Invalid, and not a recognized recovery.
    pub fn is_drift(&self) -> bool {
        !self.valid && self.kind != DriftKind::AdaptiveRecovery
    }
}

/// Reference and actual facts compared by the checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailContext {
    pub reference_step_count: Option<usize>,
    pub reference_actions: BTreeMap<String, u32>,
    pub reference_final_location: Option<String>,
    pub actual_step_count: usize,
    pub actual_actions: BTreeMap<String, u32>,
    pub actual_final_location: Option<String>,
    /// Action type of every actual step, in order.
    pub actual_step_actions: Vec<String>,
    pub static_loaded: bool,
    pub static_referenced: bool,
}

impl GuardrailContext {
    /// Context for a run against an optional retrieved reference.
    pub fn from_reference(
        reference: Option<&ReferenceEntry>,
        actual: &WorkflowRecord,
        static_loaded: bool,
        static_referenced: bool,
    ) -> Self {
        let mut ctx = Self::from_actual(actual);
        if let Some(reference) = reference {
            ctx.reference_step_count = reference.expected_step_count();
            ctx.reference_actions = reference.actions.clone();
            ctx.reference_final_location = reference.final_location().map(str::to_string);
        }
        ctx.static_loaded = static_loaded;
        ctx.static_referenced = static_referenced;
        ctx
    }

    /// Context comparing two stored records directly.
    pub fn from_records(reference: &WorkflowRecord, actual: &WorkflowRecord) -> Self {
        let mut ctx = Self::from_actual(actual);
        ctx.reference_step_count = Some(reference.len()).filter(|n| *n > 0);
        ctx.reference_actions = reference.action_histogram();
        ctx.reference_final_location = reference.final_url().map(str::to_string);
        ctx
    }

    fn from_actual(actual: &WorkflowRecord) -> Self {
        Self {
            actual_step_count: actual.len(),
            actual_actions: actual.action_histogram(),
            actual_final_location: actual.final_url().map(str::to_string),
            actual_step_actions: actual
                .steps()
                .iter()
                .map(|step| step.action_type.clone())
                .collect(),
            ..Self::default()
        }
    }
}

fn without_query(location: &str) -> &str {
    location.split('?').next().unwrap_or(location)
}

fn same_location(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => without_query(a) == without_query(b),
        _ => false,
    }
}

pub fn check_step_count(ctx: &GuardrailContext) -> CheckResult {
    let Some(expected) = ctx.reference_step_count.filter(|n| *n > 0) else {
        return CheckResult::new(
            true,
            DriftKind::Skipped,
            "No reference step count; step count check skipped",
        );
    };
    let actual = ctx.actual_step_count;
    let difference = actual as i64 - expected as i64;
    let base = |result: CheckResult| {
        result
            .detail("expected_steps", json!(expected))
            .detail("actual_steps", json!(actual))
            .detail("difference", json!(difference))
    };

    if actual.abs_diff(expected) <= STEP_COUNT_TOLERANCE {
        return base(CheckResult::new(
            true,
            DriftKind::None,
            format!("Step count within tolerance: {actual}/{expected}"),
        ));
    }
    if actual < expected {
        return base(CheckResult::new(
            true,
            DriftKind::None,
            format!("Fewer steps than reference: {actual} vs {expected}"),
        ))
        .detail("missing_steps", json!(expected - actual));
    }

    let extra: Vec<&str> = ctx
        .actual_step_actions
        .iter()
        .skip(expected)
        .map(String::as_str)
        .collect();
    if same_location(
        ctx.actual_final_location.as_deref(),
        ctx.reference_final_location.as_deref(),
    ) {
        return base(CheckResult::new(
            true,
            DriftKind::AdaptiveRecovery,
            format!("Adaptive recovery: {difference} extra steps but the outcome matches"),
        ))
        .detail("extra_steps", json!(extra))
        .detail("adaptive_recovery", json!(true));
    }
    base(CheckResult::new(
        false,
        DriftKind::ExtraSteps,
        format!("Drift detected: {difference} extra steps ({})", extra.join(", ")),
    ))
    .detail("extra_steps", json!(extra))
}

pub fn check_action_sequence(ctx: &GuardrailContext) -> CheckResult {
    if ctx.reference_actions.is_empty() {
        return CheckResult::new(
            true,
            DriftKind::Skipped,
            "No reference actions; sequence check skipped",
        );
    }

    let unexpected: Vec<(&str, u32, u32)> = ctx
        .actual_actions
        .iter()
        .filter_map(|(action, &actual)| {
            let expected = ctx.reference_actions.get(action).copied().unwrap_or(0);
            (actual > expected).then_some((action.as_str(), expected, actual))
        })
        .collect();
    let unexpected_json: Vec<Value> = unexpected
        .iter()
        .map(|(action, expected, actual)| {
            json!({
                "action": action,
                "expected": expected,
                "actual": actual,
                "extra": actual - expected,
            })
        })
        .collect();
    let with_details = |result: CheckResult| {
        result
            .detail("reference_actions", json!(ctx.reference_actions))
            .detail("actual_actions", json!(ctx.actual_actions))
            .detail("unexpected_actions", json!(unexpected_json))
    };

    if unexpected.is_empty() {
        return with_details(CheckResult::new(
            true,
            DriftKind::None,
            "Action counts within reference",
        ));
    }

    let single_click = |(action, expected, actual): &(&str, u32, u32)| {
        *action == "click_at" && actual - expected == 1
    };
    if unexpected.iter().all(single_click) {
        return with_details(CheckResult::new(
            true,
            DriftKind::AdaptiveRecovery,
            "Recovery pattern detected: single_click_fallback",
        ))
        .detail("recovery_patterns", json!(["single_click_fallback"]));
    }

    let names: Vec<&str> = unexpected.iter().map(|(action, ..)| *action).collect();
    with_details(CheckResult::new(
        false,
        DriftKind::SequenceMismatch,
        format!("Unexpected actions: {}", names.join(", ")),
    ))
}

pub fn check_context_relevance(ctx: &GuardrailContext) -> CheckResult {
    if !ctx.static_loaded {
        return CheckResult::new(true, DriftKind::None, "No static data loaded")
            .detail("static_data_loaded", json!(false))
            .detail("relevance_score", json!(1.0));
    }
    if ctx.static_referenced {
        return CheckResult::new(true, DriftKind::None, "Static data loaded and used")
            .detail("static_data_loaded", json!(true))
            .detail("relevance_score", json!(1.0));
    }
    CheckResult::new(
        false,
        DriftKind::ContextPollution,
        "Context pollution: static data loaded but never referenced",
    )
    .detail("static_data_loaded", json!(true))
    .detail("relevance_score", json!(0.0))
}

/// Result of all three checks plus the derived flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationReport {
    pub step_count: CheckResult,
    pub action_sequence: CheckResult,
    pub context_relevance: CheckResult,
    pub drift_detected: bool,
    pub adaptive_recovery: bool,
    pub context_pollution: bool,
}

impl DeviationReport {
    pub fn checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("step_count", &self.step_count),
            ("action_sequence", &self.action_sequence),
            ("context_relevance", &self.context_relevance),
        ]
    }
}

pub fn validate(ctx: &GuardrailContext) -> DeviationReport {
    let step_count = check_step_count(ctx);
    let action_sequence = check_action_sequence(ctx);
    let context_relevance = check_context_relevance(ctx);
    let all = [&step_count, &action_sequence, &context_relevance];
    DeviationReport {
        drift_detected: all.iter().any(|check| check.is_drift()),
        adaptive_recovery: all
            .iter()
            .any(|check| check.kind == DriftKind::AdaptiveRecovery),
        context_pollution: all
            .iter()
            .any(|check| check.kind == DriftKind::ContextPollution),
        step_count,
        action_sequence,
        context_relevance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(expected: usize, actual: &[&str]) -> GuardrailContext {
        GuardrailContext {
            reference_step_count: Some(expected),
            actual_step_count: actual.len(),
            actual_step_actions: actual.iter().map(|a| a.to_string()).collect(),
            ..GuardrailContext::default()
        }
    }

    #[test]
    fn tolerance_of_one_step() {
        let result = check_step_count(&ctx(4, &["a", "b", "c", "d", "e"]));
        assert!(result.valid);
        assert_eq!(result.kind, DriftKind::None);
    }

    #[test]
    fn extra_steps_without_matching_outcome() {
        let mut context = ctx(2, &["navigate", "click_at", "click_at", "type_text_at"]);
        context.reference_final_location = Some("https://a.test/done".into());
        context.actual_final_location = Some("https://a.test/other".into());
        let result = check_step_count(&context);
        assert!(!result.valid);
        assert_eq!(result.kind, DriftKind::ExtraSteps);
        assert_eq!(result.details["extra_steps"], json!(["click_at", "type_text_at"]));
    }

    #[test]
    fn fewer_steps_are_fine() {
        let result = check_step_count(&ctx(6, &["a"]));
        assert!(result.valid);
        assert_eq!(result.details["missing_steps"], json!(5));
    }

    #[test]
    fn mixed_excess_is_a_mismatch() {
        let context = GuardrailContext {
            reference_actions: BTreeMap::from([("click_at".to_string(), 1)]),
            actual_actions: BTreeMap::from([
                ("click_at".to_string(), 2),
                ("scroll_document".to_string(), 1),
            ]),
            ..GuardrailContext::default()
        };
        let result = check_action_sequence(&context);
        assert!(!result.valid);
        assert_eq!(result.kind, DriftKind::SequenceMismatch);
    }

    #[test]
    fn double_click_excess_is_a_mismatch() {
        let context = GuardrailContext {
            reference_actions: BTreeMap::from([("click_at".to_string(), 1)]),
            actual_actions: BTreeMap::from([("click_at".to_string(), 3)]),
            ..GuardrailContext::default()
        };
        assert_eq!(check_action_sequence(&context).kind, DriftKind::SequenceMismatch);
    }
}
