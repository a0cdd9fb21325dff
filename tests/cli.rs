use assert_cmd::prelude::*;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::process::Command;
use waymark_core_types::{Step, TaskId, WorkflowRecord};

fn waymark(workdir: &Path) -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("waymark");
    let mut cmd = Command::new(bin);
    cmd.current_dir(workdir)
        .env("WAYMARK__MODEL__BACKEND", "mock")
        .env("WAYMARK__ARCHIVE_DIR", workdir.join("archive"))
        .env("WAYMARK__STORE__PATH", workdir.join("store.json"))
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid json on stdout")
}

fn record(goal: &str, actions: &[&str], final_url: &str) -> WorkflowRecord {
    let mut record = WorkflowRecord::for_goal(TaskId::new(), goal);
    for action in actions {
        record.push_step(Step::new(*action, Map::new()).with_url(final_url));
    }
    record
}

#[test]
fn info_reports_effective_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let assert = waymark(dir.path())
        .args(["--output", "json", "info"])
        .assert()
        .success();

    let info = stdout_json(assert.get_output());
    assert_eq!(info["version"], json!(env!("CARGO_PKG_VERSION")));
    assert_eq!(info["model_backend"], json!("mock"));
    assert_eq!(info["max_turns"], json!(20));
}

#[test]
fn guardrail_flags_extra_steps_on_a_different_page() {
    let dir = tempfile::tempdir().unwrap();
    let reference = record(
        "Download the invoice",
        &["navigate", "click_at"],
        "https://billing.test/invoices",
    );
    let actual = record(
        "Download the invoice",
        &["navigate", "click_at", "scroll_document", "click_at", "go_back"],
        "https://billing.test/home",
    );
    let reference_path = dir.path().join("reference.json");
    let actual_path = dir.path().join("actual.json");
    std::fs::write(&reference_path, serde_json::to_vec(&reference).unwrap()).unwrap();
    std::fs::write(&actual_path, serde_json::to_vec(&actual).unwrap()).unwrap();

    let assert = waymark(dir.path())
        .args(["--output", "json", "guardrail", "--reference"])
        .arg(&reference_path)
        .arg("--actual")
        .arg(&actual_path)
        .assert()
        .success();

    let report = stdout_json(assert.get_output());
    assert_eq!(report["drift_detected"], json!(true));
    assert_eq!(report["step_count"]["kind"], json!("extra_steps"));
    assert_eq!(report["step_count"]["details"]["difference"], json!(3));
    assert_eq!(
        report["step_count"]["details"]["extra_steps"],
        json!(["scroll_document", "click_at", "go_back"])
    );
    assert_eq!(report["context_relevance"]["valid"], json!(true));
}

#[test]
fn scripted_run_is_archived_and_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("script.json");
    std::fs::write(
        &script,
        serde_json::to_vec(&json!([
            {"tool_calls": [{"name": "navigate", "args": {"url": "https://portal.test/login"}}],
             "text": "Open the login page"},
            {"text": "The login page is open"}
        ]))
        .unwrap(),
    )
    .unwrap();

    let assert = waymark(dir.path())
        .args(["--output", "json", "run", "Open the portal login page", "--archive", "--script"])
        .arg(&script)
        .assert()
        .success();

    let report = stdout_json(assert.get_output());
    assert_eq!(report["status"], json!("completed"));
    assert_eq!(report["message"], json!("The login page is open"));
    assert!(report["indexed_as"].is_string());

    let archived: Vec<_> = std::fs::read_dir(dir.path().join("archive"))
        .unwrap()
        .collect();
    assert_eq!(archived.len(), 1);
    assert!(dir.path().join("store.json").exists());

    let assert = waymark(dir.path())
        .args(["--output", "json", "recall", "Open the portal login page"])
        .assert()
        .success();
    let recalled = stdout_json(assert.get_output());
    assert_eq!(recalled["reference"]["id"], report["indexed_as"]);
}

#[test]
fn unknown_archive_record_fails() {
    let dir = tempfile::tempdir().unwrap();
    waymark(dir.path())
        .args(["archive", "delete", "missing-record"])
        .assert()
        .failure();
}
