//! CLI tests for `steer`.
//!
//! Spawns the `steer` binary with a shell-script agent and verifies that
//! process exit codes match each loop outcome.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use steer_runner::exit_codes;
use steer_runner::io::init::{InitOptions, SteerPaths, init_workflow};
use steer_runner::io::run_state::{RunStatus, load_state};

fn steer(root: &Path, args: &[&str], agent: Option<&Path>) -> Output {
    steer_with_env(root, args, agent, &[])
}

fn steer_with_env(
    root: &Path,
    args: &[&str],
    agent: Option<&Path>,
    env: &[(&str, &str)],
) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_steer"));
    cmd.args(args)
        .current_dir(root)
        .env("STEER_PROJECT_ROOT", root)
        .env("STEER_ITERATION_PAUSE_SECS", "0")
        .env("STEER_AGENT_FLAGS", "")
        .env_remove("RUST_LOG");
    if let Some(agent) = agent {
        cmd.env("STEER_AGENT_CMD", agent);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.output().expect("spawn steer")
}

#[cfg(unix)]
fn write_agent(root: &Path, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = root.join("agent.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write agent");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod agent");
    path
}

fn init(root: &Path) -> SteerPaths {
    init_workflow(root, &InitOptions { force: false })
        .expect("init")
        .0
}

#[test]
fn run_without_steering_documents_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = steer(temp.path(), &["run", "-i", "1"], None);
    assert_eq!(out.status.code(), Some(exit_codes::FAILURE));
    assert!(String::from_utf8_lossy(&out.stderr).contains("steering document not found"));
}

#[cfg(unix)]
#[test]
fn complete_exit_code_maps_to_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init(temp.path());
    let agent = write_agent(temp.path(), "echo all done\nexit 99");

    let out = steer(temp.path(), &["run", "-i", "5"], Some(&agent));
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&out.stdout).contains("PROJECT COMPLETE"));

    let state = load_state(&paths.state_path).expect("state");
    assert_eq!(state.status, RunStatus::Stopped);
    assert!(paths.log_path.is_file());
}

#[cfg(unix)]
#[test]
fn repeated_failures_escalate_with_failure_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    let agent = write_agent(temp.path(), "exit 1");

    let out = steer(temp.path(), &["run", "-i", "10"], Some(&agent));
    assert_eq!(out.status.code(), Some(exit_codes::FAILURE));
    assert!(String::from_utf8_lossy(&out.stdout).contains("ESCALATION REQUIRED"));
}

#[cfg(unix)]
#[test]
fn unknown_exit_code_is_propagated() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    let agent = write_agent(temp.path(), "exit 7");

    let out = steer(temp.path(), &["run"], Some(&agent));
    assert_eq!(out.status.code(), Some(7));
}

/// Max iterations is a pause, not a failure.
#[cfg(unix)]
#[test]
fn max_iterations_exits_with_paused_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    // Outside a git repository the marker never changes.
    let agent = write_agent(temp.path(), "exit 0");

    let out = steer_with_env(
        temp.path(),
        &["run", "-i", "2"],
        Some(&agent),
        &[("STEER_MAX_NO_PROGRESS", "5")],
    );
    assert_eq!(out.status.code(), Some(exit_codes::PAUSED));
    assert!(String::from_utf8_lossy(&out.stdout).contains("MAX ITERATIONS REACHED"));
}

#[test]
fn stop_file_exits_cleanly_without_running_agent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init(temp.path());
    fs::write(&paths.stop_path, "").expect("write stop");

    let out = steer(
        temp.path(),
        &["run"],
        Some(Path::new("/nonexistent/agent-binary")),
    );
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(!paths.stop_path.exists());
}

#[test]
fn feedback_then_clear() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init(temp.path());

    let out = steer(
        temp.path(),
        &["feedback", "Add dark mode", "-p", "HIGH", "-t", "FEATURE"],
        None,
    );
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let pending = fs::read_to_string(&paths.pending_feedback_path).expect("pending");
    assert!(pending.contains("**Priority:** HIGH"));
    assert!(pending.contains("**Type:** FEATURE"));

    let out = steer(temp.path(), &["feedback", "--clear"], None);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(!paths.pending_feedback_path.exists());
}

#[test]
fn init_and_status_report_waiting_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = steer(temp.path(), &["init"], None);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(SteerPaths::new(temp.path()).product_path.is_file());

    let out = steer(temp.path(), &["status"], None);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let value: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("status prints json");
    assert_eq!(value["status"], "waiting");
    assert_eq!(value["iteration"]["specified"], 50);
}
