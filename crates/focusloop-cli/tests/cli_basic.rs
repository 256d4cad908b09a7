//! Basic CLI E2E tests.
//!
//! Each test invokes the compiled binary against its own data directory and
//! asserts on the JSON it prints.

use std::path::Path;
use std::process::Command;

fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_focusloop"))
        .env("FOCUSLOOP_DATA_DIR", data_dir)
        .args(args)
        .output()
        .expect("failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout.trim()).expect("expected JSON output")
}

#[test]
fn status_on_a_fresh_dir_is_idle() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["timer", "status"]);
    assert_eq!(code, 0, "timer status failed");

    let snapshot = json(&stdout);
    assert_eq!(snapshot["type"], "state_snapshot");
    assert_eq!(snapshot["mode"], "idle");
    assert_eq!(snapshot["is_running"], false);
}

#[test]
fn warmup_persists_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["timer", "warmup"]);
    assert_eq!(code, 0, "timer warmup failed");
    assert_eq!(json(&stdout)["type"], "warmup_started");

    // A separate process finds the countdown still running.
    let (stdout, _, code) = run_cli(dir.path(), &["timer", "status"]);
    assert_eq!(code, 0, "timer status failed");
    let snapshot = json(&stdout);
    assert_eq!(snapshot["mode"], "warmup");
    assert_eq!(snapshot["is_running"], true);
    let remaining = snapshot["remaining_ms"].as_u64().unwrap();
    assert!(remaining > 0 && remaining <= 15 * 60 * 1_000);
}

#[test]
fn starting_over_an_in_flight_session_is_refused_until_discard() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(dir.path(), &["timer", "warmup"]);
    assert_eq!(code, 0);

    let (_, stderr, code) = run_cli(dir.path(), &["timer", "warmup"]);
    assert_eq!(code, 1, "expected refusal over an in-flight session");
    assert!(stderr.contains("recover"), "stderr was: {stderr}");

    let (stdout, _, code) = run_cli(dir.path(), &["timer", "discard"]);
    assert_eq!(code, 0);
    assert_eq!(json(&stdout)["type"], "recovery_discarded");

    let (stdout, _, code) = run_cli(dir.path(), &["timer", "warmup"]);
    assert_eq!(code, 0, "warmup after discard failed");
    assert_eq!(json(&stdout)["type"], "warmup_started");
}

#[test]
fn pause_resume_stop_cycle() {
    let dir = tempfile::tempdir().unwrap();
    run_cli(dir.path(), &["timer", "focus"]);

    let (stdout, _, code) = run_cli(dir.path(), &["timer", "pause"]);
    assert_eq!(code, 0, "timer pause failed");
    assert_eq!(json(&stdout)["type"], "timer_paused");

    let (stdout, _, code) = run_cli(dir.path(), &["timer", "resume"]);
    assert_eq!(code, 0, "timer resume failed");
    assert_eq!(json(&stdout)["type"], "timer_resumed");

    let (stdout, _, code) = run_cli(dir.path(), &["timer", "stop"]);
    assert_eq!(code, 0, "timer stop failed");
    assert_eq!(json(&stdout)["type"], "timer_stopped");

    let (stdout, _, _) = run_cli(dir.path(), &["timer", "status"]);
    assert_eq!(json(&stdout)["mode"], "idle");

    // The abandoned session is still on record, uncompleted.
    let (stdout, _, code) = run_cli(dir.path(), &["timer", "sessions"]);
    assert_eq!(code, 0, "timer sessions failed");
    let sessions = json(&stdout);
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["completed"], false);
}

#[test]
fn config_set_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["config", "get", "durations.focus_min"]);
    assert_eq!(code, 0, "config get failed");
    assert_eq!(stdout.trim(), "25");

    let (_, _, code) = run_cli(dir.path(), &["config", "set", "durations.focus_min", "50"]);
    assert_eq!(code, 0, "config set failed");

    let (stdout, _, code) = run_cli(dir.path(), &["config", "get", "durations.focus_min"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "50");

    let (_, _, code) = run_cli(dir.path(), &["config", "get", "durations.nope"]);
    assert_eq!(code, 1, "unknown key should fail");
}

#[test]
fn mood_is_recorded_on_new_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["timer", "mood", "calm"]);
    assert_eq!(code, 0, "timer mood failed");
    assert!(stdout.contains("calm"));

    run_cli(dir.path(), &["timer", "focus"]);
    run_cli(dir.path(), &["timer", "stop"]);

    let (stdout, _, _) = run_cli(dir.path(), &["timer", "sessions"]);
    let sessions = json(&stdout);
    assert_eq!(sessions[0]["mood_start"], "calm");
}
