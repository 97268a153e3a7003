use std::path::Path;
use std::process::{Command, Output};

fn queuectl(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_queuectl"))
        .arg("--db")
        .arg(dir.join("jobs.db"))
        .arg("--pid-file")
        .arg(dir.join("queuectl.pid"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run queuectl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_worker_start_refuses_live_manager() {
    let dir = tempfile::tempdir().unwrap();
    // The test process itself stands in for a running manager
    std::fs::write(dir.path().join("queuectl.pid"), std::process::id().to_string()).unwrap();

    let output = queuectl(dir.path(), &["worker", "start", "--count", "2"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("already running"), "{}", stderr(&output));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("queuectl.pid")).unwrap(),
        std::process::id().to_string()
    );
}

#[test]
fn test_worker_start_rejects_zero_workers() {
    let dir = tempfile::tempdir().unwrap();

    let output = queuectl(dir.path(), &["worker", "start", "--count", "0"]);

    assert!(!output.status.success());
    assert!(!dir.path().join("queuectl.pid").exists());
}

#[test]
fn test_enqueue_then_list_as_json() {
    let dir = tempfile::tempdir().unwrap();

    let output = queuectl(
        dir.path(),
        &["enqueue", r#"{"id":"job1","command":"echo hi"}"#],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("job1"));

    let output = queuectl(dir.path(), &["list", "-o", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let jobs: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(jobs[0]["id"], "job1");
    assert_eq!(jobs[0]["state"], "pending");
    assert_eq!(jobs[0]["attempts"], 0);
}

#[test]
fn test_errors_exit_non_zero() {
    let dir = tempfile::tempdir().unwrap();

    let output = queuectl(dir.path(), &["enqueue", r#"{"id":"x"}"#]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("command"));

    let output = queuectl(dir.path(), &["dlq", "retry", "missing"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("not found"));
}

#[test]
fn test_worker_stop_without_manager() {
    let dir = tempfile::tempdir().unwrap();

    let output = queuectl(dir.path(), &["worker", "stop", "-o", "json"]);

    assert!(output.status.success(), "{}", stderr(&output));
    let reply: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(reply["outcome"], "not_running");
}
