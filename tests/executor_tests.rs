use queuectl::worker::CommandExecutor;

#[tokio::test]
async fn test_execute_simple_command() {
    let executor = CommandExecutor::default();

    let result = executor.execute("job-1", "echo hello").await;

    assert_eq!(result.job_id, "job-1");
    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output, "hello\n");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_execute_empty_output() {
    let executor = CommandExecutor::default();

    let result = executor.execute("job-1", "true").await;

    assert!(result.success);
    assert_eq!(result.output, "");
}

#[tokio::test]
async fn test_execute_large_output() {
    let executor = CommandExecutor::default();

    let result = executor.execute("job-1", "seq 1 1000").await;

    assert!(result.success);
    assert_eq!(result.output.lines().count(), 1000);
}

#[tokio::test]
async fn test_execute_command_failure() {
    let executor = CommandExecutor::default();

    let result = executor.execute("job-1", "exit 1").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(
        result.error.as_deref(),
        Some("Command exited with status 1")
    );
    assert_eq!(result.failure_detail(), "Command exited with status 1");
}

#[tokio::test]
async fn test_execute_command_with_stderr() {
    let executor = CommandExecutor::default();

    let result = executor
        .execute("job-1", "echo 'error message' >&2 && exit 3")
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert!(result.error.as_deref().unwrap().contains("error message"));
    // stderr is part of the combined output as well
    assert!(result.output.contains("error message"));
}

#[tokio::test]
async fn test_output_combines_stdout_then_stderr() {
    let executor = CommandExecutor::default();

    let result = executor.execute("job-1", "echo out; echo err >&2").await;

    assert!(result.success);
    assert_eq!(result.output, "out\nerr\n");
}

#[tokio::test]
async fn test_execute_shell_features() {
    let executor = CommandExecutor::default();

    let result = executor
        .execute("job-1", "X=world; echo \"hello $X\" | tr a-z A-Z")
        .await;

    assert!(result.success);
    assert_eq!(result.output, "HELLO WORLD\n");
}

#[tokio::test]
async fn test_execute_unknown_command_fails() {
    let executor = CommandExecutor::default();

    let result = executor
        .execute("job-1", "definitely-not-a-real-command-xyz")
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(127));
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_spawn_failure_is_a_failed_attempt() {
    let executor = CommandExecutor::new("/nonexistent/shell");

    let result = executor.execute("job-1", "echo hi").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    assert!(result
        .failure_detail()
        .starts_with("Failed to spawn command"));
}
