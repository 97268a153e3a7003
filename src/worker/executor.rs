use std::process::Stdio;
use tokio::process::Command;

/// Result of running one job command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub job_id: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Combined stdout followed by stderr
    pub output: String,
    /// Failure detail; `None` on success
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Text persisted on the job for a failed attempt.
    pub fn failure_detail(&self) -> &str {
        self.error.as_deref().unwrap_or(&self.output)
    }
}

/// Runs job commands as `<shell> -c <command>` subprocesses.
///
/// There is no sandboxing: the command inherits the worker's user,
/// environment and working directory.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Run the command to completion. Never cancelled midway.
    pub async fn execute(&self, job_id: &str, command: &str) -> ExecutionResult {
        tracing::debug!(job_id, command, shell = %self.shell, "Executing job");

        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(job_id, result)
    }

    fn process_output(
        job_id: &str,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code();
                let combined = format!("{stdout}{stderr}");

                let error = if output.status.success() {
                    None
                } else if !stderr.trim().is_empty() {
                    Some(stderr.to_string())
                } else {
                    Some(match exit_code {
                        Some(code) => format!("Command exited with status {code}"),
                        None => "Command terminated by signal".to_string(),
                    })
                };

                tracing::debug!(
                    job_id,
                    success = error.is_none(),
                    exit_code = ?exit_code,
                    "Job command finished"
                );

                ExecutionResult {
                    job_id: job_id.to_string(),
                    success: error.is_none(),
                    exit_code,
                    output: combined,
                    error,
                }
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to spawn job command");
                ExecutionResult {
                    job_id: job_id.to_string(),
                    success: false,
                    exit_code: None,
                    output: String::new(),
                    error: Some(format!("Failed to spawn command: {e}")),
                }
            }
        }
    }
}
