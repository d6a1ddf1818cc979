//! Command-based executor: runs a shell command per work item.
//!
//! The task text is written to the command's stdin; stdout becomes the
//! executor output. A non-zero exit status is a failure with stderr as the
//! error. The work item id and title are exposed via environment variables
//! so wrapper scripts can route or log.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use cascade_core::error::CoreError;
use cascade_core::executor::{ExecutionOutcome, ExecutorTask, TaskExecutor};

pub struct CommandExecutor {
    command: String,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, task: &ExecutorTask) -> Result<ExecutionOutcome, CoreError> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("CASCADE_WORK_ID", &task.work_id)
            .env("CASCADE_WORK_TITLE", &task.work_title)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CoreError::Executor(format!("failed to spawn '{}': {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(task.task_text.as_bytes())
                .await
                .map_err(|e| CoreError::Executor(format!("failed to write task: {}", e)))?;
            // Close stdin so the command sees EOF.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CoreError::Executor(format!("failed to wait for command: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(ExecutionOutcome::success(stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Ok(ExecutionOutcome::failure(if stderr.is_empty() {
                format!("command exited with {}", output.status)
            } else {
                stderr
            }))
        }
    }
}

/// Placeholder used when no `--executor-cmd` is configured. Pass-through
/// stages and dry runs never reach it; a processor stage does, and fails
/// with a clear message.
pub struct UnconfiguredExecutor;

#[async_trait]
impl TaskExecutor for UnconfiguredExecutor {
    async fn execute(&self, _task: &ExecutorTask) -> Result<ExecutionOutcome, CoreError> {
        Err(CoreError::Executor(
            "no executor configured; pass --executor-cmd or use --dry-run".to_string(),
        ))
    }
}
