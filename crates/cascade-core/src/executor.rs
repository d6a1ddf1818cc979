//! External executor seam.
//!
//! The patrol runner treats the processing step as an opaque synchronous
//! call/response collaborator: task text in, success/output/error out. The
//! runner owns timeout enforcement; implementations just do the work.
//! `ExecutionSink` is the observability collaborator that records each
//! execution before it starts and its outcome after.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The payload handed to the external executor for one work item.
#[derive(Debug, Clone)]
pub struct ExecutorTask {
    pub work_id: String,
    pub work_title: String,
    /// Processor instructions + item title/content, already assembled.
    pub task_text: String,
}

/// Result of one executor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task to completion. A returned error is equivalent to a
    /// non-success outcome; the runner maps both to `CoreError::Executor`.
    async fn execute(&self, task: &ExecutorTask) -> Result<ExecutionOutcome, CoreError>;
}

/// Final status reported to the execution-record sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

/// Record emitted before an executor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub work_item_title: String,
    pub prompt_prefix: String,
    /// Where the executor's own log output lands, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_location: Option<String>,
    pub execution_type: String,
    pub working_dir: String,
}

/// Pure logging/observability collaborator with no effect on scheduling.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn begin(&self, record: ExecutionRecord) -> Result<String, CoreError>;
    async fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<(), CoreError>;
}

/// Default sink: structured logs via `tracing`.
pub struct TracingSink;

#[async_trait]
impl ExecutionSink for TracingSink {
    async fn begin(&self, record: ExecutionRecord) -> Result<String, CoreError> {
        let execution_id = format!("exec-{}", chrono::Utc::now().timestamp_millis());
        tracing::info!(
            execution_id = %execution_id,
            title = %record.work_item_title,
            execution_type = %record.execution_type,
            prompt_prefix = %record.prompt_prefix,
            "execution started"
        );
        Ok(execution_id)
    }

    async fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<(), CoreError> {
        match status {
            ExecutionStatus::Completed => {
                tracing::info!(execution_id = %execution_id, "execution completed");
            }
            ExecutionStatus::Failed => {
                tracing::warn!(
                    execution_id = %execution_id,
                    error = error.as_deref().unwrap_or("unknown"),
                    "execution failed"
                );
            }
        }
        Ok(())
    }
}
