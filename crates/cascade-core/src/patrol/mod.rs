//! Patrol runner: the autonomous worker loop.
//!
//! A patrol polls for ready work, claims one item at a time, hands it to
//! the external executor, and advances or completes it. Any number of
//! patrols may run concurrently against one shared store; mutual exclusion
//! comes entirely from the claim manager's atomic compare-and-set, so a
//! lost claim race here is an expected outcome and is skipped silently.
//!
//! Failure handling is local-only: a failed item is released, stays
//! unclaimed, and is re-offered by the next poll (at-least-once).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::engine::TransitionEngine;
use crate::error::CoreError;
use crate::executor::{
    ExecutionRecord, ExecutionStatus, ExecutorTask, ExecutionSink, TaskExecutor, TracingSink,
};
use crate::models::work::WorkItem;
use crate::store::{CascadeStore, ClaimManager, ListWorkFilter, WorkStore};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_ITEMS: usize = 1;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Heavyweight stages get at least this much executor time.
pub const HEAVY_TIMEOUT_FLOOR: Duration = Duration::from_secs(30 * 60);
/// Bound on the retained error history.
pub const MAX_RECENT_ERRORS: usize = 20;

/// Configuration for one patrol instance.
#[derive(Debug, Clone)]
pub struct PatrolConfig {
    /// Claim identity; also recorded as `transitioned_by` on advances.
    pub name: String,
    pub cascade: Option<String>,
    pub stage: Option<String>,
    pub poll_interval: Duration,
    pub max_items: usize,
    /// Base executor timeout for non-heavy stages.
    pub timeout: Duration,
    pub dry_run: bool,
    pub max_iterations: Option<u64>,
    /// When set, claims older than this are reclaimed at each poll.
    pub claim_ttl: Option<Duration>,
}

impl PatrolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cascade: None,
            stage: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_items: DEFAULT_MAX_ITEMS,
            timeout: DEFAULT_TIMEOUT,
            dry_run: false,
            max_iterations: None,
            claim_ttl: None,
        }
    }
}

/// Run statistics for one patrol. `recent_errors` is bounded; the oldest
/// entry is evicted once the cap is reached.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatrolStats {
    pub iterations: u64,
    pub polled: u64,
    pub processed: u64,
    pub advanced: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped_claims: u64,
    pub reclaimed: u64,
    pub recent_errors: VecDeque<String>,
}

impl PatrolStats {
    pub fn record_error(&mut self, error: impl Into<String>) {
        if self.recent_errors.len() >= MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(error.into());
    }
}

/// What `process_one` did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessOutcome {
    /// Moved to the next stage (with or without an executor call).
    Advanced,
    /// Reached the terminal stage via `done`.
    Completed,
    /// Dry-run: intent logged, no state change.
    DryRun,
}

pub struct PatrolRunner {
    config: PatrolConfig,
    work: WorkStore,
    cascades: CascadeStore,
    claims: ClaimManager,
    engine: TransitionEngine,
    executor: Arc<dyn TaskExecutor>,
    sink: Arc<dyn ExecutionSink>,
    stats: PatrolStats,
    stop: Arc<AtomicBool>,
}

impl PatrolRunner {
    pub fn new(
        config: PatrolConfig,
        work: WorkStore,
        cascades: CascadeStore,
        claims: ClaimManager,
        engine: TransitionEngine,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            config,
            work,
            cascades,
            claims,
            engine,
            executor,
            sink: Arc::new(TracingSink),
            stats: PatrolStats::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn stats(&self) -> &PatrolStats {
        &self.stats
    }

    /// Shared flag for requesting a stop. Checked at iteration boundaries;
    /// an in-flight item always finishes before the loop exits.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the poll/claim/process loop until stopped (or until
    /// `max_iterations`, when configured).
    pub async fn run(&mut self) -> Result<(), CoreError> {
        tracing::info!(
            patrol = %self.config.name,
            cascade = self.config.cascade.as_deref().unwrap_or("*"),
            stage = self.config.stage.as_deref().unwrap_or("*"),
            dry_run = self.config.dry_run,
            "patrol started"
        );

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let processed = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    // Store-level trouble is recorded but never kills the
                    // loop; only the stop signal does.
                    tracing::error!(patrol = %self.config.name, error = %e, "poll failed");
                    self.stats.record_error(e.to_string());
                    0
                }
            };

            self.stats.iterations += 1;
            if let Some(max) = self.config.max_iterations {
                if self.stats.iterations >= max {
                    break;
                }
            }

            if processed == 0 {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        tracing::info!(
            patrol = %self.config.name,
            iterations = self.stats.iterations,
            processed = self.stats.processed,
            failed = self.stats.failed,
            "patrol stopped"
        );
        Ok(())
    }

    /// One poll pass: reclaim expired claims (if configured), fetch up to
    /// `max_items` ready items, and claim/process/release each. Returns the
    /// number of items processed (successfully or not).
    pub async fn run_once(&mut self) -> Result<usize, CoreError> {
        if let Some(ttl) = self.config.claim_ttl {
            self.stats.reclaimed += self.claims.release_expired(ttl).await?.len() as u64;
        }

        let candidates = self
            .work
            .ready(ListWorkFilter {
                cascade: self.config.cascade.clone(),
                stage: self.config.stage.clone(),
                project: None,
                include_done: false,
                limit: self.config.max_items,
            })
            .await?;
        self.stats.polled += candidates.len() as u64;

        let mut processed = 0;
        for item in candidates {
            match self.claims.claim(&item.id, &self.config.name).await {
                Ok(_) => {}
                Err(e) if e.is_claim_conflict() => {
                    // Lost the race to another patrol; not an error.
                    tracing::debug!(id = %item.id, "claim lost to another patrol");
                    self.stats.skipped_claims += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }

            let result = self.process_one(&item).await;
            processed += 1;
            self.stats.processed += 1;

            // Release regardless of outcome; a terminal transition already
            // cleared the claim, in which case this is a no-op clear.
            if let Err(e) = self.claims.release(&item.id).await {
                tracing::error!(id = %item.id, error = %e, "failed to release claim");
            }

            match result {
                Ok(ProcessOutcome::Advanced) => self.stats.advanced += 1,
                Ok(ProcessOutcome::Completed) => self.stats.completed += 1,
                Ok(ProcessOutcome::DryRun) => {}
                Err(e) => {
                    self.stats.failed += 1;
                    self.stats.record_error(format!("{}: {}", item.id, e));
                    tracing::warn!(id = %item.id, error = %e, "processing failed");
                }
            }
        }
        Ok(processed)
    }

    /// Debug path: claim, process, and release a single item without
    /// entering the loop.
    pub async fn process_item(&mut self, id: &str) -> Result<ProcessOutcome, CoreError> {
        let item = self
            .work
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        self.claims.claim(&item.id, &self.config.name).await?;
        let result = self.process_one(&item).await;
        if let Err(e) = self.claims.release(&item.id).await {
            tracing::error!(id = %item.id, error = %e, "failed to release claim");
        }
        result
    }

    /// Process one claimed item: resolve its stage processor, invoke the
    /// executor with a stage-dependent timeout, and advance or complete.
    async fn process_one(&mut self, item: &WorkItem) -> Result<ProcessOutcome, CoreError> {
        let cascade = self.cascades.get(&item.cascade).await?;
        let stage = cascade
            .stage(&item.stage)
            .ok_or_else(|| CoreError::InvalidStage {
                cascade: cascade.name.clone(),
                stage: item.stage.clone(),
            })?;

        // Dry run means no state change at all, pass-through stages included.
        if self.config.dry_run {
            tracing::info!(
                id = %item.id,
                stage = %item.stage,
                has_processor = stage.processor.is_some(),
                "[dry-run] would process"
            );
            return Ok(ProcessOutcome::DryRun);
        }

        let processor = match &stage.processor {
            Some(p) => p.clone(),
            None => {
                // A stage with no processor is a pure pass-through.
                tracing::info!(id = %item.id, stage = %item.stage, "no processor, advancing");
                self.engine.advance(&item.id, &self.config.name, None).await?;
                return Ok(ProcessOutcome::Advanced);
            }
        };

        let task = ExecutorTask {
            work_id: item.id.clone(),
            work_title: item.title.clone(),
            task_text: build_task_text(&processor, item),
        };

        let effective_timeout = if stage.heavy {
            self.config.timeout.max(HEAVY_TIMEOUT_FLOOR)
        } else {
            self.config.timeout
        };

        let execution_id = self
            .sink
            .begin(ExecutionRecord {
                work_item_title: item.title.clone(),
                prompt_prefix: task.task_text.chars().take(80).collect(),
                log_location: None,
                execution_type: "patrol".to_string(),
                working_dir: std::env::current_dir()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|_| ".".to_string()),
            })
            .await?;

        let outcome = match tokio::time::timeout(effective_timeout, self.executor.execute(&task)).await
        {
            Err(_) => Err(CoreError::Executor(format!(
                "timed out after {}s",
                effective_timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(CoreError::Executor(e.to_string())),
            Ok(Ok(outcome)) if !outcome.success => Err(CoreError::Executor(
                outcome
                    .error
                    .unwrap_or_else(|| "executor reported failure".to_string()),
            )),
            Ok(Ok(outcome)) => Ok(outcome),
        };

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                self.sink
                    .finish(&execution_id, ExecutionStatus::Failed, Some(e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        self.sink
            .finish(&execution_id, ExecutionStatus::Completed, None)
            .await?;

        match cascade.next_stage(&item.stage) {
            Some(_) => {
                self.engine
                    .advance(&item.id, &self.config.name, Some(outcome.output))
                    .await?;
                Ok(ProcessOutcome::Advanced)
            }
            None => {
                let pr = extract_pr_reference(&outcome.output);
                self.engine.done(&item.id, pr, None).await?;
                Ok(ProcessOutcome::Completed)
            }
        }
    }
}

/// Assemble the text handed to the executor: processor instructions
/// followed by the item itself.
fn build_task_text(processor: &str, item: &WorkItem) -> String {
    let mut text = format!("{}\n\n# {}\n", processor, item.title);
    if !item.content.is_empty() {
        text.push_str(&format!("\n{}\n", item.content));
    }
    text
}

static PR_PATTERNS: std::sync::LazyLock<Vec<regex::Regex>> = std::sync::LazyLock::new(|| {
    [
        r"(?i)pull[- ]request\s*#(\d+)",
        r"(?i)\bpr\s*#(\d+)",
        r"(?i)\bpr:\s*#?(\d+)",
    ]
    .iter()
    .map(|p| regex::Regex::new(p).unwrap())
    .collect()
});

/// Scan executor output for a pull-request reference. Only a small fixed
/// set of patterns is recognized.
pub fn extract_pr_reference(output: &str) -> Option<i64> {
    for re in PR_PATTERNS.iter() {
        if let Some(caps) = re.captures(output) {
            if let Ok(n) = caps[1].parse() {
                return Some(n);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_pr_reference() {
        assert_eq!(extract_pr_reference("Opened PR #42 for review"), Some(42));
        assert_eq!(extract_pr_reference("see pull request #7"), Some(7));
        assert_eq!(extract_pr_reference("pull-request #123 merged"), Some(123));
        assert_eq!(extract_pr_reference("PR: #9"), Some(9));
        assert_eq!(extract_pr_reference("no reference here"), None);
        assert_eq!(extract_pr_reference("premature #1"), None);
    }

    #[test]
    fn test_recent_errors_bounded() {
        let mut stats = PatrolStats::default();
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            stats.record_error(format!("error {}", i));
        }
        assert_eq!(stats.recent_errors.len(), MAX_RECENT_ERRORS);
        // Oldest entries evicted first.
        assert_eq!(stats.recent_errors.front().unwrap(), "error 5");
        assert_eq!(
            stats.recent_errors.back().unwrap(),
            &format!("error {}", MAX_RECENT_ERRORS + 4)
        );
    }

    #[test]
    fn test_task_text_includes_processor_and_content() {
        let item = WorkItem {
            id: "x-1".to_string(),
            title: "Fix login".to_string(),
            content: "Users cannot log in".to_string(),
            cascade: "default".to_string(),
            stage: "implementing".to_string(),
            priority: 3,
            item_type: "task".to_string(),
            parent_id: None,
            project: None,
            pr_number: None,
            output_doc_id: None,
            claimed_by: None,
            claimed_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            is_blocked: false,
            blocked_by: Vec::new(),
        };
        let text = build_task_text("Implement the fix.", &item);
        assert!(text.starts_with("Implement the fix."));
        assert!(text.contains("# Fix login"));
        assert!(text.contains("Users cannot log in"));
    }
}
