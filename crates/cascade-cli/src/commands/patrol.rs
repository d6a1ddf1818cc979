//! `cascade patrol` — run an autonomous worker, plus the single-item
//! debug path.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cascade_core::error::CoreError;
use cascade_core::executor::TaskExecutor;
use cascade_core::patrol::{PatrolConfig, PatrolRunner};
use cascade_core::state::AppState;

use super::print_model;
use crate::executor::{CommandExecutor, UnconfiguredExecutor};

fn build_runner(
    state: &AppState,
    config: PatrolConfig,
    executor_cmd: Option<String>,
) -> PatrolRunner {
    let executor: Arc<dyn TaskExecutor> = match executor_cmd {
        Some(cmd) => Arc::new(CommandExecutor::new(cmd)),
        None => Arc::new(UnconfiguredExecutor),
    };
    PatrolRunner::new(
        config,
        state.work_store.clone(),
        state.cascade_store.clone(),
        state.claims.clone(),
        state.engine.clone(),
        executor,
    )
}

/// Run the patrol loop until Ctrl-C (or `--max-iterations`).
pub async fn run(
    state: &AppState,
    config: PatrolConfig,
    executor_cmd: Option<String>,
) -> Result<(), CoreError> {
    let mut runner = build_runner(state, config, executor_cmd);

    // Ctrl-C requests a graceful stop: the in-flight item finishes, then
    // the loop exits at the next iteration boundary.
    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested, finishing current item");
            stop.store(true, Ordering::SeqCst);
        }
    });

    runner.run().await?;
    print_model(runner.stats());
    Ok(())
}

/// Debug path: claim, process, and release a single work item.
pub async fn process(
    state: &AppState,
    id: &str,
    config: PatrolConfig,
    executor_cmd: Option<String>,
) -> Result<(), CoreError> {
    let mut runner = build_runner(state, config, executor_cmd);
    let outcome = runner.process_item(id).await?;
    print_model(&serde_json::json!({ "id": id, "outcome": outcome }));
    Ok(())
}
