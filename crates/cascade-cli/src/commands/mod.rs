//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! cascade-core domain logic through `AppState`.

pub mod cascade;
pub mod dep;
pub mod patrol;
pub mod work;

use std::sync::Arc;

use cascade_core::state::AppState;

/// Initialize a shared `AppState` from the given SQLite database path.
pub fn init_state(db_path: &str) -> AppState {
    let db = cascade_core::Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Failed to open database '{}': {}", db_path, e);
        std::process::exit(1);
    });
    Arc::new(cascade_core::AppStateInner::new(db))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Serialize a model and pretty-print it.
pub fn print_model<T: serde::Serialize>(model: &T) {
    match serde_json::to_value(model) {
        Ok(v) => print_json(&v),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}
