//! Cascade Core — transport-agnostic domain logic for the cascade
//! workflow-orchestration engine.
//!
//! Named work items flow through ordered pipeline stages ("cascades"),
//! gated by a dependency graph and processed by autonomous, concurrently
//! running workers ("patrols") that claim items, invoke an external
//! processing step, and advance or complete them.
//!
//! This crate contains the data models, SQLite stores, stage transition
//! engine, claim manager, and the patrol runner. It has no transport
//! dependency; the `cascade` CLI is a thin shell over it.

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod patrol;
pub mod state;
pub mod store;

// Convenience re-exports
pub use db::Database;
pub use error::CoreError;
pub use state::{AppState, AppStateInner};
