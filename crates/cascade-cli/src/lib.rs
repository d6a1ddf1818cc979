//! Cascade CLI — command implementations and the command-based executor.
//!
//! The binary (`main.rs`) parses arguments and dispatches here; everything
//! else lives in `cascade-core`.

pub mod commands;
pub mod executor;
