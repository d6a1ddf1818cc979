//! Core error type for the cascade engine.
//!
//! `CoreError` is used throughout the core domain (stores, transition
//! engine, claim manager, patrol runner). Variants the patrol runner
//! branches on carry structured fields instead of pre-formatted strings.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Work item not found: {0}")]
    NotFound(String),

    #[error("Unknown cascade: {0}")]
    UnknownCascade(String),

    #[error("Invalid cascade definition: {0}")]
    InvalidCascade(String),

    #[error("Cascade already exists: {0}")]
    DuplicateCascade(String),

    #[error("Stage '{stage}' is not part of cascade '{cascade}'")]
    InvalidStage { cascade: String, stage: String },

    #[error("Work item {0} is already at the terminal stage of its cascade")]
    AlreadyTerminal(String),

    #[error("Work item {id} is already claimed by '{owner}'")]
    AlreadyClaimed { id: String, owner: String },

    #[error("Executor failure: {0}")]
    Executor(String),
}

impl CoreError {
    /// True for the lost-claim-race outcome, which is expected under
    /// concurrent patrols and must not be reported as an error.
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, CoreError::AlreadyClaimed { .. })
    }
}
