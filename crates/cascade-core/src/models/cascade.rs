use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single step in a cascade pipeline.
///
/// `processor` is free-text processing instructions handed to the external
/// executor; a stage without one is a pure pass-through. `heavy` marks
/// stages that get the long executor timeout floor (instead of matching
/// against a hard-coded list of stage names).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,
    #[serde(default)]
    pub heavy: bool,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processor: None,
            heavy: false,
        }
    }

    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = Some(processor.into());
        self
    }

    pub fn heavy(mut self) -> Self {
        self.heavy = true;
        self
    }
}

/// A named pipeline: an ordered, non-empty list of stages.
///
/// The last stage is terminal; a work item reaching it is complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cascade {
    pub name: String,
    pub description: String,
    pub stages: Vec<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cascade {
    pub fn first_stage(&self) -> &str {
        // stages is validated non-empty on create
        &self.stages[0].name
    }

    pub fn terminal_stage(&self) -> &str {
        &self.stages[self.stages.len() - 1].name
    }

    pub fn is_terminal(&self, stage: &str) -> bool {
        self.terminal_stage() == stage
    }

    pub fn has_stage(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.name == name)
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// The stage after `current`, or `None` if `current` is terminal
    /// (or not part of this cascade at all).
    pub fn next_stage(&self, current: &str) -> Option<&str> {
        let idx = self.stages.iter().position(|s| s.name == current)?;
        self.stages.get(idx + 1).map(|s| s.name.as_str())
    }
}

/// Input for creating a new cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCascadeInput {
    pub name: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub description: String,
}
