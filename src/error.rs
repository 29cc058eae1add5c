//! Error types for the scenario lifecycle

use thiserror::Error;

use crate::runner::state::ScenarioPhase;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Scenario '{scenario}' cannot move from {from} to {to}")]
    InvalidTransition {
        scenario: String,
        from: ScenarioPhase,
        to: ScenarioPhase,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to acquire {stage}: {source}")]
    Acquisition {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("No browser available for this run")]
    NoBrowser,

    #[error("{0} is already closed")]
    AlreadyClosed(&'static str),

    #[error("Grid metadata unavailable: {0}")]
    GridMetadata(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LifecycleError {
    pub fn acquisition(stage: &'static str, source: anyhow::Error) -> Self {
        Self::Acquisition { stage, source }
    }
}
