use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LifecycleError;

/// Outcome of a step or a whole scenario, as reported by the BDD runner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    Pending,
    Undefined,
    Ambiguous,
}

impl StepStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, StepStatus::Passed)
    }

    /// Parse the status names used by cucumber-style runners (any case)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "pending" => Some(Self::Pending),
            "undefined" => Some(Self::Undefined),
            "ambiguous" => Some(Self::Ambiguous),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Pending => "pending",
            Self::Undefined => "undefined",
            Self::Ambiguous => "ambiguous",
        };
        f.write_str(name)
    }
}

/// One completed step, in scenario order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
}

impl StepRecord {
    pub fn new(name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Where a scenario is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    NotStarted,
    Running,
    Finalizing,
    Recorded,
    Reset,
}

impl fmt::Display for ScenarioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Running => "RUNNING",
            Self::Finalizing => "FINALIZING",
            Self::Recorded => "RECORDED",
            Self::Reset => "RESET",
        };
        f.write_str(name)
    }
}

impl ScenarioPhase {
    fn can_advance_to(self, next: ScenarioPhase) -> bool {
        use ScenarioPhase::*;
        matches!(
            (self, next),
            (NotStarted, Running) | (Running, Finalizing) | (Finalizing, Recorded) | (Recorded, Reset)
        )
    }
}

/// Per-scenario state machine guarding hook order
#[derive(Debug, Clone)]
pub struct ScenarioState {
    scenario: String,
    phase: ScenarioPhase,
}

impl ScenarioState {
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            phase: ScenarioPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> ScenarioPhase {
        self.phase
    }

    pub fn advance(&mut self, next: ScenarioPhase) -> Result<(), LifecycleError> {
        if !self.phase.can_advance_to(next) {
            return Err(LifecycleError::InvalidTransition {
                scenario: self.scenario.clone(),
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Fail unless the scenario is currently in `expected`
    pub fn expect(&self, expected: ScenarioPhase, wanted: ScenarioPhase) -> Result<(), LifecycleError> {
        if self.phase != expected {
            return Err(LifecycleError::InvalidTransition {
                scenario: self.scenario.clone(),
                from: self.phase,
                to: wanted,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut state = ScenarioState::new("Login succeeds");
        for next in [
            ScenarioPhase::Running,
            ScenarioPhase::Finalizing,
            ScenarioPhase::Recorded,
            ScenarioPhase::Reset,
        ] {
            state.advance(next).unwrap();
        }
        assert_eq!(state.phase(), ScenarioPhase::Reset);
    }

    #[test]
    fn test_cannot_finalize_unstarted() {
        let mut state = ScenarioState::new("never started");
        let err = state.advance(ScenarioPhase::Finalizing).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                from: ScenarioPhase::NotStarted,
                to: ScenarioPhase::Finalizing,
                ..
            }
        ));
        assert_eq!(state.phase(), ScenarioPhase::NotStarted);
    }

    #[test]
    fn test_status_parse_and_serialize() {
        assert_eq!(StepStatus::parse("PASSED"), Some(StepStatus::Passed));
        assert_eq!(StepStatus::parse("ambiguous"), Some(StepStatus::Ambiguous));
        assert_eq!(StepStatus::parse("unknown"), None);
        assert_eq!(
            serde_json::to_string(&StepRecord::new("nav", StepStatus::Undefined)).unwrap(),
            r#"{"name":"nav","status":"undefined"}"#
        );
    }
}
