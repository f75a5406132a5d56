//! Phase kind, run status and run state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The stage of the design-to-module sequence a phase implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Decodes and analyses the design image.
    InputProcessing,
    /// Produces content for each planned section.
    Generation,
    /// Checks generated content and corrects errors.
    Validation,
    /// Refines low-quality sections.
    Enhancement,
    /// Bundles the content into a distributable module.
    Packaging,
    /// Anything outside the standard sequence.
    Custom,
}

impl Default for PhaseKind {
    fn default() -> Self {
        Self::Custom
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputProcessing => write!(f, "input_processing"),
            Self::Generation => write!(f, "generation"),
            Self::Validation => write!(f, "validation"),
            Self::Enhancement => write!(f, "enhancement"),
            Self::Packaging => write!(f, "packaging"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Externally visible status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Phases are still being executed.
    Running,
    /// Every enabled phase finished.
    Completed,
    /// The run stopped on an error.
    Failed,
    /// The run stopped at a cancellation checkpoint.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Internal state machine of a single run.
///
/// `Created -> Validating -> Running(i) -> ... -> Completed | Failed | Cancelled`,
/// with `Degraded(i)` as a pass-through when a phase falls back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Request accepted, nothing checked yet.
    Created,
    /// Request validation in progress.
    Validating,
    /// Phase `index` is executing.
    Running {
        /// Index into the configured phase list.
        index: usize,
    },
    /// Phase `index` exhausted its retries and was replaced by its fallback.
    Degraded {
        /// Index into the configured phase list.
        index: usize,
    },
    /// All phases done.
    Completed,
    /// Stopped on an error, at phase `index` if one was running.
    Failed {
        /// Phase index, if the failure happened inside a phase.
        index: Option<usize>,
    },
    /// Stopped at a cancellation checkpoint.
    Cancelled,
}

impl RunState {
    /// Returns true for `Completed`, `Failed` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Cancelled)
    }

    /// Checks whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Created, Self::Validating) => true,
            (
                Self::Validating,
                Self::Running { .. } | Self::Failed { index: None } | Self::Cancelled | Self::Completed,
            ) => true,
            (Self::Running { index } | Self::Degraded { index }, Self::Running { index: next }) => {
                next > index
            }
            (Self::Running { index }, Self::Degraded { index: next }) => next == index,
            (Self::Running { .. } | Self::Degraded { .. }, Self::Completed | Self::Cancelled) => {
                true
            }
            (Self::Running { index }, Self::Failed { index: Some(next) }) => next == index,
            (Self::Running { .. } | Self::Degraded { .. }, Self::Failed { index: None }) => true,
            _ => false,
        }
    }

    /// The externally visible status for this state.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Created | Self::Validating | Self::Running { .. } | Self::Degraded { .. } => {
                RunStatus::Running
            }
            Self::Completed => RunStatus::Completed,
            Self::Failed { .. } => RunStatus::Failed,
            Self::Cancelled => RunStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_kind_display() {
        assert_eq!(PhaseKind::InputProcessing.to_string(), "input_processing");
        assert_eq!(PhaseKind::Enhancement.to_string(), "enhancement");
        assert_eq!(PhaseKind::default(), PhaseKind::Custom);
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_run_status_serialize() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, r#""cancelled""#);
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RunState::Created,
            RunState::Validating,
            RunState::Running { index: 0 },
            RunState::Running { index: 1 },
            RunState::Degraded { index: 1 },
            RunState::Running { index: 3 },
            RunState::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!RunState::Completed.can_transition_to(&RunState::Running { index: 0 }));
        assert!(!RunState::Running { index: 2 }.can_transition_to(&RunState::Running { index: 1 }));
        assert!(!RunState::Created.can_transition_to(&RunState::Completed));
        assert!(!RunState::Cancelled.can_transition_to(&RunState::Failed { index: None }));
    }

    #[test]
    fn test_state_status() {
        assert_eq!(RunState::Validating.status(), RunStatus::Running);
        assert_eq!(RunState::Degraded { index: 0 }.status(), RunStatus::Running);
        assert_eq!(RunState::Failed { index: Some(2) }.status(), RunStatus::Failed);
        assert!(RunState::Cancelled.is_terminal());
    }
}
