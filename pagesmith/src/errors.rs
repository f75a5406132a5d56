//! Error types for the pagesmith orchestration core.
//!
//! Phases return [`PhaseError`]; the orchestrator is the only place that
//! turns those into a [`PipelineError`] attached to the final result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors a phase reports back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseError {
    /// The phase rejected its input. Never retried.
    #[error("invalid input for phase '{phase}': {message}")]
    Validation {
        /// Phase name.
        phase: String,
        /// What was wrong with the input.
        message: String,
    },

    /// A single execution attempt failed. Retryable.
    #[error("phase '{phase}' execution failed: {message}")]
    Execution {
        /// Phase name.
        phase: String,
        /// Failure description.
        message: String,
    },

    /// A single execution attempt exceeded its deadline. Retryable.
    #[error("phase '{phase}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Phase name.
        phase: String,
        /// The per-attempt deadline that was exceeded.
        timeout_ms: u64,
    },

    /// The phase observed a cancellation request at one of its checkpoints.
    #[error("phase '{phase}' cancelled: {reason}")]
    Cancelled {
        /// Phase name.
        phase: String,
        /// Cancellation reason.
        reason: String,
    },
}

impl PhaseError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Creates an execution error.
    #[must_use]
    pub fn execution(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(phase: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            phase: phase.into(),
            timeout_ms,
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            phase: phase.into(),
            reason: reason.into(),
        }
    }

    /// Returns the phase that produced the error.
    #[must_use]
    pub fn phase(&self) -> &str {
        match self {
            Self::Validation { phase, .. }
            | Self::Execution { phase, .. }
            | Self::Timeout { phase, .. }
            | Self::Cancelled { phase, .. } => phase,
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Timeout { .. })
    }
}

/// Coarse classification of a pipeline failure, for callers that branch on cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself was malformed.
    RequestValidation,
    /// A phase rejected its input.
    PhaseValidation,
    /// A phase failed in a way that was not retried.
    PhaseExecution,
    /// A phase used up its retry budget.
    PhaseExhausted,
    /// The run was cancelled by the caller.
    Cancelled,
    /// Anything the taxonomy did not anticipate (panics, join failures).
    Unexpected,
    /// Invalid orchestrator configuration.
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestValidation => write!(f, "request_validation"),
            Self::PhaseValidation => write!(f, "phase_validation"),
            Self::PhaseExecution => write!(f, "phase_execution"),
            Self::PhaseExhausted => write!(f, "phase_exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unexpected => write!(f, "unexpected"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// The top-level error recorded on a failed pipeline result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineError {
    /// The request failed validation; no phase ran.
    #[error("invalid pipeline request: {message}")]
    RequestValidation {
        /// What was wrong.
        message: String,
    },

    /// A phase rejected its input.
    #[error("phase '{phase}' rejected its input: {message}")]
    PhaseValidation {
        /// Phase name.
        phase: String,
        /// What was wrong.
        message: String,
    },

    /// A phase failed with an error that is not subject to retry.
    #[error("phase '{phase}' execution failed: {message}")]
    PhaseExecution {
        /// Phase name.
        phase: String,
        /// Failure description.
        message: String,
    },

    /// A phase failed on every attempt it was allowed.
    #[error("phase '{phase}' failed after {attempts} attempt(s): {last_error}")]
    PhaseExhausted {
        /// Phase name.
        phase: String,
        /// Total attempts made.
        attempts: u32,
        /// Message of the final failed attempt.
        last_error: String,
    },

    /// The run stopped at a cancellation checkpoint.
    #[error("pipeline cancelled: {reason}")]
    Cancelled {
        /// Cancellation reason.
        reason: String,
        /// Phase that was running or about to run, if any.
        phase: Option<String>,
    },

    /// An error the orchestrator did not anticipate.
    #[error("unexpected error: {message}")]
    Unexpected {
        /// Failure description.
        message: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },
}

impl PipelineError {
    /// Creates a request validation error.
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self::RequestValidation {
            message: message.into(),
        }
    }

    /// Creates an unexpected error.
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns the failure classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RequestValidation { .. } => ErrorKind::RequestValidation,
            Self::PhaseValidation { .. } => ErrorKind::PhaseValidation,
            Self::PhaseExecution { .. } => ErrorKind::PhaseExecution,
            Self::PhaseExhausted { .. } => ErrorKind::PhaseExhausted,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Unexpected { .. } => ErrorKind::Unexpected,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Returns the phase the error is attributed to, if any.
    #[must_use]
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::PhaseValidation { phase, .. }
            | Self::PhaseExecution { phase, .. }
            | Self::PhaseExhausted { phase, .. } => Some(phase),
            Self::Cancelled { phase, .. } => phase.as_deref(),
            _ => None,
        }
    }

    /// Converts to a dictionary representation for event payloads.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(phase) = self.phase() {
            map.insert("phase".to_string(), serde_json::json!(phase));
        }
        map
    }
}

impl From<PhaseError> for PipelineError {
    /// Maps a non-retried phase error onto the pipeline taxonomy.
    ///
    /// Exhaustion is not derivable from a single error, the orchestrator
    /// builds [`PipelineError::PhaseExhausted`] itself.
    fn from(err: PhaseError) -> Self {
        match err {
            PhaseError::Validation { phase, message } => Self::PhaseValidation { phase, message },
            PhaseError::Execution { phase, message } => Self::PhaseExecution { phase, message },
            PhaseError::Timeout { phase, timeout_ms } => Self::PhaseExecution {
                phase,
                message: format!("timed out after {timeout_ms}ms"),
            },
            PhaseError::Cancelled { phase, reason } => Self::Cancelled {
                reason,
                phase: Some(phase),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_error_retryable() {
        assert!(PhaseError::execution("gen", "503").is_retryable());
        assert!(PhaseError::timeout("gen", 100).is_retryable());
        assert!(!PhaseError::validation("gen", "empty").is_retryable());
        assert!(!PhaseError::cancelled("gen", "user").is_retryable());
    }

    #[test]
    fn test_phase_error_display() {
        let err = PhaseError::validation("input_processing", "image data is empty");
        assert_eq!(
            err.to_string(),
            "invalid input for phase 'input_processing': image data is empty"
        );
        assert_eq!(err.phase(), "input_processing");
    }

    #[test]
    fn test_pipeline_error_kinds() {
        assert_eq!(PipelineError::request("x").kind(), ErrorKind::RequestValidation);
        assert_eq!(PipelineError::unexpected("x").kind(), ErrorKind::Unexpected);
        assert_eq!(PipelineError::config("x").kind(), ErrorKind::Config);

        let exhausted = PipelineError::PhaseExhausted {
            phase: "generation".to_string(),
            attempts: 4,
            last_error: "boom".to_string(),
        };
        assert_eq!(exhausted.kind(), ErrorKind::PhaseExhausted);
        assert_eq!(exhausted.phase(), Some("generation"));
        assert!(exhausted.to_string().contains("4 attempt(s)"));
    }

    #[test]
    fn test_from_phase_error() {
        let err: PipelineError = PhaseError::validation("packaging", "no sections").into();
        assert_eq!(err.kind(), ErrorKind::PhaseValidation);

        let err: PipelineError = PhaseError::cancelled("generation", "user").into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.phase(), Some("generation"));

        let err: PipelineError = PhaseError::timeout("generation", 50).into();
        assert_eq!(err.kind(), ErrorKind::PhaseExecution);
    }

    #[test]
    fn test_pipeline_error_serialization() {
        let err = PipelineError::Cancelled {
            reason: "user requested".to_string(),
            phase: None,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "cancelled");

        let back: PipelineError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_to_dict() {
        let err = PipelineError::PhaseValidation {
            phase: "generation".to_string(),
            message: "no sections".to_string(),
        };
        let dict = err.to_dict();
        assert_eq!(dict.get("kind").unwrap(), "phase_validation");
        assert_eq!(dict.get("phase").unwrap(), "generation");
    }
}
