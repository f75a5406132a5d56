//! Per-phase orchestration settings.

use super::retry::RetryConfig;
use crate::phases::Phase;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What the orchestrator does when a phase spends its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Stop the run with a `PhaseExhausted` error.
    #[default]
    Abort,
    /// Use the phase's fallback result and keep going, marking the phase degraded.
    Fallback,
}

/// A phase plus the settings the orchestrator applies around it.
#[derive(Debug, Clone)]
pub struct PhaseSpec {
    /// The phase implementation.
    pub phase: Arc<dyn Phase>,
    /// Retry settings overriding the orchestrator default.
    pub retry: Option<RetryConfig>,
    /// Per-attempt deadline overriding the orchestrator default.
    pub timeout: Option<Duration>,
    /// Behaviour on exhausted retries.
    pub on_exhausted: ExhaustionPolicy,
}

impl PhaseSpec {
    /// Wraps a phase with default settings.
    #[must_use]
    pub fn new(phase: Arc<dyn Phase>) -> Self {
        Self {
            phase,
            retry: None,
            timeout: None,
            on_exhausted: ExhaustionPolicy::Abort,
        }
    }

    /// Overrides retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets a per-attempt deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the exhaustion policy.
    #[must_use]
    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.on_exhausted = policy;
        self
    }

    /// Shorthand for [`ExhaustionPolicy::Fallback`].
    #[must_use]
    pub fn fallback_on_exhaustion(self) -> Self {
        self.with_exhaustion_policy(ExhaustionPolicy::Fallback)
    }

    /// The phase name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.phase.name()
    }
}

impl From<Arc<dyn Phase>> for PhaseSpec {
    fn from(phase: Arc<dyn Phase>) -> Self {
        Self::new(phase)
    }
}
