//! Per-phase and per-run result types.

use super::{PhaseData, PhaseKind, RunStatus};
use crate::errors::{PhaseError, PipelineError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The outcome of one attempted phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Phase name.
    pub phase: String,
    /// Phase kind.
    pub kind: PhaseKind,
    /// Whether the phase produced usable output.
    pub success: bool,
    /// Output handed to the next phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PhaseData>,
    /// Set iff `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PhaseError>,
    /// Quality score on the phase's own scale.
    pub quality_score: f64,
    /// Soft problems, in the order they were found.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Phase-defined key/value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Time spent on the phase, all attempts and backoff included.
    pub execution_time: Duration,
    /// Failed attempts beyond the first.
    pub retry_count: u32,
    /// True if the output is the phase's fallback result.
    #[serde(default)]
    pub degraded: bool,
}

impl PhaseResult {
    /// Creates a successful result.
    #[must_use]
    pub fn succeeded(
        phase: impl Into<String>,
        kind: PhaseKind,
        output: PhaseData,
        execution_time: Duration,
        retry_count: u32,
    ) -> Self {
        Self {
            phase: phase.into(),
            kind,
            success: true,
            output: Some(output),
            error: None,
            quality_score: 0.0,
            warnings: Vec::new(),
            metadata: HashMap::new(),
            execution_time,
            retry_count,
            degraded: false,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(
        phase: impl Into<String>,
        kind: PhaseKind,
        error: PhaseError,
        execution_time: Duration,
        retry_count: u32,
    ) -> Self {
        Self {
            phase: phase.into(),
            kind,
            success: false,
            output: None,
            error: Some(error),
            quality_score: 0.0,
            warnings: Vec::new(),
            metadata: HashMap::new(),
            execution_time,
            retry_count,
            degraded: false,
        }
    }

    /// Sets the quality score.
    #[must_use]
    pub fn with_quality_score(mut self, score: f64) -> Self {
        self.quality_score = score;
        self
    }

    /// Sets the warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Merges metadata into the result.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Marks the result as produced by a fallback.
    #[must_use]
    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// Execution time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.execution_time.as_secs_f64() * 1000.0
    }
}

/// The outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Overall success.
    pub success: bool,
    /// The request identifier.
    pub pipeline_id: String,
    /// Terminal status of the run.
    pub status: RunStatus,
    /// One entry per attempted phase, in declared order.
    pub phases: Vec<PhaseResult>,
    /// Wall-clock duration of the run.
    pub total_execution_time: Duration,
    /// Set iff `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
    /// Output of the last phase; set iff `success` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<PhaseData>,
}

impl PipelineResult {
    /// Creates a successful result.
    #[must_use]
    pub fn completed(
        pipeline_id: impl Into<String>,
        phases: Vec<PhaseResult>,
        total_execution_time: Duration,
        final_output: PhaseData,
    ) -> Self {
        Self {
            success: true,
            pipeline_id: pipeline_id.into(),
            status: RunStatus::Completed,
            phases,
            total_execution_time,
            error: None,
            final_output: Some(final_output),
        }
    }

    /// Creates an unsuccessful result; cancellation errors yield a `Cancelled` status.
    #[must_use]
    pub fn failed(
        pipeline_id: impl Into<String>,
        phases: Vec<PhaseResult>,
        total_execution_time: Duration,
        error: PipelineError,
    ) -> Self {
        let status = if matches!(error, PipelineError::Cancelled { .. }) {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        };
        Self {
            success: false,
            pipeline_id: pipeline_id.into(),
            status,
            phases,
            total_execution_time,
            error: Some(error),
            final_output: None,
        }
    }

    /// Looks up a phase result by phase name.
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == name)
    }

    /// Sum of the attempted phases' execution times.
    #[must_use]
    pub fn phase_time_sum(&self) -> Duration {
        self.phases.iter().map(|p| p.execution_time).sum()
    }

    /// All warnings, prefixed with the phase that raised them.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.phases
            .iter()
            .flat_map(|p| p.warnings.iter().map(move |w| format!("{}: {}", p.phase, w)))
            .collect()
    }

    /// Mean quality score over successful phases.
    #[must_use]
    pub fn average_quality(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .phases
            .iter()
            .filter(|p| p.success)
            .map(|p| p.quality_score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Names of phases that fell back.
    #[must_use]
    pub fn degraded_phases(&self) -> Vec<&str> {
        self.phases
            .iter()
            .filter(|p| p.degraded)
            .map(|p| p.phase.as_str())
            .collect()
    }
}
