//! Span attributes and timing for pipeline runs.

use crate::context::PipelineRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Attributes describing a run, attached to its root span and events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpanAttributes {
    /// Run identifier.
    pub pipeline_id: String,
    /// Requesting user.
    pub user_id: Option<String>,
    /// Caller session.
    pub session_id: Option<String>,
    /// Resolved model.
    pub model: Option<String>,
    /// Number of configured phases.
    pub phase_count: usize,
}

impl PipelineSpanAttributes {
    /// Builds attributes from a request.
    #[must_use]
    pub fn from_request(request: &PipelineRequest, phase_count: usize) -> Self {
        Self {
            pipeline_id: request.id.clone(),
            user_id: request.context.user_id.clone(),
            session_id: request.context.session_id.clone(),
            model: request.options.model.clone(),
            phase_count,
        }
    }

    /// Sets the resolved model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Flattens into dotted keys.
    #[must_use]
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("pipeline.id".to_string(), self.pipeline_id.clone());
        fields.insert("pipeline.phase_count".to_string(), self.phase_count.to_string());
        if let Some(v) = &self.user_id {
            fields.insert("pipeline.user_id".to_string(), v.clone());
        }
        if let Some(v) = &self.session_id {
            fields.insert("pipeline.session_id".to_string(), v.clone());
        }
        if let Some(v) = &self.model {
            fields.insert("pipeline.model".to_string(), v.clone());
        }
        fields
    }

    /// The payload carried by `pipeline.*` events.
    #[must_use]
    pub fn to_event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "pipeline_id": self.pipeline_id,
            "user_id": self.user_id,
            "session_id": self.session_id,
            "model": self.model,
            "phase_count": self.phase_count,
        })
    }
}

/// Attributes describing one phase of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpanAttributes {
    /// Run identifier.
    pub pipeline_id: String,
    /// Phase name.
    pub phase: String,
    /// Phase kind.
    pub kind: String,
    /// Position in the configured phase list.
    pub index: usize,
    /// Outcome, once known.
    pub status: Option<String>,
    /// Attempts made.
    pub attempts: Option<u32>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Error message, if failed.
    pub error: Option<String>,
}

impl PhaseSpanAttributes {
    /// Creates attributes for a phase that is about to start.
    #[must_use]
    pub fn new(
        pipeline_id: impl Into<String>,
        phase: impl Into<String>,
        kind: impl Into<String>,
        index: usize,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            phase: phase.into(),
            kind: kind.into(),
            index,
            ..Default::default()
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the number of attempts.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_secs_f64() * 1000.0);
        self
    }

    /// Sets the error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// The payload carried by `phase.*` events.
    #[must_use]
    pub fn to_event_data(&self) -> serde_json::Value {
        let mut data = serde_json::json!({
            "pipeline_id": self.pipeline_id,
            "phase": self.phase,
            "kind": self.kind,
            "index": self.index,
        });
        if let Some(map) = data.as_object_mut() {
            if let Some(status) = &self.status {
                map.insert("status".to_string(), serde_json::json!(status));
            }
            if let Some(attempts) = self.attempts {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
            }
            if let Some(ms) = self.duration_ms {
                map.insert("duration_ms".to_string(), serde_json::json!(ms));
            }
            if let Some(error) = &self.error {
                map.insert("error".to_string(), serde_json::json!(error));
            }
        }
        data
    }
}

/// Wall-clock timer for a span.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Elapsed time so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// The span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer. Never returns zero, so a phase that ran always shows a duration.
    #[must_use]
    pub fn finish(self) -> Duration {
        self.elapsed().max(Duration::from_nanos(1))
    }
}
