//! Lifecycle events emitted by the orchestrator.
//!
//! Sinks are passed to the orchestrator explicitly; there is no process-wide
//! sink. Event names are listed in [`names`].

mod sink;

pub use sink::{CallbackEventSink, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod names {
    /// A run passed request validation and was registered.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// Every enabled phase finished.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// The run stopped on an error.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// The run stopped at a cancellation checkpoint.
    pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
    /// A phase is about to run its first attempt.
    pub const PHASE_STARTED: &str = "phase.started";
    /// A phase attempt failed and another one is scheduled.
    pub const PHASE_RETRYING: &str = "phase.retrying";
    /// A phase produced output.
    pub const PHASE_COMPLETED: &str = "phase.completed";
    /// A phase exhausted its retries and its fallback was used.
    pub const PHASE_DEGRADED: &str = "phase.degraded";
    /// A phase failed and stopped the run.
    pub const PHASE_FAILED: &str = "phase.failed";
    /// A phase was disabled for this request.
    pub const PHASE_SKIPPED: &str = "phase.skipped";
}
