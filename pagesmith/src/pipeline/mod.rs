//! Pipeline orchestration.
//!
//! This module provides:
//! - The retry policy wrapped around each phase attempt
//! - Per-phase settings and exhaustion policy
//! - The progress and cancellation registry
//! - The orchestrator and its builder

mod builder;
mod orchestrator;
mod progress;
mod retry;
mod spec;


pub use builder::OrchestratorBuilder;
pub use orchestrator::{PipelineOrchestrator, CALLER_CANCEL_REASON};
pub use progress::{ProgressRetention, ProgressSnapshot, ProgressTracker};
pub use retry::{
    BackoffStrategy, JitterStrategy, RetryConfig, RetryNotice, RetryOutcome, RetryPolicy,
    RetryState,
};
pub use spec::{ExhaustionPolicy, PhaseSpec};
