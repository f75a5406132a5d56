//! Request and per-phase context.
//!
//! - [`PipelineRequest`]: what the caller hands to the orchestrator
//! - [`PipelineOptions`]: model, quality threshold, retry budget, enhancement flag
//! - [`RequestContext`]: who asked and when
//! - [`PhaseContext`]: the view of a run a phase receives, including the cancellation token

mod phase_context;
mod request;

pub use phase_context::{
    PhaseContext, DEFAULT_MAX_CONCURRENT_SUBUNITS, DEFAULT_MODEL, DEFAULT_QUALITY_THRESHOLD,
};
pub use request::{
    normalize_threshold, PipelineOptions, PipelineRequest, RequestContext, MAX_PIPELINE_ID_LEN,
};
