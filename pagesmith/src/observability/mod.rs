//! Logging setup and span helpers.

mod logging;
mod tracing;

pub use logging::{init_tracing, LogFormat, DEFAULT_FILTER};
pub use tracing::{PhaseSpanAttributes, PipelineSpanAttributes, SpanTimer};
