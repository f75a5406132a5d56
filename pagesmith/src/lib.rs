//! # Pagesmith
//!
//! Phase orchestration for turning a design image into a packaged
//! web-content module.
//!
//! Pagesmith provides:
//!
//! - **Phase contract**: a uniform lifecycle (validate, execute, score,
//!   warn, fall back) every stage implements
//! - **Retry policy**: bounded per-phase retry with backoff, jitter and
//!   per-attempt deadlines
//! - **Progress tracking**: a concurrent registry of live run state
//! - **Cooperative cancellation**: per-run tokens checked between phases and
//!   at sub-unit boundaries
//! - **Orchestration**: sequential execution, exhaustion policy and a
//!   uniform [`PipelineResult`](core::PipelineResult)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pagesmith::prelude::*;
//!
//! let orchestrator = PipelineOrchestrator::standard(services, OrchestratorConfig::default())?;
//! let request = PipelineRequest::new("landing-1", InputPayload::image(bytes, ImageMetadata::new()));
//!
//! let result = orchestrator.execute_pipeline(request).await;
//! if let Some(package) = result.final_output.as_ref().and_then(PhaseData::as_package) {
//!     println!("{} files", package.files.len());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod phases;
pub mod pipeline;
pub mod services;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::{PhaseContext, PipelineOptions, PipelineRequest, RequestContext};
    pub use crate::core::{
        ImageMetadata, InputPayload, PhaseData, PhaseKind, PhaseResult, PipelineResult, RunState,
        RunStatus,
    };
    pub use crate::errors::{ErrorKind, PhaseError, PipelineError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::phases::{FnPhase, Phase};
    pub use crate::pipeline::{
        ExhaustionPolicy, OrchestratorBuilder, PhaseSpec, PipelineOrchestrator, ProgressRetention,
        ProgressSnapshot, RetryConfig,
    };
    pub use crate::services::Services;
}
