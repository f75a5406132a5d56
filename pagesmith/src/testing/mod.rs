//! Testing utilities for pagesmith pipelines.
//!
//! This module provides:
//! - Scripted phases and stub collaborators
//! - Request fixtures and prebuilt orchestrators
//! - Assertions over pipeline results

pub mod assertions;
pub mod fixtures;
pub mod mocks;

pub use assertions::{
    assert_phase_names, assert_pipeline_failed_with, assert_pipeline_succeeded,
    assert_timing_consistent,
};
pub use fixtures::{
    data_url_request, fast_config, fast_retry, png_request, request_without_enhancement,
    sample_png, sample_png_data_url, standard_stub_builder, stub_services,
};
pub use mocks::{ScriptedFailure, ScriptedPhase, StubContentGenerator, StubContentRefiner};
