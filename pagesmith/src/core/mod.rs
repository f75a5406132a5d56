//! Core domain model types for pagesmith.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Phase kind, run status and run state enums
//! - The payload passed between phases
//! - Phase and pipeline result types

mod data;
mod result;
mod status;

pub use data::{
    AnalyzedDesign, ContentSection, GeneratedContent, ImageFormat, ImageMetadata, InputPayload,
    IssueSeverity, ModulePackage, PackageFile, PhaseData, SectionPlan, ValidationIssue,
    ValidationReport,
};
pub use result::{PhaseResult, PipelineResult};
pub use status::{PhaseKind, RunState, RunStatus};
