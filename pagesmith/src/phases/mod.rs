//! The phase contract and the five standard phases.
//!
//! A phase turns one [`PhaseData`] into the next. Phases never retry on
//! their own and never decide whether the run continues after a failure;
//! both belong to the orchestrator.

mod enhancement;
mod fan_out;
mod generation;
mod input;
mod packaging;
mod validation;

pub use enhancement::EnhancementPhase;
pub use fan_out::{fan_out, SubunitOutcome};
pub(crate) use fan_out::panic_message;
pub use generation::GenerationPhase;
pub use input::{InputProcessingPhase, DEFAULT_MAX_IMAGE_BYTES};
pub use packaging::{slugify, PackagingPhase};
pub use validation::ValidationPhase;

use crate::context::{PhaseContext, PipelineOptions};
use crate::core::{PhaseData, PhaseKind};
use crate::errors::PhaseError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;

/// Lifecycle every phase implements.
#[async_trait]
pub trait Phase: Send + Sync + Debug {
    /// Unique name within a pipeline.
    fn name(&self) -> &str;

    /// Which stage of the sequence this is.
    fn kind(&self) -> PhaseKind {
        PhaseKind::Custom
    }

    /// Whether the phase runs for a request with these options.
    fn is_enabled(&self, _options: &PipelineOptions) -> bool {
        true
    }

    /// Rejects structurally invalid input. Cheap and free of side effects.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Validation`]; the orchestrator never retries it.
    fn validate_input(&self, input: &PhaseData, ctx: &PhaseContext) -> Result<(), PhaseError>;

    /// Performs the transformation.
    ///
    /// # Errors
    ///
    /// [`PhaseError::Execution`] and [`PhaseError::Timeout`] are retried;
    /// [`PhaseError::Cancelled`] stops the run.
    async fn execute(&self, input: &PhaseData, ctx: &PhaseContext) -> Result<PhaseData, PhaseError>;

    /// Quality of an output on a 0..=1 scale.
    fn calculate_quality_score(&self, output: &PhaseData) -> f64;

    /// Soft problems with an output.
    fn get_warnings(&self, output: &PhaseData, ctx: &PhaseContext) -> Vec<String>;

    /// Extra key/value data recorded on the phase result.
    fn collect_metadata(&self, _output: &PhaseData) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    /// A minimal valid output used when the orchestrator continues past exhausted retries.
    fn create_fallback_result(&self, input: &PhaseData, ctx: &PhaseContext) -> PhaseData;
}

type PhaseFn = dyn Fn(&PhaseData, &PhaseContext) -> Result<PhaseData, PhaseError> + Send + Sync;

/// A phase backed by a synchronous closure. Validation always passes and the
/// fallback is the unchanged input.
pub struct FnPhase {
    name: String,
    kind: PhaseKind,
    func: Box<PhaseFn>,
}

impl FnPhase {
    /// Wraps `func` as a phase named `name`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&PhaseData, &PhaseContext) -> Result<PhaseData, PhaseError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: PhaseKind::Custom,
            func: Box::new(func),
        }
    }

    /// A phase that hands its input through untouched.
    #[must_use]
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(name, |input, _| Ok(input.clone()))
    }

    /// Sets the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: PhaseKind) -> Self {
        self.kind = kind;
        self
    }
}

impl Debug for FnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPhase")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
impl Phase for FnPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PhaseKind {
        self.kind
    }

    fn validate_input(&self, _input: &PhaseData, _ctx: &PhaseContext) -> Result<(), PhaseError> {
        Ok(())
    }

    async fn execute(&self, input: &PhaseData, ctx: &PhaseContext) -> Result<PhaseData, PhaseError> {
        (self.func)(input, ctx)
    }

    fn calculate_quality_score(&self, _output: &PhaseData) -> f64 {
        1.0
    }

    fn get_warnings(&self, _output: &PhaseData, _ctx: &PhaseContext) -> Vec<String> {
        Vec::new()
    }

    fn create_fallback_result(&self, input: &PhaseData, _ctx: &PhaseContext) -> PhaseData {
        input.clone()
    }
}

/// Wrong-variant error shared by the standard phases.
pub(crate) fn unexpected_input(phase: &str, expected: &str, got: &PhaseData) -> PhaseError {
    PhaseError::validation(
        phase,
        format!("expected {expected} input, got {}", got.variant_name()),
    )
}

/// Maps a collaborator failure onto a retryable phase error.
pub(crate) fn collaborator_error(phase: &str, what: &str, err: &anyhow::Error) -> PhaseError {
    PhaseError::execution(phase, format!("{what}: {err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ImageMetadata, InputPayload};

    fn design() -> PhaseData {
        PhaseData::Design(InputPayload::image(vec![1, 2, 3], ImageMetadata::new()))
    }

    #[tokio::test]
    async fn test_fn_phase_executes_closure() {
        let phase = FnPhase::new("fail", |_, ctx| {
            Err(PhaseError::execution(ctx.phase_name(), "nope"))
        })
        .with_kind(PhaseKind::Generation);

        assert_eq!(phase.name(), "fail");
        assert_eq!(phase.kind(), PhaseKind::Generation);
        let ctx = PhaseContext::new("p1", "fail");
        let err = phase.execute(&design(), &ctx).await.unwrap_err();
        assert_eq!(err, PhaseError::execution("fail", "nope"));
    }

    #[tokio::test]
    async fn test_passthrough_defaults() {
        let phase = FnPhase::passthrough("noop");
        let ctx = PhaseContext::new("p1", "noop");
        let input = design();

        assert!(phase.is_enabled(&PipelineOptions::default()));
        assert!(phase.validate_input(&input, &ctx).is_ok());
        assert_eq!(phase.execute(&input, &ctx).await.unwrap(), input);
        assert_eq!(phase.create_fallback_result(&input, &ctx), input);
        assert!(phase.collect_metadata(&input).is_empty());
    }

    #[test]
    fn test_unexpected_input_message() {
        let err = unexpected_input("generation", "analyzed", &design());
        assert_eq!(
            err,
            PhaseError::validation("generation", "expected analyzed input, got design")
        );
    }
}
