//! The read-only view of a run that a phase receives.

use super::request::{normalize_threshold, PipelineOptions, RequestContext};
use crate::cancellation::CancellationToken;
use crate::errors::PhaseError;
use std::sync::Arc;

/// Default model when neither the request nor the configuration names one.
pub const DEFAULT_MODEL: &str = "vision-default";

/// Default quality threshold on the 0..=1 scale.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.8;

/// Default limit on concurrent sub-units inside a fan-out phase.
pub const DEFAULT_MAX_CONCURRENT_SUBUNITS: usize = 4;

/// Execution context handed to every phase call.
///
/// Cloning is cheap; the cancellation token is shared with the orchestrator
/// and the progress tracker so a `cancel_pipeline` call is visible here.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pipeline_id: String,
    phase_name: String,
    attempt: u32,
    model: String,
    quality_threshold: f64,
    max_concurrent_subunits: usize,
    options: PipelineOptions,
    request: RequestContext,
    token: Arc<CancellationToken>,
}

impl PhaseContext {
    /// Creates a context with default settings and a fresh token.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, phase_name: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            phase_name: phase_name.into(),
            attempt: 1,
            model: DEFAULT_MODEL.to_string(),
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            max_concurrent_subunits: DEFAULT_MAX_CONCURRENT_SUBUNITS,
            options: PipelineOptions::default(),
            request: RequestContext::default(),
            token: Arc::new(CancellationToken::new()),
        }
    }

    /// Applies request options; the model and threshold override current values when set.
    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        if let Some(model) = &options.model {
            self.model.clone_from(model);
        }
        if let Some(threshold) = options.quality_threshold {
            self.quality_threshold = normalize_threshold(threshold);
        }
        self.options = options;
        self
    }

    /// Sets the model used when the request does not name one.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the quality threshold (either scale).
    #[must_use]
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = normalize_threshold(threshold);
        self
    }

    /// Sets the fan-out concurrency limit; zero is treated as one.
    #[must_use]
    pub fn with_max_concurrent_subunits(mut self, limit: usize) -> Self {
        self.max_concurrent_subunits = limit.max(1);
        self
    }

    /// Sets the caller context.
    #[must_use]
    pub fn with_request_context(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    /// Shares an existing cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// Returns a copy bound to another phase, attempt reset to 1.
    #[must_use]
    pub fn for_phase(&self, phase_name: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.phase_name = phase_name.into();
        ctx.attempt = 1;
        ctx
    }

    /// Returns a copy for the given 1-based attempt.
    #[must_use]
    pub fn for_attempt(&self, attempt: u32) -> Self {
        let mut ctx = self.clone();
        ctx.attempt = attempt;
        ctx
    }

    /// The run identifier.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// The phase this context is bound to.
    #[must_use]
    pub fn phase_name(&self) -> &str {
        &self.phase_name
    }

    /// The current attempt, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The resolved model.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The resolved quality threshold on the 0..=1 scale.
    #[must_use]
    pub fn quality_threshold(&self) -> f64 {
        self.quality_threshold
    }

    /// Concurrency limit for fan-out phases.
    #[must_use]
    pub fn max_concurrent_subunits(&self) -> usize {
        self.max_concurrent_subunits
    }

    /// The raw request options.
    #[must_use]
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// The caller context.
    #[must_use]
    pub fn request_context(&self) -> &RequestContext {
        &self.request
    }

    /// The shared cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Returns whether the run has been asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancellation checkpoint for use inside phases.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Cancelled`] if cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), PhaseError> {
        if self.token.is_cancelled() {
            let reason = self
                .token
                .reason()
                .unwrap_or_else(|| "cancelled".to_string());
            return Err(PhaseError::cancelled(&self.phase_name, reason));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ctx = PhaseContext::new("p1", "generation");
        assert_eq!(ctx.pipeline_id(), "p1");
        assert_eq!(ctx.phase_name(), "generation");
        assert_eq!(ctx.attempt(), 1);
        assert_eq!(ctx.model(), DEFAULT_MODEL);
        assert!((ctx.quality_threshold() - DEFAULT_QUALITY_THRESHOLD).abs() < f64::EPSILON);
    }

    #[test]
    fn test_options_override_configured_values() {
        let ctx = PhaseContext::new("p1", "x")
            .with_model("configured")
            .with_quality_threshold(0.5)
            .with_options(PipelineOptions::new().with_model("requested").with_quality_threshold(90.0));
        assert_eq!(ctx.model(), "requested");
        assert!((ctx.quality_threshold() - 0.9).abs() < 1e-12);

        let ctx = PhaseContext::new("p1", "x")
            .with_model("configured")
            .with_options(PipelineOptions::new());
        assert_eq!(ctx.model(), "configured");
    }

    #[test]
    fn test_for_phase_and_attempt() {
        let ctx = PhaseContext::new("p1", "a").for_attempt(3);
        assert_eq!(ctx.attempt(), 3);
        let next = ctx.for_phase("b");
        assert_eq!(next.phase_name(), "b");
        assert_eq!(next.attempt(), 1);
    }

    #[test]
    fn test_checkpoint_observes_shared_token() {
        let token = Arc::new(CancellationToken::new());
        let ctx = PhaseContext::new("p1", "generation").with_cancel_token(Arc::clone(&token));
        assert!(ctx.checkpoint().is_ok());

        token.cancel("user abort");
        let err = ctx.checkpoint().unwrap_err();
        assert_eq!(err, PhaseError::cancelled("generation", "user abort"));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        let ctx = PhaseContext::new("p", "x").with_max_concurrent_subunits(0);
        assert_eq!(ctx.max_concurrent_subunits(), 1);
    }
}
