//! Scripted phases and stub collaborators for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::context::{PhaseContext, PipelineOptions};
use crate::core::{ContentSection, PhaseData, PhaseKind};
use crate::errors::PhaseError;
use crate::phases::Phase;
use crate::services::{
    ContentGenerator, ContentRefiner, GeneratedSection, GenerationRequest, RefinementRequest,
};

/// How a [`ScriptedPhase`] fails its scripted attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Return a retryable execution error.
    Execution,
    /// Return a non-retryable validation error from `execute`.
    Validation,
    /// Panic inside `execute`.
    Panic,
}

/// A phase whose behaviour is scripted per attempt.
///
/// By default it succeeds on the first call and hands its input through.
#[derive(Debug)]
pub struct ScriptedPhase {
    name: String,
    kind: PhaseKind,
    failures: u32,
    failure: ScriptedFailure,
    reject_input: Option<String>,
    delay: Option<Duration>,
    requires_enhancement: bool,
    quality: f64,
    warnings: Vec<String>,
    output: Option<PhaseData>,
    fallback: Option<PhaseData>,
    calls: AtomicU32,
    attempts_seen: Mutex<Vec<u32>>,
}

impl ScriptedPhase {
    /// A phase that always succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PhaseKind::Custom,
            failures: 0,
            failure: ScriptedFailure::Execution,
            reject_input: None,
            delay: None,
            requires_enhancement: false,
            quality: 1.0,
            warnings: Vec::new(),
            output: None,
            fallback: None,
            calls: AtomicU32::new(0),
            attempts_seen: Mutex::new(Vec::new()),
        }
    }

    /// Fails the first `n` calls with a retryable error, then succeeds.
    #[must_use]
    pub fn failing_times(mut self, n: u32) -> Self {
        self.failures = n;
        self
    }

    /// Fails every call.
    #[must_use]
    pub fn always_failing(self) -> Self {
        self.failing_times(u32::MAX)
    }

    /// Sets how scripted failures manifest.
    #[must_use]
    pub fn with_failure(mut self, failure: ScriptedFailure) -> Self {
        self.failure = failure;
        self
    }

    /// Rejects every input in `validate_input`.
    #[must_use]
    pub fn rejecting_input(mut self, message: impl Into<String>) -> Self {
        self.reject_input = Some(message.into());
        self
    }

    /// Waits before each attempt. The wait ends early on cancellation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Enabled only when the request allows enhancement.
    #[must_use]
    pub fn requires_enhancement(mut self) -> Self {
        self.requires_enhancement = true;
        self
    }

    /// Sets the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: PhaseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the quality score reported for any output.
    #[must_use]
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    /// Adds a warning reported for any output.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Returns `output` on success instead of the input.
    #[must_use]
    pub fn with_output(mut self, output: PhaseData) -> Self {
        self.output = Some(output);
        self
    }

    /// Returns `output` as the fallback instead of the input.
    #[must_use]
    pub fn with_fallback(mut self, output: PhaseData) -> Self {
        self.fallback = Some(output);
        self
    }

    /// Number of `execute` calls so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Attempt numbers passed in the context of each call.
    #[must_use]
    pub fn attempts_seen(&self) -> Vec<u32> {
        self.attempts_seen.lock().clone()
    }
}

#[async_trait]
impl Phase for ScriptedPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PhaseKind {
        self.kind
    }

    fn is_enabled(&self, options: &PipelineOptions) -> bool {
        !self.requires_enhancement || options.enable_enhancement
    }

    fn validate_input(&self, _input: &PhaseData, _ctx: &PhaseContext) -> Result<(), PhaseError> {
        match &self.reject_input {
            Some(message) => Err(PhaseError::validation(&self.name, message.clone())),
            None => Ok(()),
        }
    }

    async fn execute(&self, input: &PhaseData, ctx: &PhaseContext) -> Result<PhaseData, PhaseError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempts_seen.lock().push(ctx.attempt());

        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancel_token().cancelled() => {}
            }
            ctx.checkpoint()?;
        }

        if call <= self.failures {
            return match self.failure {
                ScriptedFailure::Execution => Err(PhaseError::execution(
                    &self.name,
                    format!("scripted failure {call}"),
                )),
                ScriptedFailure::Validation => Err(PhaseError::validation(
                    &self.name,
                    format!("scripted rejection {call}"),
                )),
                ScriptedFailure::Panic => panic!("scripted panic {call}"),
            };
        }

        Ok(self.output.clone().unwrap_or_else(|| input.clone()))
    }

    fn calculate_quality_score(&self, _output: &PhaseData) -> f64 {
        self.quality
    }

    fn get_warnings(&self, _output: &PhaseData, _ctx: &PhaseContext) -> Vec<String> {
        self.warnings.clone()
    }

    fn create_fallback_result(&self, input: &PhaseData, _ctx: &PhaseContext) -> PhaseData {
        self.fallback.clone().unwrap_or_else(|| input.clone())
    }
}

/// A generator that answers locally with fixed-quality markup.
#[derive(Debug)]
pub struct StubContentGenerator {
    quality: f64,
    failing_sections: HashSet<String>,
    calls: AtomicU32,
}

impl StubContentGenerator {
    /// Generates every section at `quality`.
    #[must_use]
    pub fn new(quality: f64) -> Self {
        Self {
            quality,
            failing_sections: HashSet::new(),
            calls: AtomicU32::new(0),
        }
    }

    /// Fails generation for the section with this id.
    #[must_use]
    pub fn failing_section(mut self, id: impl Into<String>) -> Self {
        self.failing_sections.insert(id.into());
        self
    }

    /// Number of sections requested so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubContentGenerator {
    fn default() -> Self {
        Self::new(0.9)
    }
}

#[async_trait]
impl ContentGenerator for StubContentGenerator {
    async fn generate_section(&self, request: &GenerationRequest) -> anyhow::Result<GeneratedSection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = &request.section.id;
        if self.failing_sections.contains(id) {
            anyhow::bail!("stub generator refused section '{id}'");
        }
        Ok(GeneratedSection {
            html: format!("<section class=\"{id}\"><h2>{}</h2></section>", request.section.name),
            css: format!(".{id} {{ display: block; }}"),
            quality: Some(self.quality),
        })
    }
}

/// A refiner that lifts every section to a fixed quality.
#[derive(Debug)]
pub struct StubContentRefiner {
    quality: f64,
    calls: AtomicU32,
}

impl StubContentRefiner {
    /// Refines every section to `quality`.
    #[must_use]
    pub fn new(quality: f64) -> Self {
        Self {
            quality,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of sections refined so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubContentRefiner {
    fn default() -> Self {
        Self::new(0.95)
    }
}

#[async_trait]
impl ContentRefiner for StubContentRefiner {
    async fn refine_section(&self, request: &RefinementRequest) -> anyhow::Result<GeneratedSection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ContentSection { html, css, .. } = &request.section;
        Ok(GeneratedSection {
            html: html.replace("<section", "<section data-refined=\"true\""),
            css: css.clone(),
            quality: Some(self.quality),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ImageMetadata, InputPayload, SectionPlan};

    fn input() -> PhaseData {
        PhaseData::Design(InputPayload::image(vec![1, 2, 3], ImageMetadata::new()))
    }

    #[tokio::test]
    async fn test_scripted_phase_fails_then_succeeds() {
        let phase = ScriptedPhase::new("flaky").failing_times(2);
        let ctx = PhaseContext::new("p1", "flaky");

        assert!(phase.execute(&input(), &ctx).await.unwrap_err().is_retryable());
        assert!(phase.execute(&input(), &ctx.for_attempt(2)).await.is_err());
        assert_eq!(phase.execute(&input(), &ctx.for_attempt(3)).await.unwrap(), input());
        assert_eq!(phase.calls(), 3);
        assert_eq!(phase.attempts_seen(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_scripted_validation_failure() {
        let phase = ScriptedPhase::new("strict")
            .always_failing()
            .with_failure(ScriptedFailure::Validation);
        let ctx = PhaseContext::new("p1", "strict");
        assert!(!phase.execute(&input(), &ctx).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_scripted_delay_observes_cancellation() {
        let phase = ScriptedPhase::new("slow").with_delay(Duration::from_secs(30));
        let ctx = PhaseContext::new("p1", "slow");
        ctx.cancel_token().cancel("stop");

        let err = phase.execute(&input(), &ctx).await.unwrap_err();
        assert_eq!(err, PhaseError::cancelled("slow", "stop"));
    }

    #[test]
    fn test_requires_enhancement() {
        let phase = ScriptedPhase::new("enhance").requires_enhancement();
        assert!(phase.is_enabled(&PipelineOptions::new()));
        assert!(!phase.is_enabled(&PipelineOptions::new().with_enhancement(false)));
    }

    #[tokio::test]
    async fn test_stub_generator() {
        let generator = StubContentGenerator::new(0.7).failing_section("hero");
        let mut request = GenerationRequest {
            pipeline_id: "p1".to_string(),
            model: "m".to_string(),
            title: "t".to_string(),
            section: SectionPlan {
                id: "header".to_string(),
                name: "Header".to_string(),
                order: 0,
            },
            image_base64: String::new(),
            fingerprint: String::new(),
        };
        let section = generator.generate_section(&request).await.unwrap();
        assert_eq!(section.quality, Some(0.7));
        assert!(section.html.contains("Header"));

        request.section.id = "hero".to_string();
        assert!(generator.generate_section(&request).await.is_err());
        assert_eq!(generator.calls(), 2);
    }
}
