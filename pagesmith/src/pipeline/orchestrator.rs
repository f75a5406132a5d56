//! The pipeline orchestrator: runs the configured phases for one request.

use super::builder::OrchestratorBuilder;
use super::progress::{ProgressRetention, ProgressSnapshot, ProgressTracker};
use super::retry::RetryPolicy;
use super::spec::{ExhaustionPolicy, PhaseSpec};
use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::context::{PhaseContext, PipelineOptions, PipelineRequest};
use crate::core::{PhaseData, PhaseResult, PipelineResult, RunState};
use crate::errors::{PhaseError, PipelineError};
use crate::events::{names, EventSink};
use crate::observability::{PhaseSpanAttributes, PipelineSpanAttributes, SpanTimer};
use crate::phases::{
    panic_message, EnhancementPhase, GenerationPhase, InputProcessingPhase, PackagingPhase,
    ValidationPhase,
};
use crate::services::Services;
use crate::utils::duration_ms;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Reason recorded when a caller cancels without giving one.
pub const CALLER_CANCEL_REASON: &str = "cancelled by caller";

/// Why a run stopped before its last phase.
struct Stop {
    error: PipelineError,
    index: Option<usize>,
}

impl Stop {
    fn at(index: usize, error: PipelineError) -> Self {
        Self {
            error,
            index: Some(index),
        }
    }
}

/// Runs an ordered list of phases for each [`PipelineRequest`].
///
/// Phases are shared, read-only configuration; each run owns its data and
/// shares only the progress tracker with concurrent runs.
pub struct PipelineOrchestrator {
    phases: Vec<PhaseSpec>,
    config: OrchestratorConfig,
    events: Arc<dyn EventSink>,
    tracker: Arc<ProgressTracker>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("phases", &self.phase_names())
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub(crate) fn from_parts(
        phases: Vec<PhaseSpec>,
        config: OrchestratorConfig,
        events: Arc<dyn EventSink>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            phases,
            config,
            events,
            tracker,
        }
    }

    /// The standard five-phase sequence: input processing, generation,
    /// validation, enhancement, packaging.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the config is invalid.
    pub fn standard(services: Services, config: OrchestratorConfig) -> Result<Self, PipelineError> {
        Self::standard_builder(services, &config).config(config).build()
    }

    /// A builder preloaded with the standard phases, for callers that also
    /// want to set a sink or tracker.
    #[must_use]
    pub fn standard_builder(services: Services, config: &OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new()
            .phase(Arc::new(InputProcessingPhase::new(config.max_input_bytes)))
            .phase(Arc::new(GenerationPhase::new(services.generator)))
            .phase(Arc::new(
                ValidationPhase::new(services.validator).with_corrector(services.corrector),
            ))
            .phase(Arc::new(EnhancementPhase::new(services.refiner)))
            .phase(Arc::new(PackagingPhase::new(services.packager)))
    }

    /// Phase names in execution order.
    #[must_use]
    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(PhaseSpec::name).collect()
    }

    /// The active config.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The progress registry.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Current progress of a run; `None` if never started or evicted.
    #[must_use]
    pub fn get_progress(&self, pipeline_id: &str) -> Option<ProgressSnapshot> {
        self.tracker.get(pipeline_id)
    }

    /// Requests cooperative cancellation. True iff the run is currently running
    /// and had not been cancelled yet.
    pub fn cancel_pipeline(&self, pipeline_id: &str) -> bool {
        self.tracker.cancel(pipeline_id, CALLER_CANCEL_REASON)
    }

    /// Like [`Self::cancel_pipeline`] with an explicit reason.
    pub fn cancel_pipeline_with_reason(&self, pipeline_id: &str, reason: &str) -> bool {
        self.tracker.cancel(pipeline_id, reason)
    }

    /// Runs every enabled phase for `request`.
    ///
    /// Never fails and never panics: every outcome, including a panicking
    /// phase or event sink, is reported through the returned [`PipelineResult`].
    pub async fn execute_pipeline(&self, request: PipelineRequest) -> PipelineResult {
        let started = Instant::now();
        let pipeline_id = request.id.clone();

        if let Err(error) = request.validate_id() {
            warn!(pipeline_id = %pipeline_id, error = %error, "Rejected pipeline request");
            self.emit_pipeline_end(&pipeline_id, &error).await;
            return PipelineResult::failed(pipeline_id, Vec::new(), started.elapsed(), error);
        }

        let enabled: Vec<usize> = self
            .phases
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.phase.is_enabled(&request.options))
            .map(|(index, _)| index)
            .collect();
        let first = enabled.first().map(|&index| (index, self.phases[index].name()));

        let token = match self.tracker.register(&pipeline_id, enabled.len(), first) {
            Ok(token) => token,
            Err(error) => {
                warn!(pipeline_id = %pipeline_id, error = %error, "Rejected duplicate pipeline");
                self.emit_pipeline_end(&pipeline_id, &error).await;
                return PipelineResult::failed(pipeline_id, Vec::new(), started.elapsed(), error);
            }
        };

        // Past this point the record must reach a terminal state whatever happens.
        let result = match AssertUnwindSafe(self.run_registered(&request, &token, enabled.len(), started))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(pipeline_id = %pipeline_id, error = %message, "Pipeline panicked");
                let error = PipelineError::unexpected(format!("orchestrator panicked: {message}"));
                self.tracker.fail(&pipeline_id, None, &error);
                PipelineResult::failed(&pipeline_id, Vec::new(), started.elapsed(), error)
            }
        };

        if self.config.retention == ProgressRetention::EvictOnCompletion {
            self.tracker.remove_run(&pipeline_id, &token);
        }
        result
    }

    async fn run_registered(
        &self,
        request: &PipelineRequest,
        token: &Arc<CancellationToken>,
        phase_count: usize,
        started: Instant,
    ) -> PipelineResult {
        let pipeline_id = request.id.as_str();

        self.tracker.transition(pipeline_id, RunState::Validating);
        if let Err(error) = request.validate_payload(self.config.max_input_bytes) {
            warn!(pipeline_id = %pipeline_id, error = %error, "Rejected pipeline request");
            self.tracker.fail(pipeline_id, None, &error);
            self.emit_pipeline_end(pipeline_id, &error).await;
            return PipelineResult::failed(pipeline_id, Vec::new(), started.elapsed(), error);
        }

        let base_ctx = PhaseContext::new(pipeline_id, "")
            .with_model(self.config.default_model.clone())
            .with_quality_threshold(self.config.default_quality_threshold)
            .with_max_concurrent_subunits(self.config.max_concurrent_subunits)
            .with_options(request.options.clone())
            .with_request_context(request.context.clone())
            .with_cancel_token(Arc::clone(token));

        let attrs = PipelineSpanAttributes::from_request(request, phase_count)
            .with_model(base_ctx.model());
        info!(
            pipeline_id = %pipeline_id,
            phases = phase_count,
            model = %base_ctx.model(),
            "Pipeline started"
        );
        self.emit(names::PIPELINE_STARTED, Some(attrs.to_event_data())).await;

        let span = tracing::info_span!("pipeline", pipeline_id = %pipeline_id);
        let mut results = Vec::with_capacity(phase_count);
        let outcome = AssertUnwindSafe(self.run_phases(request, &base_ctx, token, &mut results))
            .catch_unwind()
            .instrument(span)
            .await;

        let total = started.elapsed();
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(pipeline_id = %pipeline_id, error = %message, "Pipeline panicked");
                Err(Stop {
                    error: PipelineError::unexpected(format!("orchestrator panicked: {message}")),
                    index: None,
                })
            }
        };

        match outcome {
            Ok(final_output) => {
                self.tracker.complete(pipeline_id);
                info!(
                    pipeline_id = %pipeline_id,
                    phases = results.len(),
                    duration_ms = total.as_secs_f64() * 1000.0,
                    "Pipeline completed"
                );
                self.emit(
                    names::PIPELINE_COMPLETED,
                    Some(json!({
                        "pipeline_id": pipeline_id,
                        "phases": results.len(),
                        "duration_ms": total.as_secs_f64() * 1000.0,
                    })),
                )
                .await;
                PipelineResult::completed(pipeline_id, results, total, final_output)
            }
            Err(Stop { error, index }) => {
                if matches!(error, PipelineError::Cancelled { .. }) {
                    self.tracker.mark_cancelled(pipeline_id, &error);
                    info!(pipeline_id = %pipeline_id, error = %error, "Pipeline cancelled");
                } else {
                    self.tracker.fail(pipeline_id, index, &error);
                    warn!(
                        pipeline_id = %pipeline_id,
                        kind = %error.kind(),
                        error = %error,
                        "Pipeline failed"
                    );
                }
                self.emit_pipeline_end(pipeline_id, &error).await;
                PipelineResult::failed(pipeline_id, results, total, error)
            }
        }
    }

    async fn run_phases(
        &self,
        request: &PipelineRequest,
        base_ctx: &PhaseContext,
        token: &CancellationToken,
        results: &mut Vec<PhaseResult>,
    ) -> Result<PhaseData, Stop> {
        let pipeline_id = request.id.as_str();
        let mut data = PhaseData::Design(request.input.clone());

        for (index, spec) in self.phases.iter().enumerate() {
            let name = spec.name();
            let kind = spec.phase.kind();

            if !spec.phase.is_enabled(&request.options) {
                debug!(pipeline_id = %pipeline_id, phase = %name, "Phase disabled, skipping");
                let event = PhaseSpanAttributes::new(pipeline_id, name, kind.to_string(), index)
                    .with_status("skipped")
                    .to_event_data();
                self.emit(names::PHASE_SKIPPED, Some(event)).await;
                continue;
            }

            if token.is_cancelled() {
                return Err(Stop {
                    error: PipelineError::Cancelled {
                        reason: token.reason().unwrap_or_else(|| CALLER_CANCEL_REASON.to_string()),
                        phase: Some(name.to_string()),
                    },
                    index: None,
                });
            }

            let ctx = base_ctx.for_phase(name);
            let attrs = PhaseSpanAttributes::new(pipeline_id, name, kind.to_string(), index);
            self.tracker.start_phase(pipeline_id, index, name);
            debug!(pipeline_id = %pipeline_id, phase = %name, index, "Phase started");
            self.emit(names::PHASE_STARTED, Some(attrs.to_event_data())).await;

            let timer = SpanTimer::start(name);
            if let Err(error) = spec.phase.validate_input(&data, &ctx) {
                let elapsed = timer.finish();
                warn!(pipeline_id = %pipeline_id, phase = %name, error = %error, "Phase input rejected");
                self.emit_phase_failed(&attrs, 0, elapsed, &error.to_string()).await;
                results.push(PhaseResult::failed(name, kind, error.clone(), elapsed, 0));
                return Err(Stop::at(index, PipelineError::from(error)));
            }

            let policy = self.retry_policy(spec, &request.options);
            let outcome = policy
                .run(
                    name,
                    token,
                    |notice| {
                        warn!(
                            pipeline_id = %pipeline_id,
                            phase = %name,
                            attempt = notice.attempt,
                            delay_ms = duration_ms(notice.delay),
                            error = %notice.error,
                            "Phase attempt failed, retrying"
                        );
                        let mut event = attrs
                            .clone()
                            .with_status("retrying")
                            .with_attempts(notice.attempt)
                            .with_error(notice.error.to_string())
                            .to_event_data();
                        event["delay_ms"] = json!(notice.delay.as_secs_f64() * 1000.0);
                        self.try_emit(names::PHASE_RETRYING, Some(event));
                    },
                    |attempt| {
                        self.tracker.record_attempt(pipeline_id, attempt);
                        let ctx = ctx.for_attempt(attempt);
                        let phase = Arc::clone(&spec.phase);
                        let input = &data;
                        async move {
                            // A panic ends the retry loop; it is reported as unexpected below.
                            match AssertUnwindSafe(phase.execute(input, &ctx)).catch_unwind().await {
                                Ok(result) => result.map(Ok),
                                Err(panic) => Ok(Err(panic_message(panic.as_ref()))),
                            }
                        }
                    },
                )
                .await;

            let attempts = outcome.attempts;
            let retry_count = outcome.retry_count();
            let exhausted = outcome.is_exhausted();

            match outcome.result {
                Ok(Ok(output)) => {
                    let elapsed = timer.finish();
                    let result = PhaseResult::succeeded(name, kind, output.clone(), elapsed, retry_count)
                        .with_quality_score(spec.phase.calculate_quality_score(&output))
                        .with_warnings(spec.phase.get_warnings(&output, &ctx))
                        .with_metadata(spec.phase.collect_metadata(&output));
                    self.tracker.finish_phase(pipeline_id, false);
                    debug!(
                        pipeline_id = %pipeline_id,
                        phase = %name,
                        attempts,
                        quality = result.quality_score,
                        duration_ms = result.duration_ms(),
                        "Phase completed"
                    );
                    let mut event = attrs
                        .clone()
                        .with_status("completed")
                        .with_attempts(attempts)
                        .with_duration(elapsed)
                        .to_event_data();
                    event["quality_score"] = json!(result.quality_score);
                    event["warnings"] = json!(result.warnings.len());
                    results.push(result);
                    self.emit(names::PHASE_COMPLETED, Some(event)).await;
                    data = output;
                }
                Ok(Err(panic)) => {
                    let elapsed = timer.finish();
                    error!(pipeline_id = %pipeline_id, phase = %name, error = %panic, "Phase panicked");
                    let phase_error = PhaseError::execution(name, format!("panicked: {panic}"));
                    self.emit_phase_failed(&attrs, attempts, elapsed, &phase_error.to_string())
                        .await;
                    results.push(PhaseResult::failed(name, kind, phase_error, elapsed, retry_count));
                    return Err(Stop::at(
                        index,
                        PipelineError::unexpected(format!("phase '{name}' panicked: {panic}")),
                    ));
                }
                Err(error) if exhausted && spec.on_exhausted == ExhaustionPolicy::Fallback => {
                    let output = spec.phase.create_fallback_result(&data, &ctx);
                    let elapsed = timer.finish();
                    let mut warnings = vec![format!(
                        "phase '{name}' failed after {attempts} attempt(s), using fallback output: {error}"
                    )];
                    warnings.extend(spec.phase.get_warnings(&output, &ctx));
                    let result = PhaseResult::succeeded(name, kind, output.clone(), elapsed, retry_count)
                        .degraded()
                        .with_quality_score(spec.phase.calculate_quality_score(&output))
                        .with_warnings(warnings)
                        .with_metadata(spec.phase.collect_metadata(&output))
                        .add_metadata("fallback", json!(true))
                        .add_metadata("last_error", json!(error.to_string()));
                    self.tracker.finish_phase(pipeline_id, true);
                    warn!(
                        pipeline_id = %pipeline_id,
                        phase = %name,
                        attempts,
                        error = %error,
                        "Phase exhausted retries, continuing with fallback"
                    );
                    let event = attrs
                        .clone()
                        .with_status("degraded")
                        .with_attempts(attempts)
                        .with_duration(elapsed)
                        .with_error(error.to_string())
                        .to_event_data();
                    results.push(result);
                    self.emit(names::PHASE_DEGRADED, Some(event)).await;
                    data = output;
                }
                Err(error) => {
                    let elapsed = timer.finish();
                    let pipeline_error = if exhausted {
                        PipelineError::PhaseExhausted {
                            phase: name.to_string(),
                            attempts,
                            last_error: error.to_string(),
                        }
                    } else {
                        PipelineError::from(error.clone())
                    };
                    if !matches!(error, PhaseError::Cancelled { .. }) {
                        warn!(
                            pipeline_id = %pipeline_id,
                            phase = %name,
                            attempts,
                            error = %error,
                            "Phase failed"
                        );
                    }
                    self.emit_phase_failed(&attrs, attempts, elapsed, &error.to_string())
                        .await;
                    results.push(PhaseResult::failed(name, kind, error, elapsed, retry_count));
                    return Err(Stop::at(index, pipeline_error));
                }
            }
        }

        Ok(data)
    }

    /// Retry settings for one phase: request option, then phase spec, then config.
    fn retry_policy(&self, spec: &PhaseSpec, options: &PipelineOptions) -> RetryPolicy {
        let config = spec.retry.clone().unwrap_or_else(|| self.config.retry.clone());
        let policy = RetryPolicy::new(config)
            .with_attempt_timeout(spec.timeout.or_else(|| self.config.phase_timeout()));
        match options.max_retries {
            Some(retries) => policy.with_max_retries(retries),
            None => policy,
        }
    }

    /// Emits an event; a panicking sink is logged and ignored.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        if let Err(panic) = AssertUnwindSafe(async { self.events.emit(event_type, data).await })
            .catch_unwind()
            .await
        {
            warn!(
                event_type = %event_type,
                error = %panic_message(panic.as_ref()),
                "Event sink panicked"
            );
        }
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let emit = AssertUnwindSafe(|| self.events.try_emit(event_type, data));
        if let Err(panic) = std::panic::catch_unwind(emit) {
            warn!(
                event_type = %event_type,
                error = %panic_message(panic.as_ref()),
                "Event sink panicked"
            );
        }
    }

    async fn emit_phase_failed(
        &self,
        attrs: &PhaseSpanAttributes,
        attempts: u32,
        elapsed: std::time::Duration,
        error: &str,
    ) {
        let event = attrs
            .clone()
            .with_status("failed")
            .with_attempts(attempts)
            .with_duration(elapsed)
            .with_error(error)
            .to_event_data();
        self.emit(names::PHASE_FAILED, Some(event)).await;
    }

    async fn emit_pipeline_end(&self, pipeline_id: &str, error: &PipelineError) {
        let name = if matches!(error, PipelineError::Cancelled { .. }) {
            names::PIPELINE_CANCELLED
        } else {
            names::PIPELINE_FAILED
        };
        self.emit(
            name,
            Some(json!({
                "pipeline_id": pipeline_id,
                "error": error.to_dict(),
            })),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::phases::FnPhase;
    use crate::pipeline::RetryConfig;
    use crate::testing::fixtures::png_request;
    use pretty_assertions::assert_eq;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::default().with_retry(
            RetryConfig::new()
                .with_base_delay_ms(1)
                .with_max_delay_ms(5),
        )
    }

    #[tokio::test]
    async fn test_passthrough_pipeline() {
        let orchestrator = PipelineOrchestrator::builder()
            .phase(Arc::new(FnPhase::passthrough("a")))
            .phase(Arc::new(FnPhase::passthrough("b")))
            .config(fast_config())
            .build()
            .unwrap();

        let request = png_request("p1");
        let result = orchestrator.execute_pipeline(request.clone()).await;

        assert!(result.success);
        assert_eq!(result.phases.len(), 2);
        assert_eq!(result.final_output, Some(PhaseData::Design(request.input)));
        assert_eq!(
            orchestrator.get_progress("p1").map(|p| p.status),
            Some(crate::core::RunStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_non_retryable_execute_error_is_phase_validation() {
        let orchestrator = PipelineOrchestrator::builder()
            .phase(Arc::new(FnPhase::new("strict", |_, _| {
                Err(PhaseError::validation("strict", "missing sections"))
            })))
            .config(fast_config())
            .build()
            .unwrap();

        let result = orchestrator.execute_pipeline(png_request("p1")).await;
        assert!(!result.success);
        assert_eq!(result.phases.len(), 1);
        assert_eq!(result.phases[0].retry_count, 0);
        assert_eq!(
            result.error.map(|e| e.kind()),
            Some(crate::errors::ErrorKind::PhaseValidation)
        );
    }

    #[tokio::test]
    async fn test_events_for_successful_run() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = PipelineOrchestrator::builder()
            .phase(Arc::new(FnPhase::passthrough("a")))
            .event_sink(sink.clone())
            .build()
            .unwrap();

        orchestrator.execute_pipeline(png_request("p1")).await;
        assert_eq!(
            sink.names(),
            vec![
                names::PIPELINE_STARTED.to_string(),
                names::PHASE_STARTED.to_string(),
                names::PHASE_COMPLETED.to_string(),
                names::PIPELINE_COMPLETED.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_evict_on_completion() {
        let orchestrator = PipelineOrchestrator::builder()
            .phase(Arc::new(FnPhase::passthrough("a")))
            .config(OrchestratorConfig::default().with_retention(ProgressRetention::EvictOnCompletion))
            .build()
            .unwrap();

        let result = orchestrator.execute_pipeline(png_request("p1")).await;
        assert!(result.success);
        assert!(orchestrator.get_progress("p1").is_none());
        assert!(!orchestrator.cancel_pipeline("p1"));
    }

    #[test]
    fn test_retry_precedence() {
        let orchestrator = PipelineOrchestrator::builder()
            .phase(Arc::new(FnPhase::passthrough("a")))
            .build()
            .unwrap();
        let spec = PhaseSpec::new(Arc::new(FnPhase::passthrough("x")))
            .with_retry(RetryConfig::new().with_max_retries(1));

        let plain = PhaseSpec::new(Arc::new(FnPhase::passthrough("y")));
        assert_eq!(
            orchestrator.retry_policy(&plain, &PipelineOptions::new()).max_attempts(),
            4
        );
        assert_eq!(
            orchestrator.retry_policy(&spec, &PipelineOptions::new()).max_attempts(),
            2
        );
        assert_eq!(
            orchestrator
                .retry_policy(&spec, &PipelineOptions::new().with_max_retries(0))
                .max_attempts(),
            1
        );
    }
}
