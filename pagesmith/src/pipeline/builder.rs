//! Orchestrator builder with phase-list validation.

use super::orchestrator::PipelineOrchestrator;
use super::progress::ProgressTracker;
use super::spec::PhaseSpec;
use crate::config::OrchestratorConfig;
use crate::errors::PipelineError;
use crate::events::{EventSink, NoOpEventSink};
use crate::phases::Phase;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for a [`PipelineOrchestrator`].
///
/// Phases run in the order they are added.
#[derive(Default)]
pub struct OrchestratorBuilder {
    phases: Vec<PhaseSpec>,
    config: OrchestratorConfig,
    event_sink: Option<Arc<dyn EventSink>>,
    tracker: Option<Arc<ProgressTracker>>,
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("phases", &self.phase_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    /// Creates an empty builder with the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a phase with default settings.
    #[must_use]
    pub fn phase(self, phase: Arc<dyn Phase>) -> Self {
        self.phase_spec(PhaseSpec::new(phase))
    }

    /// Appends a phase with its own retry, timeout and exhaustion settings.
    #[must_use]
    pub fn phase_spec(mut self, spec: PhaseSpec) -> Self {
        self.phases.push(spec);
        self
    }

    /// Sets the orchestrator config.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink. Defaults to [`NoOpEventSink`].
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Shares an existing progress tracker, e.g. between orchestrators.
    #[must_use]
    pub fn tracker(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Names of the phases added so far.
    #[must_use]
    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(PhaseSpec::name).collect()
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if there are no phases, a name is
    /// empty or duplicated, or the config is invalid.
    pub fn build(self) -> Result<PipelineOrchestrator, PipelineError> {
        if self.phases.is_empty() {
            return Err(PipelineError::config("orchestrator has no phases"));
        }

        let mut seen = HashSet::new();
        for spec in &self.phases {
            let name = spec.name();
            if name.trim().is_empty() {
                return Err(PipelineError::config("phase name must not be empty"));
            }
            if !seen.insert(name) {
                return Err(PipelineError::config(format!("duplicate phase name '{name}'")));
            }
        }
        self.config.validate()?;

        Ok(PipelineOrchestrator::from_parts(
            self.phases,
            self.config,
            self.event_sink.unwrap_or_else(|| Arc::new(NoOpEventSink)),
            self.tracker.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::phases::FnPhase;
    use pretty_assertions::assert_eq;

    fn passthrough(name: &str) -> Arc<dyn Phase> {
        Arc::new(FnPhase::passthrough(name))
    }

    #[test]
    fn test_build_keeps_order() {
        let orchestrator = OrchestratorBuilder::new()
            .phase(passthrough("a"))
            .phase(passthrough("b"))
            .phase(passthrough("c"))
            .build()
            .unwrap();
        assert_eq!(orchestrator.phase_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_rejected() {
        let err = OrchestratorBuilder::new().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = OrchestratorBuilder::new()
            .phase(passthrough("a"))
            .phase(passthrough("a"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate phase name 'a'"));
    }

    #[test]
    fn test_blank_name_rejected() {
        let err = OrchestratorBuilder::new()
            .phase(passthrough(" "))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = OrchestratorConfig::default();
        config.max_concurrent_subunits = 0;
        let err = OrchestratorBuilder::new()
            .phase(passthrough("a"))
            .config(config)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_shared_tracker() {
        let tracker = Arc::new(ProgressTracker::new());
        let orchestrator = OrchestratorBuilder::new()
            .phase(passthrough("a"))
            .tracker(Arc::clone(&tracker))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(orchestrator.tracker(), &tracker));
    }
}
