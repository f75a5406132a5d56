//! Orchestrator configuration.
//!
//! Every field has a default, so `{}` is a valid config. Values can come
//! from JSON text, a JSON file, and `PAGESMITH_*` environment variables,
//! applied in that order.

use crate::context::{DEFAULT_MAX_CONCURRENT_SUBUNITS, DEFAULT_MODEL, DEFAULT_QUALITY_THRESHOLD};
use crate::errors::PipelineError;
use crate::phases::DEFAULT_MAX_IMAGE_BYTES;
use crate::pipeline::{ProgressRetention, RetryConfig};
use crate::utils::duration_ms;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PAGESMITH_";

/// Settings shared by every run of an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Default retry settings for phases without their own.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-attempt deadline in milliseconds; none by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_timeout_ms: Option<u64>,
    /// What happens to progress records once a run ends.
    #[serde(default)]
    pub retention: ProgressRetention,
    /// Model used when a request names none.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Threshold used when a request sets none, 0..=1 or 0..=100.
    #[serde(default = "default_quality_threshold")]
    pub default_quality_threshold: f64,
    /// Concurrency limit inside fan-out phases.
    #[serde(default = "default_max_concurrent_subunits")]
    pub max_concurrent_subunits: usize,
    /// Largest accepted input, in bytes.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_quality_threshold() -> f64 {
    DEFAULT_QUALITY_THRESHOLD
}

fn default_max_concurrent_subunits() -> usize {
    DEFAULT_MAX_CONCURRENT_SUBUNITS
}

fn default_max_input_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            phase_timeout_ms: None,
            retention: ProgressRetention::default(),
            default_model: default_model(),
            default_quality_threshold: default_quality_threshold(),
            max_concurrent_subunits: default_max_concurrent_subunits(),
            max_input_bytes: default_max_input_bytes(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] on malformed JSON or invalid values.
    pub fn from_json_str(text: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Applies `PAGESMITH_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if a variable does not parse.
    pub fn with_env_overrides(self) -> Result<Self, PipelineError> {
        self.with_overrides(std::env::vars())
    }

    /// Applies `PAGESMITH_*` overrides from any key/value source. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if a value does not parse or the result is invalid.
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "MAX_RETRIES" => self.retry.max_retries = parse(key.as_ref(), value)?,
                "BASE_DELAY_MS" => self.retry.base_delay_ms = parse(key.as_ref(), value)?,
                "MAX_DELAY_MS" => self.retry.max_delay_ms = parse(key.as_ref(), value)?,
                "PHASE_TIMEOUT_MS" => self.phase_timeout_ms = Some(parse(key.as_ref(), value)?),
                "DEFAULT_MODEL" => self.default_model = value.to_string(),
                "QUALITY_THRESHOLD" => {
                    self.default_quality_threshold = parse(key.as_ref(), value)?;
                }
                "MAX_CONCURRENT_SUBUNITS" => {
                    self.max_concurrent_subunits = parse(key.as_ref(), value)?;
                }
                "MAX_INPUT_BYTES" => self.max_input_bytes = parse(key.as_ref(), value)?,
                "RETENTION" => {
                    self.retention = serde_json::from_value(serde_json::json!(value)).map_err(|_| {
                        PipelineError::config(format!(
                            "{} must be keep_terminal or evict_on_completion",
                            key.as_ref()
                        ))
                    })?;
                }
                _ => tracing::debug!(variable = %key.as_ref(), "Ignoring unknown config override"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=100.0).contains(&self.default_quality_threshold) {
            return Err(PipelineError::config(format!(
                "default_quality_threshold {} is outside [0, 100]",
                self.default_quality_threshold
            )));
        }
        if self.default_model.trim().is_empty() {
            return Err(PipelineError::config("default_model must not be empty"));
        }
        if self.max_concurrent_subunits == 0 {
            return Err(PipelineError::config("max_concurrent_subunits must be at least 1"));
        }
        if self.max_input_bytes == 0 {
            return Err(PipelineError::config("max_input_bytes must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(PipelineError::config("retry.base_delay_ms exceeds retry.max_delay_ms"));
        }
        if self.phase_timeout_ms == Some(0) {
            return Err(PipelineError::config("phase_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// The per-attempt deadline as a duration.
    #[must_use]
    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_ms.map(Duration::from_millis)
    }

    /// Sets the default retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub fn with_retention(mut self, retention: ProgressRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the default model.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Sets the input size limit.
    #[must_use]
    pub fn with_max_input_bytes(mut self, bytes: usize) -> Self {
        self.max_input_bytes = bytes;
        self
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PipelineError> {
    value
        .parse()
        .map_err(|_| PipelineError::config(format!("{key}: cannot parse '{value}'")))
}
