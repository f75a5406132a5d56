//! Pipeline requests: identifier, input payload, options and caller context.

use crate::core::InputPayload;
use crate::errors::PipelineError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Longest accepted pipeline identifier.
pub const MAX_PIPELINE_ID_LEN: usize = 128;

#[allow(clippy::expect_used)]
static PIPELINE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._:-]+$").expect("pipeline id pattern is valid"));

/// Per-request knobs. Unset fields fall back to orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// AI model selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Quality threshold, either on a 0..=1 or a 0..=100 scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<f64>,
    /// Retries allowed per phase after the first attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Whether the enhancement phase runs.
    #[serde(default = "default_enable_enhancement")]
    pub enable_enhancement: bool,
    /// Name for the packaged module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
}

fn default_enable_enhancement() -> bool {
    true
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            model: None,
            quality_threshold: None,
            max_retries: None,
            enable_enhancement: default_enable_enhancement(),
            module_name: None,
        }
    }
}

impl PipelineOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the quality threshold.
    #[must_use]
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = Some(threshold);
        self
    }

    /// Sets the per-phase retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Enables or disables the enhancement phase.
    #[must_use]
    pub fn with_enhancement(mut self, enabled: bool) -> Self {
        self.enable_enhancement = enabled;
        self
    }

    /// Sets the module name.
    #[must_use]
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }
}

/// Maps a threshold given on either scale onto 0..=1.
#[must_use]
pub fn normalize_threshold(value: f64) -> f64 {
    if value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

/// Who asked for the run and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// The requesting user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The caller's session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            user_id: None,
            session_id: None,
            created_at: Utc::now(),
        }
    }
}

impl RequestContext {
    /// Creates a context stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user ID.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the session ID.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Converts to a dictionary with string values (or null).
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert(
            "user_id".to_string(),
            self.user_id
                .as_ref()
                .map_or(serde_json::Value::Null, |id| serde_json::json!(id)),
        );
        map.insert(
            "session_id".to_string(),
            self.session_id
                .as_ref()
                .map_or(serde_json::Value::Null, |id| serde_json::json!(id)),
        );
        map.insert(
            "created_at".to_string(),
            serde_json::json!(self.created_at.to_rfc3339()),
        );
        map
    }
}

/// A request to run the pipeline once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Run identifier, unique among running pipelines.
    pub id: String,
    /// The design to convert.
    pub input: InputPayload,
    /// Run options.
    #[serde(default)]
    pub options: PipelineOptions,
    /// Caller context.
    #[serde(default)]
    pub context: RequestContext,
}

impl PipelineRequest {
    /// Creates a request with default options and a fresh context.
    #[must_use]
    pub fn new(id: impl Into<String>, input: InputPayload) -> Self {
        Self {
            id: id.into(),
            input,
            options: PipelineOptions::default(),
            context: RequestContext::default(),
        }
    }

    /// Creates a request with a generated identifier.
    #[must_use]
    pub fn with_generated_id(input: InputPayload) -> Self {
        Self::new(crate::utils::generate_pipeline_id(), input)
    }

    /// Sets the options.
    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the caller context.
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Checks the request is well formed before any phase runs.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RequestValidation`] describing the first problem found.
    pub fn validate(&self, max_input_bytes: usize) -> Result<(), PipelineError> {
        self.validate_id()?;
        self.validate_payload(max_input_bytes)
    }

    /// Checks only the identifier, which must be usable as a registry key.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RequestValidation`] for an empty, overlong or
    /// malformed id.
    pub fn validate_id(&self) -> Result<(), PipelineError> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::request("pipeline id must not be empty"));
        }
        if self.id.len() > MAX_PIPELINE_ID_LEN {
            return Err(PipelineError::request(format!(
                "pipeline id is longer than {MAX_PIPELINE_ID_LEN} characters"
            )));
        }
        if !PIPELINE_ID.is_match(&self.id) {
            return Err(PipelineError::request(format!(
                "pipeline id '{}' contains characters outside [A-Za-z0-9._:-]",
                self.id
            )));
        }
        Ok(())
    }

    /// Checks the input payload and options.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RequestValidation`] describing the first problem found.
    pub fn validate_payload(&self, max_input_bytes: usize) -> Result<(), PipelineError> {
        match &self.input {
            InputPayload::Image { data, .. } if data.is_empty() => {
                return Err(PipelineError::request("image data is empty"));
            }
            InputPayload::DataUrl { url, .. }
                if !url.starts_with("data:") || !url.contains(";base64,") =>
            {
                return Err(PipelineError::request(
                    "data URL must have the form data:<mime>;base64,<payload>",
                ));
            }
            _ => {}
        }
        if self.input.approximate_len() > max_input_bytes {
            return Err(PipelineError::request(format!(
                "input exceeds the {max_input_bytes} byte limit"
            )));
        }

        if let Some(threshold) = self.options.quality_threshold {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(PipelineError::request(format!(
                    "quality threshold {threshold} is outside [0, 100]"
                )));
            }
        }
        if let Some(model) = &self.options.model {
            if model.trim().is_empty() {
                return Err(PipelineError::request("model name must not be empty"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ImageMetadata;
    use crate::errors::ErrorKind;

    const LIMIT: usize = 1024;

    fn image_request(id: &str) -> PipelineRequest {
        PipelineRequest::new(id, InputPayload::image(vec![0xFF, 0xD8, 0xFF], ImageMetadata::new()))
    }

    #[test]
    fn test_valid_request() {
        assert!(image_request("p1").validate(LIMIT).is_ok());
        assert!(image_request("run-2024.01:abc_1").validate(LIMIT).is_ok());
    }

    #[test]
    fn test_empty_id_rejected() {
        for id in ["", "   "] {
            let err = image_request(id).validate(LIMIT).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::RequestValidation);
        }
    }

    #[test]
    fn test_malformed_id_rejected() {
        assert!(image_request("has space").validate(LIMIT).is_err());
        assert!(image_request(&"x".repeat(MAX_PIPELINE_ID_LEN + 1)).validate(LIMIT).is_err());
    }

    #[test]
    fn test_empty_image_rejected() {
        let request = PipelineRequest::new("p1", InputPayload::image(Vec::new(), ImageMetadata::new()));
        assert!(request.validate(LIMIT).is_err());
    }

    #[test]
    fn test_data_url_shape() {
        let good = PipelineRequest::new(
            "p1",
            InputPayload::data_url("data:image/png;base64,iVBORw0KGgo=", ImageMetadata::new()),
        );
        assert!(good.validate(LIMIT).is_ok());

        let bad = PipelineRequest::new("p1", InputPayload::data_url("http://x/y.png", ImageMetadata::new()));
        assert!(bad.validate(LIMIT).is_err());
    }

    #[test]
    fn test_size_limit() {
        let request = PipelineRequest::new("p1", InputPayload::image(vec![0; 2048], ImageMetadata::new()));
        let err = request.validate(LIMIT).unwrap_err();
        assert!(err.to_string().contains("1024 byte limit"));
    }

    #[test]
    fn test_threshold_range() {
        let request = image_request("p1")
            .with_options(PipelineOptions::new().with_quality_threshold(150.0));
        assert!(request.validate(LIMIT).is_err());

        let request = image_request("p1")
            .with_options(PipelineOptions::new().with_quality_threshold(85.0));
        assert!(request.validate(LIMIT).is_ok());
    }

    #[test]
    fn test_blank_model_rejected() {
        let request = image_request("p1").with_options(PipelineOptions::new().with_model(" "));
        assert!(request.validate(LIMIT).is_err());
    }

    #[test]
    fn test_normalize_threshold() {
        assert!((normalize_threshold(0.7) - 0.7).abs() < f64::EPSILON);
        assert!((normalize_threshold(70.0) - 0.7).abs() < 1e-12);
        assert!((normalize_threshold(1.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_options_default_enables_enhancement() {
        let options: PipelineOptions = serde_json::from_str("{}").unwrap();
        assert!(options.enable_enhancement);
        assert_eq!(options, PipelineOptions::default());
    }

    #[test]
    fn test_request_context_to_dict() {
        let ctx = RequestContext::new().with_user_id("u1");
        let dict = ctx.to_dict();
        assert_eq!(dict["user_id"], "u1");
        assert!(dict["session_id"].is_null());
    }
}
