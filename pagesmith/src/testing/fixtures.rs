//! Request fixtures and ready-made orchestrators.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};

use super::mocks::{StubContentGenerator, StubContentRefiner};
use crate::config::OrchestratorConfig;
use crate::context::{PipelineOptions, PipelineRequest};
use crate::core::{ImageMetadata, InputPayload};
use crate::pipeline::{OrchestratorBuilder, PipelineOrchestrator, RetryConfig};
use crate::services::Services;

/// A minimal PNG: signature plus a 1x1 IHDR chunk header.
#[must_use]
pub fn sample_png() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 13]);
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]);
    bytes
}

/// [`sample_png`] as a base64 `data:` URL.
#[must_use]
pub fn sample_png_data_url() -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(sample_png()))
}

/// Metadata for a landing-page design named `landing-page.png`.
#[must_use]
pub fn landing_metadata() -> ImageMetadata {
    ImageMetadata::new()
        .with_file_name("landing-page.png")
        .with_mime_type("image/png")
}

/// A request carrying [`sample_png`] as raw bytes.
#[must_use]
pub fn png_request(id: &str) -> PipelineRequest {
    PipelineRequest::new(id, InputPayload::image(sample_png(), landing_metadata()))
}

/// A request carrying [`sample_png`] as a data URL.
#[must_use]
pub fn data_url_request(id: &str) -> PipelineRequest {
    PipelineRequest::new(id, InputPayload::data_url(sample_png_data_url(), landing_metadata()))
}

/// [`png_request`] with enhancement turned off.
#[must_use]
pub fn request_without_enhancement(id: &str) -> PipelineRequest {
    png_request(id).with_options(PipelineOptions::new().with_enhancement(false))
}

/// Retry settings with millisecond delays, for fast tests.
#[must_use]
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new()
        .with_max_retries(max_retries)
        .with_base_delay_ms(1)
        .with_max_delay_ms(4)
}

/// A config using [`fast_retry`].
#[must_use]
pub fn fast_config(max_retries: u32) -> OrchestratorConfig {
    OrchestratorConfig::default().with_retry(fast_retry(max_retries))
}

/// Services backed by the local stubs.
#[must_use]
pub fn stub_services(generation_quality: f64) -> Services {
    Services::new(
        Arc::new(StubContentGenerator::new(generation_quality)),
        Arc::new(StubContentRefiner::default()),
    )
}

/// The standard five phases over stub services, not yet built.
#[must_use]
pub fn standard_stub_builder(generation_quality: f64, config: OrchestratorConfig) -> OrchestratorBuilder {
    PipelineOrchestrator::standard_builder(stub_services(generation_quality), &config).config(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ImageFormat;

    #[test]
    fn test_sample_png_is_recognised() {
        assert_eq!(ImageFormat::sniff(&sample_png()), Some(ImageFormat::Png));
        assert!(sample_png_data_url().starts_with("data:image/png;base64,iVBOR"));
    }

    #[test]
    fn test_fixture_requests_validate() {
        let limit = OrchestratorConfig::default().max_input_bytes;
        assert!(png_request("p1").validate(limit).is_ok());
        assert!(data_url_request("p2").validate(limit).is_ok());
        assert!(!request_without_enhancement("p3").options.enable_enhancement);
    }

    #[test]
    fn test_standard_stub_builder() {
        let builder = standard_stub_builder(0.9, fast_config(1));
        assert_eq!(
            builder.phase_names(),
            vec!["input_processing", "generation", "validation", "enhancement", "packaging"]
        );
    }
}
