//! Input processing: decode, check and fingerprint the design image.

use super::{slugify, unexpected_input, Phase};
use crate::context::PhaseContext;
use crate::core::{AnalyzedDesign, ImageFormat, InputPayload, PhaseData, PhaseKind, SectionPlan};
use crate::errors::PhaseError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use md5::{Digest, Md5};
use std::collections::HashMap;

/// Sections planned when the caller gives no hints.
pub const DEFAULT_SECTIONS: [&str; 4] = ["header", "hero", "content", "footer"];

/// Default upper bound on decoded image size.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const SMALL_IMAGE_BYTES: usize = 1024;

/// Turns the request's design payload into an [`AnalyzedDesign`].
#[derive(Debug, Clone)]
pub struct InputProcessingPhase {
    name: String,
    max_image_bytes: usize,
}

impl Default for InputProcessingPhase {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_BYTES)
    }
}

impl InputProcessingPhase {
    /// Creates the phase with a decoded-size limit.
    #[must_use]
    pub fn new(max_image_bytes: usize) -> Self {
        Self {
            name: "input_processing".to_string(),
            max_image_bytes,
        }
    }

    fn decode(&self, payload: &InputPayload) -> Result<Vec<u8>, PhaseError> {
        match payload {
            InputPayload::Image { data, .. } => Ok(data.clone()),
            InputPayload::DataUrl { url, .. } => {
                let (_, encoded) = url
                    .split_once(";base64,")
                    .ok_or_else(|| PhaseError::validation(&self.name, "data URL is not base64"))?;
                STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| PhaseError::validation(&self.name, format!("invalid base64: {e}")))
            }
        }
    }

    fn plan_sections(hints: &[String]) -> Vec<SectionPlan> {
        let mut plans: Vec<SectionPlan> = Vec::new();
        let names: Vec<&str> = if hints.iter().all(|h| h.trim().is_empty()) {
            DEFAULT_SECTIONS.to_vec()
        } else {
            hints.iter().map(|h| h.trim()).filter(|h| !h.is_empty()).collect()
        };

        for name in names {
            let mut id = slugify(name);
            if id.is_empty() {
                id = format!("section-{}", plans.len() + 1);
            }
            if plans.iter().any(|p| p.id == id) {
                continue;
            }
            plans.push(SectionPlan {
                id,
                name: name.to_string(),
                order: plans.len(),
            });
        }
        plans
    }

    fn title_for(payload: &InputPayload) -> String {
        let stem = payload
            .metadata()
            .file_name
            .as_deref()
            .map(|name| name.rsplit_once('.').map_or(name, |(stem, _)| stem))
            .unwrap_or("");
        let words: Vec<String> = stem
            .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().collect::<String>() + chars.as_str()
                })
            })
            .collect();
        if words.is_empty() {
            "Untitled Design".to_string()
        } else {
            words.join(" ")
        }
    }
}

#[async_trait]
impl Phase for InputProcessingPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::InputProcessing
    }

    fn validate_input(&self, input: &PhaseData, _ctx: &PhaseContext) -> Result<(), PhaseError> {
        let PhaseData::Design(payload) = input else {
            return Err(unexpected_input(&self.name, "design", input));
        };
        match payload {
            InputPayload::Image { data, .. } if data.is_empty() => {
                Err(PhaseError::validation(&self.name, "image data is empty"))
            }
            InputPayload::DataUrl { url, .. } if !url.starts_with("data:") => {
                Err(PhaseError::validation(&self.name, "expected a data: URL"))
            }
            _ => Ok(()),
        }
    }

    async fn execute(&self, input: &PhaseData, ctx: &PhaseContext) -> Result<PhaseData, PhaseError> {
        let PhaseData::Design(payload) = input else {
            return Err(unexpected_input(&self.name, "design", input));
        };
        ctx.checkpoint()?;

        let bytes = self.decode(payload)?;
        if bytes.is_empty() {
            return Err(PhaseError::validation(&self.name, "decoded image is empty"));
        }
        if bytes.len() > self.max_image_bytes {
            return Err(PhaseError::validation(
                &self.name,
                format!(
                    "image is {} bytes, limit is {}",
                    bytes.len(),
                    self.max_image_bytes
                ),
            ));
        }
        let format = ImageFormat::sniff(&bytes).ok_or_else(|| {
            PhaseError::validation(&self.name, "unrecognised image format (expected PNG, JPEG, GIF or WebP)")
        })?;

        let metadata = payload.metadata();
        let design = AnalyzedDesign {
            title: Self::title_for(payload),
            format,
            byte_len: bytes.len(),
            width: metadata.width,
            height: metadata.height,
            fingerprint: hex::encode(Md5::digest(&bytes)),
            image_base64: STANDARD.encode(&bytes),
            sections: Self::plan_sections(&metadata.section_hints),
        };

        tracing::debug!(
            pipeline_id = %ctx.pipeline_id(),
            format = ?design.format,
            bytes = design.byte_len,
            sections = design.sections.len(),
            "Design analyzed"
        );
        Ok(PhaseData::Analyzed(design))
    }

    fn calculate_quality_score(&self, output: &PhaseData) -> f64 {
        let PhaseData::Analyzed(design) = output else {
            return 0.0;
        };
        let mut score: f64 = 0.6;
        if design.width.is_some() && design.height.is_some() {
            score += 0.2;
        }
        if design.byte_len >= SMALL_IMAGE_BYTES {
            score += 0.2;
        }
        score.min(1.0)
    }

    fn get_warnings(&self, output: &PhaseData, _ctx: &PhaseContext) -> Vec<String> {
        let PhaseData::Analyzed(design) = output else {
            return Vec::new();
        };
        let mut warnings = Vec::new();
        if design.width.is_none() || design.height.is_none() {
            warnings.push("image dimensions unknown".to_string());
        }
        if design.byte_len < SMALL_IMAGE_BYTES {
            warnings.push(format!("image is only {} bytes", design.byte_len));
        }
        warnings
    }

    fn collect_metadata(&self, output: &PhaseData) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        if let PhaseData::Analyzed(design) = output {
            metadata.insert("format".to_string(), serde_json::json!(design.format));
            metadata.insert("byte_len".to_string(), serde_json::json!(design.byte_len));
            metadata.insert("fingerprint".to_string(), serde_json::json!(design.fingerprint));
            metadata.insert("section_count".to_string(), serde_json::json!(design.sections.len()));
        }
        metadata
    }

    fn create_fallback_result(&self, input: &PhaseData, _ctx: &PhaseContext) -> PhaseData {
        let (title, hints) = match input {
            PhaseData::Design(payload) => {
                (Self::title_for(payload), payload.metadata().section_hints.clone())
            }
            _ => ("Untitled Design".to_string(), Vec::new()),
        };
        PhaseData::Analyzed(AnalyzedDesign {
            title,
            format: ImageFormat::Png,
            byte_len: 0,
            width: None,
            height: None,
            fingerprint: String::new(),
            image_base64: String::new(),
            sections: Self::plan_sections(&hints),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ImageMetadata;
    use pretty_assertions::assert_eq;

    const PNG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn ctx() -> PhaseContext {
        PhaseContext::new("p1", "input_processing")
    }

    fn analyzed(output: PhaseData) -> AnalyzedDesign {
        match output {
            PhaseData::Analyzed(design) => design,
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_png_with_default_sections() {
        let phase = InputProcessingPhase::default();
        let input = PhaseData::Design(InputPayload::image(
            PNG.to_vec(),
            ImageMetadata::new().with_file_name("landing_page-v2.png"),
        ));

        phase.validate_input(&input, &ctx()).unwrap();
        let design = analyzed(phase.execute(&input, &ctx()).await.unwrap());

        assert_eq!(design.format, ImageFormat::Png);
        assert_eq!(design.title, "Landing Page V2");
        assert_eq!(design.fingerprint.len(), 32);
        let ids: Vec<&str> = design.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, DEFAULT_SECTIONS.to_vec());
    }

    #[tokio::test]
    async fn test_data_url_decoded_and_hints_used() {
        let phase = InputProcessingPhase::default();
        let url = format!("data:image/png;base64,{}", STANDARD.encode(PNG));
        let input = PhaseData::Design(InputPayload::data_url(
            url,
            ImageMetadata::new().with_section_hints(["Nav Bar", "Pricing", "nav bar", ""]),
        ));

        let design = analyzed(phase.execute(&input, &ctx()).await.unwrap());
        assert_eq!(design.byte_len, PNG.len());
        let ids: Vec<&str> = design.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["nav-bar", "pricing"]);
        assert_eq!(design.sections[1].order, 1);
    }

    #[tokio::test]
    async fn test_unknown_format_is_validation_error() {
        let phase = InputProcessingPhase::default();
        let input = PhaseData::Design(InputPayload::image(b"not an image".to_vec(), ImageMetadata::new()));
        let err = phase.execute(&input, &ctx()).await.unwrap_err();
        assert!(matches!(err, PhaseError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_size_limit_and_bad_base64() {
        let phase = InputProcessingPhase::new(4);
        let input = PhaseData::Design(InputPayload::image(PNG.to_vec(), ImageMetadata::new()));
        assert!(!phase.execute(&input, &ctx()).await.unwrap_err().is_retryable());

        let input = PhaseData::Design(InputPayload::data_url("data:image/png;base64,@@@", ImageMetadata::new()));
        assert!(matches!(
            InputProcessingPhase::default().execute(&input, &ctx()).await,
            Err(PhaseError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_input_rejects_wrong_variant_and_empty() {
        let phase = InputProcessingPhase::default();
        let empty = PhaseData::Design(InputPayload::image(Vec::new(), ImageMetadata::new()));
        assert!(phase.validate_input(&empty, &ctx()).is_err());

        let fallback = phase.create_fallback_result(&empty, &ctx());
        assert!(phase.validate_input(&fallback, &ctx()).is_err());
    }

    #[test]
    fn test_quality_and_warnings() {
        let phase = InputProcessingPhase::default();
        let fallback = phase.create_fallback_result(
            &PhaseData::Design(InputPayload::image(PNG.to_vec(), ImageMetadata::new())),
            &ctx(),
        );
        assert!((phase.calculate_quality_score(&fallback) - 0.6).abs() < 1e-9);
        assert_eq!(
            phase.get_warnings(&fallback, &ctx()),
            vec!["image dimensions unknown".to_string(), "image is only 0 bytes".to_string()]
        );
        assert_eq!(phase.collect_metadata(&fallback)["section_count"], 4);
    }
}
