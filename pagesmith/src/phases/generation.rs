//! Generation: produce HTML/CSS for every planned section.

use super::fan_out::{fan_out, SubunitOutcome};
use super::{unexpected_input, Phase};
use crate::context::PhaseContext;
use crate::core::{AnalyzedDesign, ContentSection, GeneratedContent, PhaseData, PhaseKind};
use crate::errors::PhaseError;
use crate::services::{ContentGenerator, GenerationRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Scatters section generation over a [`ContentGenerator`].
///
/// A section whose generation fails is replaced by a placeholder; the phase
/// only fails when every section does.
pub struct GenerationPhase {
    name: String,
    generator: Arc<dyn ContentGenerator>,
}

impl std::fmt::Debug for GenerationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPhase").field("name", &self.name).finish()
    }
}

impl GenerationPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            name: "generation".to_string(),
            generator,
        }
    }

    fn placeholder_content(design: &AnalyzedDesign, model: &str) -> GeneratedContent {
        GeneratedContent {
            title: design.title.clone(),
            model: model.to_string(),
            fingerprint: design.fingerprint.clone(),
            sections: design.sections.iter().map(ContentSection::placeholder).collect(),
            validation: None,
            enhanced: false,
        }
    }
}

#[async_trait]
impl Phase for GenerationPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::Generation
    }

    fn validate_input(&self, input: &PhaseData, _ctx: &PhaseContext) -> Result<(), PhaseError> {
        let PhaseData::Analyzed(design) = input else {
            return Err(unexpected_input(&self.name, "analyzed", input));
        };
        if design.sections.is_empty() {
            return Err(PhaseError::validation(&self.name, "design has no planned sections"));
        }
        Ok(())
    }

    async fn execute(&self, input: &PhaseData, ctx: &PhaseContext) -> Result<PhaseData, PhaseError> {
        let PhaseData::Analyzed(design) = input else {
            return Err(unexpected_input(&self.name, "analyzed", input));
        };
        ctx.checkpoint()?;

        let outcomes = fan_out(
            design.sections.clone(),
            ctx.max_concurrent_subunits(),
            ctx.cancel_token(),
            |_, section| {
                let generator = Arc::clone(&self.generator);
                let request = GenerationRequest {
                    pipeline_id: ctx.pipeline_id().to_string(),
                    model: ctx.model().to_string(),
                    title: design.title.clone(),
                    section,
                    image_base64: design.image_base64.clone(),
                    fingerprint: design.fingerprint.clone(),
                };
                async move { generator.generate_section(&request).await }
            },
        )
        .await;

        if outcomes.iter().any(SubunitOutcome::is_cancelled) {
            return Err(ctx.checkpoint().err().unwrap_or_else(|| {
                PhaseError::cancelled(&self.name, "cancelled between sections")
            }));
        }

        let mut sections = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (plan, outcome) in design.sections.iter().zip(outcomes) {
            match outcome {
                SubunitOutcome::Completed(generated) => sections.push(ContentSection {
                    id: plan.id.clone(),
                    name: plan.name.clone(),
                    html: generated.html,
                    css: generated.css,
                    quality: generated.quality.map(|q| q.clamp(0.0, 1.0)),
                    fallback: false,
                    refined: false,
                }),
                SubunitOutcome::Failed(error) => {
                    tracing::warn!(
                        pipeline_id = %ctx.pipeline_id(),
                        phase = %self.name,
                        section = %plan.id,
                        error = %error,
                        "Section generation failed, using placeholder"
                    );
                    failures.push(format!("{}: {error}", plan.id));
                    sections.push(ContentSection::placeholder(plan));
                }
                SubunitOutcome::Cancelled => {}
            }
        }

        if failures.len() == sections.len() {
            return Err(PhaseError::execution(
                &self.name,
                format!("all {} sections failed ({})", failures.len(), failures.join("; ")),
            ));
        }

        Ok(PhaseData::Content(GeneratedContent {
            title: design.title.clone(),
            model: ctx.model().to_string(),
            fingerprint: design.fingerprint.clone(),
            sections,
            validation: None,
            enhanced: false,
        }))
    }

    fn calculate_quality_score(&self, output: &PhaseData) -> f64 {
        output.as_content().map_or(0.0, GeneratedContent::mean_quality)
    }

    fn get_warnings(&self, output: &PhaseData, ctx: &PhaseContext) -> Vec<String> {
        let Some(content) = output.as_content() else {
            return Vec::new();
        };
        let threshold = ctx.quality_threshold();
        content
            .sections
            .iter()
            .filter_map(|s| {
                if s.fallback {
                    Some(format!("section '{}' uses placeholder content", s.id))
                } else {
                    match s.quality {
                        Some(q) if q < threshold => Some(format!(
                            "section '{}' quality {q:.2} is below threshold {threshold:.2}",
                            s.id
                        )),
                        None => Some(format!("section '{}' has no quality score", s.id)),
                        _ => None,
                    }
                }
            })
            .collect()
    }

    fn collect_metadata(&self, output: &PhaseData) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        if let Some(content) = output.as_content() {
            metadata.insert("model".to_string(), serde_json::json!(content.model));
            metadata.insert("section_count".to_string(), serde_json::json!(content.sections.len()));
            metadata.insert(
                "fallback_sections".to_string(),
                serde_json::json!(content.fallback_count()),
            );
        }
        metadata
    }

    fn create_fallback_result(&self, input: &PhaseData, ctx: &PhaseContext) -> PhaseData {
        match input {
            PhaseData::Analyzed(design) => {
                PhaseData::Content(Self::placeholder_content(design, ctx.model()))
            }
            _ => PhaseData::Content(GeneratedContent {
                title: "Untitled Design".to_string(),
                model: ctx.model().to_string(),
                fingerprint: String::new(),
                sections: Vec::new(),
                validation: None,
                enhanced: false,
            }),
        }
    }
}
