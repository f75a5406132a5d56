//! Enhancement: refine sections that scored below the quality threshold.

use super::fan_out::{fan_out, SubunitOutcome};
use super::{unexpected_input, Phase};
use crate::context::{PhaseContext, PipelineOptions};
use crate::core::{ContentSection, GeneratedContent, PhaseData, PhaseKind};
use crate::errors::PhaseError;
use crate::services::{ContentRefiner, RefinementRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Sends low-quality sections through a [`ContentRefiner`].
///
/// Skipped entirely when the request disables enhancement.
pub struct EnhancementPhase {
    name: String,
    refiner: Arc<dyn ContentRefiner>,
}

impl std::fmt::Debug for EnhancementPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnhancementPhase").field("name", &self.name).finish()
    }
}

impl EnhancementPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new(refiner: Arc<dyn ContentRefiner>) -> Self {
        Self {
            name: "enhancement".to_string(),
            refiner,
        }
    }

    fn below(section: &ContentSection, threshold: f64) -> bool {
        section.quality.unwrap_or(0.0) < threshold
    }
}

#[async_trait]
impl Phase for EnhancementPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::Enhancement
    }

    fn is_enabled(&self, options: &PipelineOptions) -> bool {
        options.enable_enhancement
    }

    fn validate_input(&self, input: &PhaseData, _ctx: &PhaseContext) -> Result<(), PhaseError> {
        let content = input
            .as_content()
            .ok_or_else(|| unexpected_input(&self.name, "content", input))?;
        if content.sections.is_empty() {
            return Err(PhaseError::validation(&self.name, "content has no sections"));
        }
        Ok(())
    }

    async fn execute(&self, input: &PhaseData, ctx: &PhaseContext) -> Result<PhaseData, PhaseError> {
        let mut content = input
            .as_content()
            .ok_or_else(|| unexpected_input(&self.name, "content", input))?
            .clone();
        ctx.checkpoint()?;

        let threshold = ctx.quality_threshold();
        // Section ids may repeat, so results are written back by position.
        let (positions, targets): (Vec<usize>, Vec<ContentSection>) = content
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| Self::below(s, threshold))
            .map(|(position, s)| (position, s.clone()))
            .unzip();

        let outcomes = fan_out(
            targets,
            ctx.max_concurrent_subunits(),
            ctx.cancel_token(),
            |_, section| {
                let refiner = Arc::clone(&self.refiner);
                let issues: Vec<_> = content
                    .validation
                    .as_ref()
                    .map(|r| {
                        r.issues
                            .iter()
                            .filter(|i| i.section_id.as_deref() == Some(section.id.as_str()))
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                let request = RefinementRequest {
                    pipeline_id: ctx.pipeline_id().to_string(),
                    model: ctx.model().to_string(),
                    section,
                    quality_threshold: threshold,
                    issues,
                };
                async move { refiner.refine_section(&request).await }
            },
        )
        .await;

        let mut refined = 0usize;
        for (position, outcome) in positions.into_iter().zip(outcomes) {
            let Some(slot) = content.sections.get_mut(position) else {
                continue;
            };
            match outcome {
                SubunitOutcome::Completed(better) => {
                    slot.html = better.html;
                    slot.css = better.css;
                    slot.quality = better.quality.map(|q| q.clamp(0.0, 1.0)).or(slot.quality);
                    slot.fallback = false;
                    slot.refined = true;
                    refined += 1;
                }
                SubunitOutcome::Failed(error) => {
                    tracing::warn!(
                        pipeline_id = %ctx.pipeline_id(),
                        section = %slot.id,
                        error = %error,
                        "Refinement failed, keeping original section"
                    );
                }
                SubunitOutcome::Cancelled => {
                    ctx.checkpoint()?;
                }
            }
        }

        tracing::debug!(pipeline_id = %ctx.pipeline_id(), refined, "Content enhanced");
        content.enhanced = true;
        Ok(PhaseData::Content(content))
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
            .filter(|s| Self::below(s, threshold))
            .map(|s| {
                format!(
                    "section '{}' is still below threshold {threshold:.2} after enhancement",
                    s.id
                )
            })
            .collect()
    }

    fn collect_metadata(&self, output: &PhaseData) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        if let Some(content) = output.as_content() {
            let refined = content.sections.iter().filter(|s| s.refined).count();
            metadata.insert("refined_sections".to_string(), serde_json::json!(refined));
            metadata.insert("enhanced".to_string(), serde_json::json!(content.enhanced));
        }
        metadata
    }

    fn create_fallback_result(&self, input: &PhaseData, _ctx: &PhaseContext) -> PhaseData {
        input.clone()
    }
}
