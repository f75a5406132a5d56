//! Validation: check generated content and correct sections with errors.

use super::fan_out::{fan_out, SubunitOutcome};
use super::{collaborator_error, unexpected_input, Phase};
use crate::context::PhaseContext;
use crate::core::{
    ContentSection, GeneratedContent, IssueSeverity, PhaseData, PhaseKind, ValidationIssue,
    ValidationReport,
};
use crate::errors::PhaseError;
use crate::services::{ContentValidator, ErrorCorrector};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Runs a [`ContentValidator`] and, when configured, an [`ErrorCorrector`].
pub struct ValidationPhase {
    name: String,
    validator: Arc<dyn ContentValidator>,
    corrector: Option<Arc<dyn ErrorCorrector>>,
}

impl std::fmt::Debug for ValidationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationPhase")
            .field("name", &self.name)
            .field("corrector", &self.corrector.is_some())
            .finish()
    }
}

impl ValidationPhase {
    /// Creates the phase without a corrector.
    #[must_use]
    pub fn new(validator: Arc<dyn ContentValidator>) -> Self {
        Self {
            name: "validation".to_string(),
            validator,
            corrector: None,
        }
    }

    /// Adds a corrector for sections with error-severity issues.
    #[must_use]
    pub fn with_corrector(mut self, corrector: Option<Arc<dyn ErrorCorrector>>) -> Self {
        self.corrector = corrector;
        self
    }

    fn errors_by_section(report: &ValidationReport) -> Vec<(String, Vec<ValidationIssue>)> {
        let mut grouped: Vec<(String, Vec<ValidationIssue>)> = Vec::new();
        for issue in report.issues.iter().filter(|i| i.severity == IssueSeverity::Error) {
            let Some(id) = &issue.section_id else {
                continue;
            };
            match grouped.iter_mut().find(|(section, _)| section == id) {
                Some((_, issues)) => issues.push(issue.clone()),
                None => grouped.push((id.clone(), vec![issue.clone()])),
            }
        }
        grouped
    }

    async fn correct(
        &self,
        corrector: &Arc<dyn ErrorCorrector>,
        content: &mut GeneratedContent,
        report: &mut ValidationReport,
        ctx: &PhaseContext,
    ) -> Result<(), PhaseError> {
        let targets: Vec<(ContentSection, Vec<ValidationIssue>)> = Self::errors_by_section(report)
            .into_iter()
            .filter_map(|(id, issues)| {
                content
                    .sections
                    .iter()
                    .find(|s| s.id == id)
                    .map(|s| (s.clone(), issues))
            })
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = targets.iter().map(|(s, _)| s.id.clone()).collect();
        let outcomes = fan_out(
            targets,
            ctx.max_concurrent_subunits(),
            ctx.cancel_token(),
            |_, (section, issues)| {
                let corrector = Arc::clone(corrector);
                async move { corrector.correct(&section, &issues).await }
            },
        )
        .await;

        for (id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                SubunitOutcome::Completed(mut corrected) => {
                    if let Some(slot) = content.sections.iter_mut().find(|s| s.id == id) {
                        corrected.id.clone_from(&id);
                        *slot = corrected;
                        report.issues.retain(|i| {
                            !(i.severity == IssueSeverity::Error && i.section_id.as_deref() == Some(id.as_str()))
                        });
                        report.corrected_sections.push(id);
                    }
                }
                SubunitOutcome::Failed(error) => {
                    tracing::warn!(
                        pipeline_id = %ctx.pipeline_id(),
                        section = %id,
                        error = %error,
                        "Correction failed, keeping original section"
                    );
                }
                SubunitOutcome::Cancelled => {
                    ctx.checkpoint()?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Phase for ValidationPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::Validation
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

        let mut report = self
            .validator
            .validate(&content)
            .await
            .map_err(|e| collaborator_error(&self.name, "validator failed", &e))?;
        report.score = report.score.clamp(0.0, 1.0);

        if let Some(corrector) = &self.corrector {
            ctx.checkpoint()?;
            self.correct(corrector, &mut content, &mut report, ctx).await?;
        }

        tracing::debug!(
            pipeline_id = %ctx.pipeline_id(),
            issues = report.issues.len(),
            corrected = report.corrected_sections.len(),
            score = report.score,
            "Content validated"
        );
        content.validation = Some(report);
        Ok(PhaseData::Content(content))
    }

    fn calculate_quality_score(&self, output: &PhaseData) -> f64 {
        output
            .as_content()
            .and_then(|c| c.validation.as_ref())
            .map_or(0.0, |r| r.score)
    }

    fn get_warnings(&self, output: &PhaseData, _ctx: &PhaseContext) -> Vec<String> {
        let Some(report) = output.as_content().and_then(|c| c.validation.as_ref()) else {
            return vec!["no validation report".to_string()];
        };
        report
            .issues
            .iter()
            .filter(|i| i.severity != IssueSeverity::Info)
            .map(|i| match &i.section_id {
                Some(id) => format!("{id}: {}", i.message),
                None => i.message.clone(),
            })
            .collect()
    }

    fn collect_metadata(&self, output: &PhaseData) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        if let Some(report) = output.as_content().and_then(|c| c.validation.as_ref()) {
            metadata.insert("issue_count".to_string(), serde_json::json!(report.issues.len()));
            metadata.insert("error_count".to_string(), serde_json::json!(report.error_count()));
            metadata.insert(
                "corrected_sections".to_string(),
                serde_json::json!(report.corrected_sections),
            );
        }
        metadata
    }

    fn create_fallback_result(&self, input: &PhaseData, ctx: &PhaseContext) -> PhaseData {
        let mut content = input.as_content().cloned().unwrap_or_else(|| GeneratedContent {
            title: "Untitled Design".to_string(),
            model: ctx.model().to_string(),
            fingerprint: String::new(),
            sections: Vec::new(),
            validation: None,
            enhanced: false,
        });
        content.validation = Some(ValidationReport {
            issues: vec![ValidationIssue {
                section_id: None,
                severity: IssueSeverity::Warning,
                message: "validation unavailable, content not checked".to_string(),
            }],
            score: 0.0,
            corrected_sections: Vec::new(),
        });
        PhaseData::Content(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SectionPlan;
    use crate::services::{BasicContentValidator, MockContentValidator, MockErrorCorrector};
    use pretty_assertions::assert_eq;

    fn section(id: &str, html: &str) -> ContentSection {
        ContentSection {
            id: id.to_string(),
            name: id.to_string(),
            html: html.to_string(),
            css: ".x{}".to_string(),
            quality: Some(0.9),
            fallback: false,
            refined: false,
        }
    }

    fn content(sections: Vec<ContentSection>) -> PhaseData {
        PhaseData::Content(GeneratedContent {
            title: "t".to_string(),
            model: "m".to_string(),
            fingerprint: "f".to_string(),
            sections,
            validation: None,
            enhanced: false,
        })
    }

    #[tokio::test]
    async fn test_clean_content_passes() {
        let phase = ValidationPhase::new(Arc::new(BasicContentValidator));
        let ctx = PhaseContext::new("p1", "validation");
        let output = phase
            .execute(&content(vec![section("a", "<section>a</section>")]), &ctx)
            .await
            .unwrap();

        assert!((phase.calculate_quality_score(&output) - 1.0).abs() < f64::EPSILON);
        assert!(phase.get_warnings(&output, &ctx).is_empty());
    }

    #[tokio::test]
    async fn test_corrector_fixes_error_sections() {
        let mut corrector = MockErrorCorrector::new();
        corrector.expect_correct().times(1).returning(|section, issues| {
            assert_eq!(issues.len(), 1);
            let mut fixed = section.clone();
            fixed.html = "<section>fixed</section>".to_string();
            Ok(fixed)
        });
        let phase = ValidationPhase::new(Arc::new(BasicContentValidator))
            .with_corrector(Some(Arc::new(corrector)));
        let ctx = PhaseContext::new("p1", "validation");

        let output = phase
            .execute(
                &content(vec![section("good", "<section>ok</section>"), section("bad", "<section>")]),
                &ctx,
            )
            .await
            .unwrap();
        let content = output.as_content().unwrap();
        let report = content.validation.as_ref().unwrap();

        assert_eq!(content.sections[1].html, "<section>fixed</section>");
        assert_eq!(report.corrected_sections, vec!["bad".to_string()]);
        assert_eq!(report.error_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_correction_keeps_original() {
        let mut corrector = MockErrorCorrector::new();
        corrector
            .expect_correct()
            .returning(|_, _| Err(anyhow::anyhow!("corrector offline")));
        let phase = ValidationPhase::new(Arc::new(BasicContentValidator))
            .with_corrector(Some(Arc::new(corrector)));
        let ctx = PhaseContext::new("p1", "validation");

        let output = phase
            .execute(&content(vec![section("bad", "")]), &ctx)
            .await
            .unwrap();
        let content = output.as_content().unwrap();
        assert_eq!(content.sections[0].html, "");
        assert_eq!(content.validation.as_ref().unwrap().error_count(), 1);
        assert_eq!(
            phase.get_warnings(&output, &ctx),
            vec!["bad: section 'bad' has no markup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_validator_error_is_retryable() {
        let mut validator = MockContentValidator::new();
        validator
            .expect_validate()
            .returning(|_| Err(anyhow::anyhow!("timeout talking to linter")));
        let phase = ValidationPhase::new(Arc::new(validator));
        let ctx = PhaseContext::new("p1", "validation");

        let err = phase
            .execute(&content(vec![section("a", "<section></section>")]), &ctx)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validate_input_and_fallback() {
        let phase = ValidationPhase::new(Arc::new(BasicContentValidator));
        let ctx = PhaseContext::new("p1", "validation");
        assert!(phase.validate_input(&content(Vec::new()), &ctx).is_err());

        let placeholder = ContentSection::placeholder(&SectionPlan {
            id: "a".to_string(),
            name: "A".to_string(),
            order: 0,
        });
        let fallback = phase.create_fallback_result(&content(vec![placeholder]), &ctx);
        assert_eq!(phase.calculate_quality_score(&fallback), 0.0);
        assert_eq!(
            phase.get_warnings(&fallback, &ctx),
            vec!["validation unavailable, content not checked".to_string()]
        );
    }
}
