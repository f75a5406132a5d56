//! External collaborators the standard phases delegate to.
//!
//! The AI-backed implementations live outside this crate. What is provided
//! here is the trait surface, request/response types, and two local
//! implementations that need no network: [`BasicContentValidator`] and
//! [`BasicModulePackager`].

use crate::core::{
    ContentSection, GeneratedContent, IssueSeverity, PackageFile, SectionPlan, ValidationIssue,
    ValidationReport,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Input for generating one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Run identifier.
    pub pipeline_id: String,
    /// Model to use.
    pub model: String,
    /// Module title.
    pub title: String,
    /// The section to produce.
    pub section: SectionPlan,
    /// The design image, base64 encoded.
    pub image_base64: String,
    /// Fingerprint of the design.
    pub fingerprint: String,
}

/// HTML and CSS returned for a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSection {
    /// HTML fragment.
    pub html: String,
    /// Scoped CSS.
    pub css: String,
    /// Self-reported quality, 0..=1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

/// Input for refining a section that scored below threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementRequest {
    /// Run identifier.
    pub pipeline_id: String,
    /// Model to use.
    pub model: String,
    /// The section as it stands.
    pub section: ContentSection,
    /// Target quality, 0..=1.
    pub quality_threshold: f64,
    /// Outstanding validation issues for this section.
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
}

/// Produces content for one section of a design.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generates HTML/CSS for `request.section`.
    async fn generate_section(&self, request: &GenerationRequest) -> anyhow::Result<GeneratedSection>;
}

/// Checks generated content.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentValidator: Send + Sync {
    /// Returns the issues found and an overall score.
    async fn validate(&self, content: &GeneratedContent) -> anyhow::Result<ValidationReport>;
}

/// Repairs a section that failed validation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ErrorCorrector: Send + Sync {
    /// Returns a corrected copy of `section`.
    async fn correct(
        &self,
        section: &ContentSection,
        issues: &[ValidationIssue],
    ) -> anyhow::Result<ContentSection>;
}

/// Improves a low-quality section.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentRefiner: Send + Sync {
    /// Returns refined HTML/CSS for `request.section`.
    async fn refine_section(&self, request: &RefinementRequest) -> anyhow::Result<GeneratedSection>;
}

/// Turns content into module files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModulePackager: Send + Sync {
    /// Renders the files of a module named `module_name`. The manifest is added by the caller.
    async fn package(
        &self,
        content: &GeneratedContent,
        module_name: &str,
    ) -> anyhow::Result<Vec<PackageFile>>;
}

/// The collaborators the standard pipeline needs.
#[derive(Clone)]
pub struct Services {
    /// Section generator.
    pub generator: Arc<dyn ContentGenerator>,
    /// Content validator.
    pub validator: Arc<dyn ContentValidator>,
    /// Optional corrector for sections with error-severity issues.
    pub corrector: Option<Arc<dyn ErrorCorrector>>,
    /// Section refiner.
    pub refiner: Arc<dyn ContentRefiner>,
    /// Module packager.
    pub packager: Arc<dyn ModulePackager>,
}

impl Services {
    /// Bundles a generator and refiner with the local validator and packager.
    #[must_use]
    pub fn new(generator: Arc<dyn ContentGenerator>, refiner: Arc<dyn ContentRefiner>) -> Self {
        Self {
            generator,
            validator: Arc::new(BasicContentValidator),
            corrector: None,
            refiner,
            packager: Arc::new(BasicModulePackager),
        }
    }

    /// Replaces the validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ContentValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Sets the corrector.
    #[must_use]
    pub fn with_corrector(mut self, corrector: Arc<dyn ErrorCorrector>) -> Self {
        self.corrector = Some(corrector);
        self
    }

    /// Replaces the packager.
    #[must_use]
    pub fn with_packager(mut self, packager: Arc<dyn ModulePackager>) -> Self {
        self.packager = packager;
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("corrector", &self.corrector.is_some())
            .finish_non_exhaustive()
    }
}

/// Structural checks that need no model: empty markup, missing section
/// marker, unbalanced `<section>` tags, placeholder content.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicContentValidator;

impl BasicContentValidator {
    fn check_section(section: &ContentSection, issues: &mut Vec<ValidationIssue>) {
        let mut issue = |severity, message: String| {
            issues.push(ValidationIssue {
                section_id: Some(section.id.clone()),
                severity,
                message,
            });
        };

        if section.html.trim().is_empty() {
            issue(IssueSeverity::Error, format!("section '{}' has no markup", section.id));
            return;
        }
        let opens = section.html.matches("<section").count();
        let closes = section.html.matches("</section>").count();
        if opens != closes {
            issue(
                IssueSeverity::Error,
                format!("section '{}' has {opens} <section> and {closes} </section> tags", section.id),
            );
        }
        if section.css.trim().is_empty() {
            issue(IssueSeverity::Warning, format!("section '{}' has no styles", section.id));
        }
        if section.fallback {
            issue(IssueSeverity::Info, format!("section '{}' is a placeholder", section.id));
        }
    }
}

#[async_trait]
impl ContentValidator for BasicContentValidator {
    async fn validate(&self, content: &GeneratedContent) -> anyhow::Result<ValidationReport> {
        let mut issues = Vec::new();
        for section in &content.sections {
            Self::check_section(section, &mut issues);
        }

        let sections = content.sections.len().max(1) as f64;
        let errors = issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .count() as f64;
        let warnings = issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .count() as f64;
        let score = (1.0 - (errors + 0.25 * warnings) / sections).clamp(0.0, 1.0);

        Ok(ValidationReport {
            issues,
            score,
            corrected_sections: Vec::new(),
        })
    }
}

/// Writes `index.html` and `styles.css` from the sections in page order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicModulePackager;

#[async_trait]
impl ModulePackager for BasicModulePackager {
    async fn package(
        &self,
        content: &GeneratedContent,
        module_name: &str,
    ) -> anyhow::Result<Vec<PackageFile>> {
        if content.sections.is_empty() {
            anyhow::bail!("nothing to package for module '{module_name}'");
        }

        let body: Vec<&str> = content.sections.iter().map(|s| s.html.as_str()).collect();
        let html = format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<link rel=\"stylesheet\" href=\"styles.css\">\n</head>\n<body class=\"{}\">\n{}\n</body>\n</html>\n",
            content.title,
            module_name,
            body.join("\n")
        );
        let css = content
            .sections
            .iter()
            .filter(|s| !s.css.trim().is_empty())
            .map(|s| format!("/* {} */\n{}", s.id, s.css))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(vec![
            PackageFile {
                path: "index.html".to_string(),
                contents: html,
            },
            PackageFile {
                path: "styles.css".to_string(),
                contents: css,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn section(id: &str, html: &str, css: &str) -> ContentSection {
        ContentSection {
            id: id.to_string(),
            name: id.to_string(),
            html: html.to_string(),
            css: css.to_string(),
            quality: Some(0.9),
            fallback: false,
            refined: false,
        }
    }

    fn content(sections: Vec<ContentSection>) -> GeneratedContent {
        GeneratedContent {
            title: "Landing".to_string(),
            model: "m".to_string(),
            fingerprint: "f".to_string(),
            sections,
            validation: None,
            enhanced: false,
        }
    }

    #[tokio::test]
    async fn test_basic_validator_clean_content() {
        let report = BasicContentValidator
            .validate(&content(vec![section("hero", "<section>hi</section>", ".hero{}")]))
            .await
            .unwrap();
        assert!(report.issues.is_empty());
        assert!((report.score - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_basic_validator_flags_problems() {
        let report = BasicContentValidator
            .validate(&content(vec![
                section("a", "", ".a{}"),
                section("b", "<section><div>", ""),
            ]))
            .await
            .unwrap();

        assert_eq!(report.error_count(), 2);
        assert_eq!(
            report.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).count(),
            1
        );
        assert!(report.score < 0.5);
    }

    #[tokio::test]
    async fn test_basic_packager_files() {
        let files = BasicModulePackager
            .package(
                &content(vec![
                    section("header", "<section>H</section>", ".h{}"),
                    section("footer", "<section>F</section>", ""),
                ]),
                "landing-page",
            )
            .await
            .unwrap();

        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["index.html", "styles.css"]);
        assert!(files[0].contents.contains("<title>Landing</title>"));
        assert!(files[0].contents.find("H</section>") < files[0].contents.find("F</section>"));
        assert_eq!(files[1].contents, "/* header */\n.h{}");
    }

    #[tokio::test]
    async fn test_basic_packager_rejects_empty_content() {
        assert!(BasicModulePackager.package(&content(Vec::new()), "x").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_generator() {
        let mut generator = MockContentGenerator::new();
        generator
            .expect_generate_section()
            .times(1)
            .returning(|req| {
                Ok(GeneratedSection {
                    html: format!("<section>{}</section>", req.section.name),
                    css: String::new(),
                    quality: Some(0.7),
                })
            });

        let request = GenerationRequest {
            pipeline_id: "p".to_string(),
            model: "m".to_string(),
            title: "t".to_string(),
            section: SectionPlan {
                id: "hero".to_string(),
                name: "Hero".to_string(),
                order: 0,
            },
            image_base64: String::new(),
            fingerprint: String::new(),
        };
        let out = generator.generate_section(&request).await.unwrap();
        assert_eq!(out.html, "<section>Hero</section>");
    }
}
