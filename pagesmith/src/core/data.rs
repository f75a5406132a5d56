//! Payload types that flow between phases.
//!
//! The orchestrator treats [`PhaseData`] as opaque; only the concrete
//! phases look inside it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Descriptive metadata that accompanies a design image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Original file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// MIME type declared by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Image width in pixels, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Image height in pixels, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Section names the caller expects the design to contain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub section_hints: Vec<String>,
    /// Free-form extras.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ImageMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the file name.
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Sets the declared MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Sets the dimensions.
    #[must_use]
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Sets the section hints.
    #[must_use]
    pub fn with_section_hints(mut self, hints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.section_hints = hints.into_iter().map(Into::into).collect();
        self
    }
}

/// The design input carried by a pipeline request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPayload {
    /// Raw image bytes.
    Image {
        /// Encoded image bytes.
        data: Vec<u8>,
        /// Accompanying metadata.
        #[serde(default)]
        metadata: ImageMetadata,
    },
    /// A `data:<mime>;base64,<payload>` URL.
    DataUrl {
        /// The full data URL.
        url: String,
        /// Accompanying metadata.
        #[serde(default)]
        metadata: ImageMetadata,
    },
}

impl InputPayload {
    /// Creates an image payload from raw bytes.
    #[must_use]
    pub fn image(data: Vec<u8>, metadata: ImageMetadata) -> Self {
        Self::Image { data, metadata }
    }

    /// Creates a payload from a base64 data URL.
    #[must_use]
    pub fn data_url(url: impl Into<String>, metadata: ImageMetadata) -> Self {
        Self::DataUrl {
            url: url.into(),
            metadata,
        }
    }

    /// Returns the metadata.
    #[must_use]
    pub fn metadata(&self) -> &ImageMetadata {
        match self {
            Self::Image { metadata, .. } | Self::DataUrl { metadata, .. } => metadata,
        }
    }

    /// Approximate size of the encoded image in bytes.
    #[must_use]
    pub fn approximate_len(&self) -> usize {
        match self {
            Self::Image { data, .. } => data.len(),
            // base64 carries 3 bytes per 4 characters
            Self::DataUrl { url, .. } => url.len() / 4 * 3,
        }
    }
}

/// Image container formats recognised by signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG.
    Png,
    /// JPEG.
    Jpeg,
    /// GIF.
    Gif,
    /// WebP.
    Webp,
}

impl ImageFormat {
    /// Detects the format from leading magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }

    /// The canonical MIME type.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

/// One section the design is expected to be split into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionPlan {
    /// Stable identifier, unique within a design.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Position in the page, top to bottom.
    pub order: usize,
}

/// Output of the input-processing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedDesign {
    /// Working title for the module.
    pub title: String,
    /// Detected image format.
    pub format: ImageFormat,
    /// Decoded image size in bytes.
    pub byte_len: usize,
    /// Width in pixels, if known.
    pub width: Option<u32>,
    /// Height in pixels, if known.
    pub height: Option<u32>,
    /// MD5 fingerprint of the decoded image, hex encoded.
    pub fingerprint: String,
    /// The image re-encoded as standard base64, ready for a vision model.
    pub image_base64: String,
    /// Planned sections in page order.
    pub sections: Vec<SectionPlan>,
}

/// A generated section of web content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSection {
    /// Matches [`SectionPlan::id`].
    pub id: String,
    /// Section name.
    pub name: String,
    /// HTML fragment.
    pub html: String,
    /// Scoped CSS.
    pub css: String,
    /// Quality reported by the generating collaborator, 0..=1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    /// True if this section is a local placeholder rather than generated content.
    #[serde(default)]
    pub fallback: bool,
    /// True if the section went through refinement.
    #[serde(default)]
    pub refined: bool,
}

impl ContentSection {
    /// Builds a placeholder section for a plan entry.
    #[must_use]
    pub fn placeholder(plan: &SectionPlan) -> Self {
        Self {
            id: plan.id.clone(),
            name: plan.name.clone(),
            html: format!(
                "<section data-section=\"{}\" class=\"ps-placeholder\"><h2>{}</h2></section>",
                plan.id, plan.name
            ),
            css: format!(".ps-placeholder[data-section=\"{}\"] {{ min-height: 4rem; }}", plan.id),
            quality: Some(0.0),
            fallback: true,
            refined: false,
        }
    }
}

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Must be corrected.
    Error,
    /// Should be looked at.
    Warning,
    /// Informational.
    Info,
}

/// A problem found by the validation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Section the issue applies to, if section-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    /// Severity.
    pub severity: IssueSeverity,
    /// Description.
    pub message: String,
}

/// Result of validating generated content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Issues found.
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
    /// Overall score, 0..=1.
    pub score: f64,
    /// Sections that were corrected after validation.
    #[serde(default)]
    pub corrected_sections: Vec<String>,
}

impl ValidationReport {
    /// Number of error-severity issues.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .count()
    }
}

/// Content produced by generation and carried through validation and enhancement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// Module title.
    pub title: String,
    /// Model that produced the content.
    pub model: String,
    /// Fingerprint of the source design.
    pub fingerprint: String,
    /// Sections in page order.
    pub sections: Vec<ContentSection>,
    /// Validation report, once validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    /// True once enhancement ran.
    #[serde(default)]
    pub enhanced: bool,
}

impl GeneratedContent {
    /// Mean section quality; missing scores count as zero.
    #[must_use]
    pub fn mean_quality(&self) -> f64 {
        if self.sections.is_empty() {
            return 0.0;
        }
        let total: f64 = self.sections.iter().map(|s| s.quality.unwrap_or(0.0)).sum();
        total / self.sections.len() as f64
    }

    /// Number of sections that are placeholders.
    #[must_use]
    pub fn fallback_count(&self) -> usize {
        self.sections.iter().filter(|s| s.fallback).count()
    }
}

/// A file inside a packaged module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    /// Path relative to the module root.
    pub path: String,
    /// File contents.
    pub contents: String,
}

/// The final packaged module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulePackage {
    /// Slugified module name.
    pub name: String,
    /// Files in the package, manifest included.
    pub files: Vec<PackageFile>,
    /// Manifest describing the module.
    pub manifest: serde_json::Value,
    /// SHA-256 over all file paths and contents, hex encoded.
    pub checksum: String,
}

impl ModulePackage {
    /// Looks up a file by path.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&PackageFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// The payload passed from one phase to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PhaseData {
    /// The request input, before any phase ran.
    Design(InputPayload),
    /// Output of input processing.
    Analyzed(AnalyzedDesign),
    /// Generated, validated or enhanced content.
    Content(GeneratedContent),
    /// The packaged module.
    Package(ModulePackage),
}

impl PhaseData {
    /// Short name of the variant, for logs and error messages.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Design(_) => "design",
            Self::Analyzed(_) => "analyzed",
            Self::Content(_) => "content",
            Self::Package(_) => "package",
        }
    }

    /// Returns the content if this is a content payload.
    #[must_use]
    pub fn as_content(&self) -> Option<&GeneratedContent> {
        match self {
            Self::Content(content) => Some(content),
            _ => None,
        }
    }

    /// Returns the package if this is a package payload.
    #[must_use]
    pub fn as_package(&self) -> Option<&ModulePackage> {
        match self {
            Self::Package(package) => Some(package),
            _ => None,
        }
    }
}
