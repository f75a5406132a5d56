//! Packaging: bundle content into a named module with manifest and checksum.

use super::{collaborator_error, unexpected_input, Phase};
use crate::context::PhaseContext;
use crate::core::{GeneratedContent, ModulePackage, PackageFile, PhaseData, PhaseKind};
use crate::errors::PhaseError;
use crate::services::ModulePackager;
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Manifest path inside every package.
pub const MANIFEST_PATH: &str = "manifest.json";

/// Lowercases and joins alphanumeric runs with single hyphens.
#[must_use]
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn checksum(files: &[PackageFile]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(file.contents.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Delegates file rendering to a [`ModulePackager`] and adds the manifest.
pub struct PackagingPhase {
    name: String,
    packager: Arc<dyn ModulePackager>,
}

impl std::fmt::Debug for PackagingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagingPhase").field("name", &self.name).finish()
    }
}

impl PackagingPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new(packager: Arc<dyn ModulePackager>) -> Self {
        Self {
            name: "packaging".to_string(),
            packager,
        }
    }

    fn module_name(content: &GeneratedContent, ctx: &PhaseContext) -> String {
        let requested = ctx.options().module_name.as_deref().unwrap_or(&content.title);
        let slug = slugify(requested);
        if slug.is_empty() {
            "module".to_string()
        } else {
            slug
        }
    }

    fn assemble(name: String, content: &GeneratedContent, files: Vec<PackageFile>) -> ModulePackage {
        let mut files: Vec<PackageFile> = files.into_iter().filter(|f| f.path != MANIFEST_PATH).collect();
        let checksum = checksum(&files);
        let manifest = serde_json::json!({
            "name": name,
            "title": content.title,
            "model": content.model,
            "fingerprint": content.fingerprint,
            "sections": content.sections.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "fallback_sections": content.fallback_count(),
            "enhanced": content.enhanced,
            "validation_score": content.validation.as_ref().map(|v| v.score),
            "files": files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
            "checksum": checksum,
            "generated_at": iso_timestamp(),
        });
        files.push(PackageFile {
            path: MANIFEST_PATH.to_string(),
            contents: serde_json::to_string_pretty(&manifest).unwrap_or_default(),
        });
        ModulePackage {
            name,
            files,
            manifest,
            checksum,
        }
    }
}

#[async_trait]
impl Phase for PackagingPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PhaseKind {
        PhaseKind::Packaging
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
        let content = input
            .as_content()
            .ok_or_else(|| unexpected_input(&self.name, "content", input))?;
        ctx.checkpoint()?;

        let name = Self::module_name(content, ctx);
        let files = self
            .packager
            .package(content, &name)
            .await
            .map_err(|e| collaborator_error(&self.name, "packager failed", &e))?;
        if files.is_empty() {
            return Err(PhaseError::execution(&self.name, "packager returned no files"));
        }

        let package = Self::assemble(name, content, files);
        tracing::debug!(
            pipeline_id = %ctx.pipeline_id(),
            module = %package.name,
            files = package.files.len(),
            "Module packaged"
        );
        Ok(PhaseData::Package(package))
    }

    fn calculate_quality_score(&self, output: &PhaseData) -> f64 {
        let Some(package) = output.as_package() else {
            return 0.0;
        };
        let sections = package.manifest["sections"].as_array().map_or(0, Vec::len);
        if sections == 0 {
            return 0.0;
        }
        let fallbacks = package.manifest["fallback_sections"].as_u64().unwrap_or(0) as f64;
        (1.0 - fallbacks / sections as f64).clamp(0.0, 1.0)
    }

    fn get_warnings(&self, output: &PhaseData, _ctx: &PhaseContext) -> Vec<String> {
        let Some(package) = output.as_package() else {
            return Vec::new();
        };
        let mut warnings = Vec::new();
        let fallbacks = package.manifest["fallback_sections"].as_u64().unwrap_or(0);
        if fallbacks > 0 {
            warnings.push(format!("{fallbacks} placeholder section(s) packaged"));
        }
        if package.manifest["validation_score"].is_null() {
            warnings.push("content was packaged without validation".to_string());
        }
        if package.file("index.html").is_none() {
            warnings.push("package has no index.html".to_string());
        }
        warnings
    }

    fn collect_metadata(&self, output: &PhaseData) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        if let Some(package) = output.as_package() {
            metadata.insert("module_name".to_string(), serde_json::json!(package.name));
            metadata.insert("file_count".to_string(), serde_json::json!(package.files.len()));
            metadata.insert("checksum".to_string(), serde_json::json!(package.checksum));
        }
        metadata
    }

    fn create_fallback_result(&self, input: &PhaseData, ctx: &PhaseContext) -> PhaseData {
        let Some(content) = input.as_content() else {
            let empty = GeneratedContent {
                title: "Untitled Design".to_string(),
                model: ctx.model().to_string(),
                fingerprint: String::new(),
                sections: Vec::new(),
                validation: None,
                enhanced: false,
            };
            return PhaseData::Package(Self::assemble("module".to_string(), &empty, Vec::new()));
        };
        let body: String = content.sections.iter().map(|s| s.html.as_str()).collect::<Vec<_>>().join("\n");
        let files = vec![PackageFile {
            path: "index.html".to_string(),
            contents: format!("<!DOCTYPE html>\n<html>\n<body>\n{body}\n</body>\n</html>\n"),
        }];
        PhaseData::Package(Self::assemble(Self::module_name(content, ctx), content, files))
    }
}
