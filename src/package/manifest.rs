//! Package-build and update-request manifests.
//!
//! Both manifests are accepted as JSON (`.json`) or YAML (`.yaml`/`.yml`)
//! with the same logical schema.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::constraint::DependencyConstraint;
use super::version::parse_version;
use crate::runtime::Runtime;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("unsupported manifest format '{0}' (expected .json, .yaml or .yml)")]
    UnsupportedFormat(String),
    #[error("failed to parse JSON manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse YAML manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(ManifestFormat::Json),
            "yaml" | "yml" => Ok(ManifestFormat::Yaml),
            _ => Err(ManifestError::UnsupportedFormat(
                path.extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_else(|| path.display().to_string()),
            )),
        }
    }

    fn parse<T: for<'de> Deserialize<'de>>(&self, content: &str) -> Result<T, ManifestError> {
        match self {
            ManifestFormat::Json => Ok(serde_json::from_str(content)?),
            ManifestFormat::Yaml => Ok(serde_yaml::from_str(content)?),
        }
    }
}

/// A file-copy target: a glob pattern plus comma-separated exclusion globs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTarget")]
pub struct Target {
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exclude: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTarget {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        exclude: Option<String>,
    },
}

impl From<RawTarget> for Target {
    fn from(raw: RawTarget) -> Self {
        match raw {
            RawTarget::Path(path) => Target {
                path,
                exclude: String::new(),
            },
            RawTarget::Full { path, exclude } => Target {
                path,
                exclude: exclude.unwrap_or_default(),
            },
        }
    }
}

impl Target {
    /// Exclusion patterns, split on commas with blanks dropped.
    pub fn exclude_patterns(&self) -> Vec<&str> {
        self.exclude
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// Authoring input for `create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    #[serde(rename = "ver", alias = "version")]
    pub version: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default, rename = "packets", alias = "dependencies")]
    pub dependencies: Vec<DependencyConstraint>,
}

impl PackageManifest {
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let format = ManifestFormat::from_path(path)?;
        let content = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read package manifest {:?}", path))?;
        let manifest: PackageManifest = format
            .parse(&content)
            .with_context(|| format!("Failed to parse package manifest {:?}", path))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject names and versions that cannot be laid out as `<name>/<version>/`.
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_path_component("name", &self.name)?;
        validate_path_component("version", &self.version)?;
        if parse_version(&self.version).is_none() {
            return Err(ManifestError::Invalid(format!(
                "version '{}' of package '{}' is not a semantic version",
                self.version, self.name
            )));
        }
        Ok(())
    }
}

/// Input for `update`: the root constraint set to resolve and fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateManifest {
    #[serde(default)]
    pub packages: Vec<DependencyConstraint>,
}

impl UpdateManifest {
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let format = ManifestFormat::from_path(path)?;
        let content = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read update manifest {:?}", path))?;
        let manifest: UpdateManifest = format
            .parse(&content)
            .with_context(|| format!("Failed to parse update manifest {:?}", path))?;
        if manifest.packages.is_empty() {
            return Err(ManifestError::Invalid("update manifest lists no packages".into()).into());
        }
        for dep in &manifest.packages {
            validate_path_component("package name", &dep.name)?;
        }
        Ok(manifest)
    }
}

pub(crate) fn validate_path_component(what: &str, value: &str) -> Result<(), ManifestError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ManifestError::Invalid(format!("{} must not be empty", what)));
    }
    if trimmed != value
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.chars().any(char::is_control)
    {
        return Err(ManifestError::Invalid(format!(
            "{} '{}' is not a valid directory name",
            what, value
        )));
    }
    Ok(())
}
