//! Extension descriptor (`package.json`) parsing and validation.
//!
//! The descriptor is the structured input of the whole pipeline. Validation
//! runs before any external process is spawned or any file is touched, so a
//! malformed descriptor is an idempotent no-op on disk.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// The descriptor filename.
pub const MANIFEST_FILE: &str = "package.json";

/// The engine entry every packageable extension must declare.
pub const ENGINE_KEY: &str = "vscode";

/// Errors that can occur when reading or validating the descriptor.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("extension manifest not found: {0}")]
    NotFound(String),

    #[error("failed to read extension manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("error parsing extension manifest: not a valid JSON file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid version '{0}': {1}")]
    InvalidVersion(String, String),
}

/// Repository reference: either a bare URL or a typed object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Repository {
    Url(String),
    Detailed {
        #[serde(default, rename = "type")]
        kind: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

/// The parsed extension descriptor.
///
/// Unknown fields (contribution points and the like) are ignored; the
/// pipeline only consumes what it validates or copies into the archive
/// manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub publisher: String,

    /// Engine compatibility map; must contain [`ENGINE_KEY`].
    #[serde(default)]
    pub engines: BTreeMap<String, String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Icon path relative to the project root.
    #[serde(default)]
    pub icon: Option<String>,

    /// SPDX license identifier.
    #[serde(default)]
    pub license: Option<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub repository: Option<Repository>,

    #[serde(default)]
    pub homepage: Option<String>,

    /// Marks a pre-release listing in the gallery.
    #[serde(default)]
    pub preview: bool,

    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub extension_dependencies: Vec<String>,

    #[serde(default)]
    pub scripts: BTreeMap<String, String>,

    #[serde(default)]
    pub private: bool,
}

impl ExtensionManifest {
    /// Load and validate the descriptor from a project root.
    ///
    /// # Errors
    ///
    /// Returns an error if `package.json` is missing, unreadable, invalid
    /// JSON, or fails validation.
    pub fn from_dir(root: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = root.as_ref().join(MANIFEST_FILE);
        if !path.exists() {
            return Err(ManifestError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    /// Parse and validate a descriptor from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or a required field is
    /// missing or malformed.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the packaging preconditions.
    fn validate(&self) -> Result<(), ManifestError> {
        if self.name.is_empty() {
            return Err(ManifestError::MissingField("name"));
        }
        if self.version.is_empty() {
            return Err(ManifestError::MissingField("version"));
        }
        semver::Version::parse(&self.version)
            .map_err(|e| ManifestError::InvalidVersion(self.version.clone(), e.to_string()))?;
        if self.publisher.is_empty() {
            return Err(ManifestError::MissingField("publisher"));
        }
        if self.engines.is_empty() {
            return Err(ManifestError::MissingField("engines"));
        }
        match self.engines.get(ENGINE_KEY) {
            Some(range) if !range.is_empty() => Ok(()),
            _ => Err(ManifestError::MissingField("engines.vscode")),
        }
    }

    /// Display name shown in the gallery, falling back to the package name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Gallery tags: the keywords plus the fixed `vscode` marker.
    #[must_use]
    pub fn tags(&self) -> String {
        let mut tags = self.keywords.clone();
        tags.push("vscode".to_string());
        tags.join(";")
    }

    /// Gallery visibility flags.
    #[must_use]
    pub fn gallery_flags(&self) -> &'static str {
        if self.preview {
            "Public Preview"
        } else {
            "Public"
        }
    }

    /// Fully qualified identifier, `publisher.name`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}.{}", self.publisher, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "name": "hello",
        "version": "1.2.3",
        "publisher": "acme",
        "engines": { "vscode": "^1.80.0" }
    }"#;

    #[test]
    fn parse_minimal_manifest() {
        let manifest = ExtensionManifest::parse(MINIMAL).unwrap();
        assert_eq!(manifest.name, "hello");
        assert_eq!(manifest.version, "1.2.3");
        assert_eq!(manifest.publisher, "acme");
        assert_eq!(manifest.id(), "acme.hello");
    }

    #[test]
    fn missing_name_fails() {
        let err = ExtensionManifest::parse(
            r#"{"version": "1.0.0", "publisher": "p", "engines": {"vscode": "*"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("name")));
    }

    #[test]
    fn missing_publisher_fails() {
        let err = ExtensionManifest::parse(
            r#"{"name": "x", "version": "1.0.0", "engines": {"vscode": "*"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("publisher")));
    }

    #[test]
    fn missing_engine_entry_fails() {
        let err = ExtensionManifest::parse(
            r#"{"name": "x", "version": "1.0.0", "publisher": "p", "engines": {"node": "*"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("engines.vscode")));
    }

    #[test]
    fn missing_engines_fails() {
        let err =
            ExtensionManifest::parse(r#"{"name": "x", "version": "1.0.0", "publisher": "p"}"#)
                .unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("engines")));
    }

    #[test]
    fn non_semver_version_fails() {
        let err = ExtensionManifest::parse(
            r#"{"name": "x", "version": "one", "publisher": "p", "engines": {"vscode": "*"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidVersion(..)));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let manifest = ExtensionManifest::parse(
            r#"{
                "name": "x", "version": "0.0.1", "publisher": "p",
                "engines": {"vscode": "*"},
                "contributes": {"commands": [{"command": "x.run"}]},
                "activationEvents": ["*"]
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.name, "x");
    }

    #[test]
    fn display_name_falls_back_to_name() {
        let manifest = ExtensionManifest::parse(MINIMAL).unwrap();
        assert_eq!(manifest.display_name(), "hello");
    }

    #[test]
    fn tags_append_vscode_marker() {
        let mut manifest = ExtensionManifest::parse(MINIMAL).unwrap();
        manifest.keywords = vec!["theme".into(), "colors".into()];
        assert_eq!(manifest.tags(), "theme;colors;vscode");
    }

    #[test]
    fn preview_switches_gallery_flags() {
        let mut manifest = ExtensionManifest::parse(MINIMAL).unwrap();
        assert_eq!(manifest.gallery_flags(), "Public");
        manifest.preview = true;
        assert_eq!(manifest.gallery_flags(), "Public Preview");
    }

    #[test]
    fn repository_accepts_string_or_object() {
        let as_string = ExtensionManifest::parse(
            r#"{"name": "x", "version": "1.0.0", "publisher": "p",
                "engines": {"vscode": "*"}, "repository": "https://example.com/x.git"}"#,
        )
        .unwrap();
        assert!(matches!(as_string.repository, Some(Repository::Url(_))));

        let as_object = ExtensionManifest::parse(
            r#"{"name": "x", "version": "1.0.0", "publisher": "p",
                "engines": {"vscode": "*"},
                "repository": {"type": "git", "url": "https://example.com/x.git"}}"#,
        )
        .unwrap();
        assert!(matches!(
            as_object.repository,
            Some(Repository::Detailed { .. })
        ));
    }
}
