//! Archive manifest generation: the internal XML manifest and the
//! content-types document.
//!
//! Both documents are derived from the validated descriptor and the
//! already-collected file list. Asset detection is name-pattern matching
//! against that list, never separate filesystem probing, so every asset
//! reference is guaranteed to name a member that actually lands in the
//! archive.

use crate::collect::CollectedFile;
use crate::manifest::ExtensionManifest;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Archive path of the generated XML manifest.
pub const VSIX_MANIFEST_PATH: &str = "extension.vsixmanifest";

/// Archive path of the content-types document.
pub const CONTENT_TYPES_PATH: &str = "[Content_Types].xml";

/// Archive path of the extension descriptor.
pub const PACKAGE_JSON_PATH: &str = "extension/package.json";

/// Installation target declared by every archive.
pub const INSTALLATION_TARGET: &str = "Microsoft.VisualStudio.Code";

const ASSET_MANIFEST: &str = "Microsoft.VisualStudio.Code.Manifest";
const ASSET_DETAILS: &str = "Microsoft.VisualStudio.Services.Content.Details";
const ASSET_LICENSE: &str = "Microsoft.VisualStudio.Services.Content.License";
const ASSET_ICON: &str = "Microsoft.VisualStudio.Services.Icons.Default";

/// Errors that can occur while generating the archive manifest.
#[derive(Error, Debug)]
pub enum VsixManifestError {
    /// The manifest would reference a file that was not collected.
    #[error("{kind} asset '{path}' is not among the collected files")]
    AssetMissing { kind: &'static str, path: String },
}

/// One `<Asset>` entry of the generated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub kind: &'static str,
    pub path: String,
}

fn readme_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^extension/readme(\.md|\.txt|\.markdown)?$").expect("static pattern")
    })
}

fn license_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^extension/license(\.md|\.txt)?$").expect("static pattern"))
}

/// Detect the asset list for a manifest against the collected files.
///
/// # Errors
///
/// Fails when the descriptor itself was not collected, or when the
/// descriptor declares an icon that no collected file provides.
pub fn detect_assets(
    manifest: &ExtensionManifest,
    files: &[CollectedFile],
) -> Result<Vec<Asset>, VsixManifestError> {
    let has = |path: &str| files.iter().any(|f| f.path == path);

    if !has(PACKAGE_JSON_PATH) {
        return Err(VsixManifestError::AssetMissing {
            kind: "manifest",
            path: PACKAGE_JSON_PATH.to_string(),
        });
    }

    let mut assets = vec![Asset {
        kind: ASSET_MANIFEST,
        path: PACKAGE_JSON_PATH.to_string(),
    }];

    if let Some(readme) = files.iter().find(|f| readme_pattern().is_match(&f.path)) {
        assets.push(Asset {
            kind: ASSET_DETAILS,
            path: readme.path.clone(),
        });
    }

    if let Some(license) = files.iter().find(|f| license_pattern().is_match(&f.path)) {
        assets.push(Asset {
            kind: ASSET_LICENSE,
            path: license.path.clone(),
        });
    }

    if let Some(ref icon) = manifest.icon {
        let path = format!("extension/{icon}");
        if !has(&path) {
            return Err(VsixManifestError::AssetMissing { kind: "icon", path });
        }
        assets.push(Asset {
            kind: ASSET_ICON,
            path,
        });
    }

    Ok(assets)
}

/// Render the internal XML manifest.
///
/// # Errors
///
/// Propagates asset detection failures; see [`detect_assets`].
pub fn to_vsix_manifest(
    manifest: &ExtensionManifest,
    files: &[CollectedFile],
) -> Result<String, VsixManifestError> {
    let assets = detect_assets(manifest, files)?;

    let license = assets
        .iter()
        .find(|a| a.kind == ASSET_LICENSE)
        .map(|a| a.path.clone());
    let icon = assets
        .iter()
        .find(|a| a.kind == ASSET_ICON)
        .map(|a| a.path.clone());

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    xml.push_str(concat!(
        "<PackageManifest Version=\"2.0.0\" ",
        "xmlns=\"http://schemas.microsoft.com/developer/vsx-schema/2011\" ",
        "xmlns:d=\"http://schemas.microsoft.com/developer/vsx-schema-design/2011\">\n",
    ));

    xml.push_str("\t<Metadata>\n");
    xml.push_str(&format!(
        "\t\t<Identity Language=\"en-US\" Id=\"{}\" Version=\"{}\" Publisher=\"{}\"/>\n",
        escape(&manifest.name),
        escape(&manifest.version),
        escape(&manifest.publisher),
    ));
    xml.push_str(&format!(
        "\t\t<DisplayName>{}</DisplayName>\n",
        escape(manifest.display_name())
    ));
    xml.push_str(&format!(
        "\t\t<Description xml:space=\"preserve\">{}</Description>\n",
        escape(manifest.description.as_deref().unwrap_or(""))
    ));
    xml.push_str(&format!("\t\t<Tags>{}</Tags>\n", escape(&manifest.tags())));
    if !manifest.categories.is_empty() {
        xml.push_str(&format!(
            "\t\t<Categories>{}</Categories>\n",
            escape(&manifest.categories.join(","))
        ));
    }
    xml.push_str(&format!(
        "\t\t<GalleryFlags>{}</GalleryFlags>\n",
        manifest.gallery_flags()
    ));
    if let Some(license) = license {
        xml.push_str(&format!("\t\t<License>{}</License>\n", escape(&license)));
    }
    if let Some(icon) = icon {
        xml.push_str(&format!("\t\t<Icon>{}</Icon>\n", escape(&icon)));
    }
    xml.push_str("\t</Metadata>\n");

    xml.push_str("\t<Installation>\n");
    xml.push_str(&format!(
        "\t\t<InstallationTarget Id=\"{INSTALLATION_TARGET}\"/>\n"
    ));
    xml.push_str("\t</Installation>\n");
    xml.push_str("\t<Dependencies/>\n");

    xml.push_str("\t<Assets>\n");
    for asset in &assets {
        xml.push_str(&format!(
            "\t\t<Asset Type=\"{}\" Path=\"{}\"/>\n",
            asset.kind,
            escape(&asset.path)
        ));
    }
    xml.push_str("\t</Assets>\n");
    xml.push_str("</PackageManifest>\n");

    Ok(xml)
}

/// Render the content-types document: one `Default` entry per distinct
/// extension in the collected list, plus the two always-present defaults
/// for the manifest's own extension and JSON.
#[must_use]
pub fn to_content_types(files: &[CollectedFile]) -> String {
    let mut types: BTreeMap<String, &'static str> = BTreeMap::new();
    types.insert("vsixmanifest".to_string(), "text/xml");
    types.insert("json".to_string(), "application/json");

    for file in files {
        if let Some(ext) = file_extension(&file.path) {
            types.entry(ext.clone()).or_insert_with(|| mime_type(&ext));
        }
    }

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    xml.push_str(concat!(
        "<Types xmlns=\"http://schemas.openxmlformats.org/",
        "package/2006/content-types\">\n",
    ));
    for (ext, mime) in &types {
        xml.push_str(&format!(
            "\t<Default Extension=\".{}\" ContentType=\"{}\"/>\n",
            escape(ext),
            mime
        ));
    }
    xml.push_str("</Types>\n");
    xml
}

/// Lowercased extension of the final path segment. A leading dot is not an
/// extension, so dotfiles yield `None`.
fn file_extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let dot = name.rfind('.')?;
    if dot == 0 || dot + 1 == name.len() {
        return None;
    }
    Some(name[dot + 1..].to_ascii_lowercase())
}

/// Static extension → MIME table; unknown extensions are opaque binary.
fn mime_type(ext: &str) -> &'static str {
    match ext {
        "json" => "application/json",
        "vsixmanifest" | "xml" => "text/xml",
        "md" | "markdown" => "text/x-markdown",
        "txt" => "text/plain",
        "js" => "application/javascript",
        "css" => "text/css",
        "html" | "htm" => "text/html",
        "yml" | "yaml" => "text/yaml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::CollectedFile;

    fn manifest() -> ExtensionManifest {
        ExtensionManifest::parse(
            r#"{
                "name": "hello",
                "version": "1.0.0",
                "publisher": "acme",
                "engines": { "vscode": "^1.80.0" },
                "description": "Says <hello> & waves"
            }"#,
        )
        .unwrap()
    }

    fn file(path: &str) -> CollectedFile {
        CollectedFile::in_memory(path, Vec::new())
    }

    #[test]
    fn descriptor_alone_yields_one_asset() {
        let files = vec![file("extension/package.json")];
        let assets = detect_assets(&manifest(), &files).unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].kind, ASSET_MANIFEST);
    }

    #[test]
    fn readme_detection_adds_second_asset() {
        let files = vec![file("extension/package.json"), file("extension/readme.md")];
        let assets = detect_assets(&manifest(), &files).unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[1].kind, ASSET_DETAILS);
        assert_eq!(assets[1].path, "extension/readme.md");
    }

    #[test]
    fn readme_detection_is_case_insensitive() {
        let files = vec![file("extension/package.json"), file("extension/README.md")];
        let assets = detect_assets(&manifest(), &files).unwrap();
        assert_eq!(assets.len(), 2);
    }

    #[test]
    fn license_detection() {
        let files = vec![file("extension/package.json"), file("extension/LICENSE.txt")];
        let assets = detect_assets(&manifest(), &files).unwrap();
        assert_eq!(assets[1].kind, ASSET_LICENSE);
    }

    #[test]
    fn lookalike_names_are_not_assets() {
        let files = vec![
            file("extension/package.json"),
            file("extension/readme.md.bak"),
            file("extension/licensees.txt"),
        ];
        let assets = detect_assets(&manifest(), &files).unwrap();
        assert_eq!(assets.len(), 1);
    }

    #[test]
    fn missing_descriptor_is_asset_missing() {
        let err = detect_assets(&manifest(), &[file("extension/readme.md")]).unwrap_err();
        assert!(matches!(err, VsixManifestError::AssetMissing { kind: "manifest", .. }));
    }

    #[test]
    fn declared_icon_must_be_collected() {
        let mut m = manifest();
        m.icon = Some("images/icon.png".to_string());
        let err = detect_assets(&m, &[file("extension/package.json")]).unwrap_err();
        assert!(matches!(err, VsixManifestError::AssetMissing { kind: "icon", .. }));

        let files = vec![
            file("extension/package.json"),
            file("extension/images/icon.png"),
        ];
        let assets = detect_assets(&m, &files).unwrap();
        assert_eq!(assets.last().unwrap().kind, ASSET_ICON);
        assert_eq!(assets.last().unwrap().path, "extension/images/icon.png");
    }

    #[test]
    fn manifest_xml_escapes_metadata() {
        let files = vec![file("extension/package.json")];
        let xml = to_vsix_manifest(&manifest(), &files).unwrap();
        assert!(xml.contains("Says &lt;hello&gt; &amp; waves"));
        assert!(xml.contains("<Identity Language=\"en-US\" Id=\"hello\" Version=\"1.0.0\" Publisher=\"acme\"/>"));
        assert!(xml.contains("<InstallationTarget Id=\"Microsoft.VisualStudio.Code\"/>"));
        assert!(xml.contains("<Dependencies/>"));
    }

    #[test]
    fn manifest_xml_lists_tags_with_vscode_marker() {
        let mut m = manifest();
        m.keywords = vec!["linter".into()];
        let xml = to_vsix_manifest(&m, &[file("extension/package.json")]).unwrap();
        assert!(xml.contains("<Tags>linter;vscode</Tags>"));
    }

    #[test]
    fn generated_manifest_is_well_formed_xml() {
        let files = vec![file("extension/package.json"), file("extension/readme.md")];
        let xml = to_vsix_manifest(&manifest(), &files).unwrap();

        let package = sxd_document::parser::parse(&xml).unwrap();
        let document = package.as_document();
        let mut context = sxd_xpath::Context::new();
        context.set_namespace("v", "http://schemas.microsoft.com/developer/vsx-schema/2011");
        let factory = sxd_xpath::Factory::new();

        let count = factory
            .build("count(/v:PackageManifest/v:Assets/v:Asset)")
            .unwrap()
            .unwrap()
            .evaluate(&context, document.root())
            .unwrap();
        assert_eq!(count.number(), 2.0);

        let id = factory
            .build("string(/v:PackageManifest/v:Metadata/v:Identity/@Id)")
            .unwrap()
            .unwrap()
            .evaluate(&context, document.root())
            .unwrap();
        assert_eq!(id.string(), "hello");
    }

    #[test]
    fn content_types_cover_each_extension_once() {
        let files = vec![
            file("extension/a.txt"),
            file("extension/b/c.png"),
            file("extension/readme.md"),
            file("extension/Makefile"),
            file("extension/d.TXT"),
        ];
        let xml = to_content_types(&files);
        assert!(xml.contains("Extension=\".txt\" ContentType=\"text/plain\""));
        assert!(xml.contains("Extension=\".png\" ContentType=\"image/png\""));
        assert!(xml.contains("Extension=\".md\" ContentType=\"text/x-markdown\""));
        // Always-present defaults.
        assert!(xml.contains("Extension=\".vsixmanifest\" ContentType=\"text/xml\""));
        assert!(xml.contains("Extension=\".json\" ContentType=\"application/json\""));
        // One entry per extension, no entry for extensionless files.
        assert_eq!(xml.matches(".txt\"").count(), 1);
        assert_eq!(xml.matches("<Default").count(), 5);
    }

    #[test]
    fn unknown_extensions_fall_back_to_octet_stream() {
        let xml = to_content_types(&[file("extension/data.blob")]);
        assert!(xml.contains("Extension=\".blob\" ContentType=\"application/octet-stream\""));
    }

    #[test]
    fn dotfiles_have_no_extension() {
        assert_eq!(file_extension("extension/.eslintrc"), None);
        assert_eq!(file_extension("extension/a.json"), Some("json".to_string()));
        assert_eq!(file_extension("extension/trailing."), None);
    }
}
