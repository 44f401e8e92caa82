//! End-to-end packaging: manifest, dependency resolution, collection,
//! generated members, checksum, zip.

use crate::archive::{self, ArchiveError};
use crate::checksum::{self, ChecksumError};
use crate::collect::{self, CollectError, CollectOptions, CollectedFile};
use crate::exec::CancellationToken;
use crate::manager::{detect_package_manager, package_manager, ManagerError, PackageManagerKind};
use crate::manifest::{ExtensionManifest, ManifestError};
use crate::vsixmanifest::{self, VsixManifestError, CONTENT_TYPES_PATH, VSIX_MANIFEST_PATH};
use std::path::PathBuf;
#[cfg(test)]
use std::path::Path;
use thiserror::Error;

/// Failures from any stage of the packaging pipeline.
#[derive(Error, Debug)]
pub enum PackError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    VsixManifest(#[from] VsixManifestError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Knobs for one packaging run. `cwd` is the extension root; everything
/// else has a usable default.
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Extension root directory, where the descriptor lives.
    pub cwd: PathBuf,
    /// Destination archive; defaults to `{name}-{version}.vsix` in `cwd`.
    pub out: Option<PathBuf>,
    /// Explicit manager choice; auto-detected from marker files when
    /// unset.
    pub package_manager: Option<PackageManagerKind>,
    /// Allow-list of dependency names forwarded to yarn resolution.
    pub packaged_dependencies: Option<Vec<String>>,
    /// Override ignore file; the in-tree one is optional, this one must
    /// exist.
    pub ignore_file: Option<PathBuf>,
    /// Descend into symlinked directories instead of treating links as
    /// opaque files.
    pub follow_symlinks: bool,
    pub cancellation: Option<CancellationToken>,
}

impl PackageOptions {
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            out: None,
            package_manager: None,
            packaged_dependencies: None,
            ignore_file: None,
            follow_symlinks: false,
            cancellation: None,
        }
    }
}

/// Result of a successful packaging run.
#[derive(Debug)]
pub struct PackageResult {
    pub manifest: ExtensionManifest,
    pub out: PathBuf,
    /// Archive member paths, in archive order.
    pub members: Vec<String>,
}

fn effective_manager(options: &PackageOptions) -> PackageManagerKind {
    options
        .package_manager
        .unwrap_or_else(|| detect_package_manager(&options.cwd))
}

/// Load the descriptor and collect the file set one packaging run would
/// archive, without generating members or writing anything.
///
/// # Errors
///
/// Fails on an invalid descriptor, a failing dependency resolution, or
/// an unreadable tree.
pub fn list_files(
    options: &PackageOptions,
) -> Result<(ExtensionManifest, Vec<CollectedFile>), PackError> {
    let manifest = ExtensionManifest::from_dir(&options.cwd)?;

    let manager = package_manager(effective_manager(options));
    let dependency_paths = manager.production_dependencies(
        &options.cwd,
        options.packaged_dependencies.as_deref(),
        options.cancellation.as_ref(),
    )?;

    let files = collect::collect_files(
        &options.cwd,
        &CollectOptions {
            ignore_file: options.ignore_file.clone(),
            follow_symlinks: options.follow_symlinks,
            dependency_paths,
        },
    )?;
    Ok((manifest, files))
}

/// Default archive name for a manifest.
#[must_use]
pub fn default_out_name(manifest: &ExtensionManifest) -> String {
    format!("{}-{}.vsix", manifest.name, manifest.version)
}

/// Run the whole pipeline and write the archive.
///
/// # Errors
///
/// Fails when any stage fails; the destination is left untouched in
/// that case.
pub fn pack(options: &PackageOptions) -> Result<PackageResult, PackError> {
    let (manifest, files) = list_files(options)?;

    let xml = vsixmanifest::to_vsix_manifest(&manifest, &files)?;
    let types = vsixmanifest::to_content_types(&files);

    let mut members = Vec::with_capacity(files.len() + 3);
    members.push(CollectedFile::in_memory(VSIX_MANIFEST_PATH, xml.into_bytes()));
    members.push(CollectedFile::in_memory(
        CONTENT_TYPES_PATH,
        types.into_bytes(),
    ));
    members.extend(files);
    let check = checksum::create_checksum_file(&members)?;
    members.push(check);

    let out = options
        .out
        .clone()
        .unwrap_or_else(|| options.cwd.join(default_out_name(&manifest)));
    archive::write_vsix(&members, &out)?;

    Ok(PackageResult {
        manifest,
        out,
        members: members.into_iter().map(|m| m.path).collect(),
    })
}

/// Human-readable byte size, in the largest unit that keeps the number
/// small.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}
