//! Extension packaging for VS Code compatible editors.
//!
//! This crate provides:
//! - Parsing and validation of extension `package.json` descriptors
//! - Package manager adapters (none, npm, yarn 1.x) with dependency
//!   resolution
//! - Ignore-rule driven file collection from the extension tree
//! - Generation of the archive XML manifest and content-types document
//! - Deterministic zip assembly with a trailing integrity manifest

mod archive;
mod checksum;
mod collect;
mod exec;
mod manager;
mod manifest;
mod pack;
mod resolve;
mod vsixmanifest;

pub use archive::{
    read_vsix, verify_vsix, write_vsix, ArchiveContents, ArchiveError, ArchiveIdentity,
    ArchiveMember,
};
pub use checksum::{
    compare, create_checksum_file, digest_member, digest_reader, parse_checksum_file,
    ChecksumError, ChecksumReport, CHECKSUM_PATH,
};
pub use collect::{
    collect_files, CollectError, CollectOptions, CollectedFile, FileContents, ARCHIVE_ROOT,
    DEFAULT_IGNORE, IGNORE_FILE,
};
pub use exec::{exec, CancellationToken, ExecError, ExecOptions, ExecOutput, MAX_OUTPUT_BYTES};
pub use manager::{
    detect_package_manager, package_manager, ManagerError, NoManager, Npm, PackageManager,
    PackageManagerKind, Yarn, NPM_VERSION_DENYLIST, YARN_MARKER_FILES,
};
pub use manifest::{ExtensionManifest, ManifestError, Repository, ENGINE_KEY, MANIFEST_FILE};
pub use pack::{
    default_out_name, format_size, list_files, pack, PackError, PackageOptions, PackageResult,
};
pub use resolve::{normalize_package_name, resolve_yarn_dependencies, ResolveError, YarnTreeNode};
pub use vsixmanifest::{
    detect_assets, to_content_types, to_vsix_manifest, Asset, VsixManifestError,
    CONTENT_TYPES_PATH, PACKAGE_JSON_PATH, VSIX_MANIFEST_PATH,
};
