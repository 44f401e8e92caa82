//! Zip assembly and inspection of package archives.
//!
//! Writing streams every member straight from its source into the zip
//! encoder and goes through a temporary file in the destination
//! directory, so a failed run never leaves a truncated archive behind.

use crate::checksum::{self, ChecksumError, ChecksumReport, CHECKSUM_PATH};
use crate::collect::{CollectedFile, FileContents};
use crate::manifest::{ExtensionManifest, ManifestError};
use crate::vsixmanifest::{PACKAGE_JSON_PATH, VSIX_MANIFEST_PATH};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Member sizes past this need the zip64 extensions.
const LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

/// Errors raised while writing or reading a package archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive I/O failed on '{path}'")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("zip format error")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("archive has no '{0}' member")]
    MissingMember(&'static str),

    #[error("cannot parse '{VSIX_MANIFEST_PATH}': {0}")]
    ManifestXml(String),
}

/// One member of an existing archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub path: String,
    pub size: u64,
    pub compressed_size: u64,
}

/// Identity attributes recorded in the archive's XML manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveIdentity {
    pub id: String,
    pub version: String,
    pub publisher: String,
}

/// Parsed view of an existing archive.
#[derive(Debug)]
pub struct ArchiveContents {
    pub identity: ArchiveIdentity,
    pub manifest: ExtensionManifest,
    pub members: Vec<ArchiveMember>,
}

fn io_err(path: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `files` to a zip archive at `out_path`, in list order.
///
/// The destination is replaced atomically once the archive is complete.
///
/// # Errors
///
/// Fails when a member cannot be read or the destination cannot be
/// written.
pub fn write_vsix(files: &[CollectedFile], out_path: &Path) -> Result<(), ArchiveError> {
    let dir = match out_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staging = tempfile::Builder::new()
        .prefix(".vsixpack-")
        .tempfile_in(dir)
        .map_err(|source| io_err(out_path, source))?;

    let mut zip = ZipWriter::new(staging);
    for file in files {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .large_file(member_size(file)? >= LARGE_FILE_THRESHOLD);
        zip.start_file(file.path.as_str(), options)?;
        match &file.contents {
            FileContents::OnDisk(path) => {
                let mut reader = File::open(path).map_err(|source| io_err(path, source))?;
                io::copy(&mut reader, &mut zip).map_err(|source| io_err(path, source))?;
            }
            FileContents::InMemory(bytes) => {
                zip.write_all(bytes)
                    .map_err(|source| io_err(out_path, source))?;
            }
        }
    }
    let staging = zip.finish()?;

    staging
        .persist(out_path)
        .map_err(|err| io_err(out_path, err.error))?;
    Ok(())
}

fn member_size(file: &CollectedFile) -> Result<u64, ArchiveError> {
    match &file.contents {
        FileContents::OnDisk(path) => {
            let meta = std::fs::metadata(path).map_err(|source| io_err(path, source))?;
            Ok(meta.len())
        }
        FileContents::InMemory(bytes) => Ok(bytes.len() as u64),
    }
}

fn read_member(zip: &mut ZipArchive<File>, name: &'static str) -> Result<Vec<u8>, ArchiveError> {
    let mut entry = zip
        .by_name(name)
        .map_err(|_| ArchiveError::MissingMember(name))?;
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|source| io_err(Path::new(name), source))?;
    Ok(buf)
}

/// Open an archive and parse its descriptor, XML manifest and member
/// list.
///
/// # Errors
///
/// Fails when the archive cannot be opened or either manifest is
/// missing or malformed.
pub fn read_vsix(path: &Path) -> Result<ArchiveContents, ArchiveError> {
    let file = File::open(path).map_err(|source| io_err(path, source))?;
    let mut zip = ZipArchive::new(file)?;

    let mut members = Vec::with_capacity(zip.len());
    for idx in 0..zip.len() {
        let entry = zip.by_index(idx)?;
        members.push(ArchiveMember {
            path: entry.name().to_string(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
        });
    }

    let descriptor = read_member(&mut zip, PACKAGE_JSON_PATH)?;
    let descriptor = String::from_utf8(descriptor)
        .map_err(|_| ArchiveError::ManifestXml("descriptor is not UTF-8".to_string()))?;
    let manifest = ExtensionManifest::parse(&descriptor)?;

    let xml = read_member(&mut zip, VSIX_MANIFEST_PATH)?;
    let xml = String::from_utf8(xml)
        .map_err(|_| ArchiveError::ManifestXml("manifest is not UTF-8".to_string()))?;
    let identity = parse_identity(&xml)?;

    Ok(ArchiveContents {
        identity,
        manifest,
        members,
    })
}

/// Pull the `Identity` attributes out of the XML manifest.
fn parse_identity(xml: &str) -> Result<ArchiveIdentity, ArchiveError> {
    let package = sxd_document::parser::parse(xml)
        .map_err(|err| ArchiveError::ManifestXml(err.to_string()))?;
    let document = package.as_document();

    let root = document
        .root()
        .children()
        .into_iter()
        .find_map(|child| child.element())
        .ok_or_else(|| ArchiveError::ManifestXml("no root element".to_string()))?;
    if root.name().local_part() != "PackageManifest" {
        return Err(ArchiveError::ManifestXml(format!(
            "unexpected root element '{}'",
            root.name().local_part()
        )));
    }

    let identity = root
        .children()
        .into_iter()
        .filter_map(|child| child.element())
        .find(|e| e.name().local_part() == "Metadata")
        .and_then(|metadata| {
            metadata
                .children()
                .into_iter()
                .filter_map(|child| child.element())
                .find(|e| e.name().local_part() == "Identity")
        })
        .ok_or_else(|| ArchiveError::ManifestXml("no Metadata/Identity element".to_string()))?;

    let attr = |name: &str| {
        identity
            .attribute_value(name)
            .map(str::to_string)
            .ok_or_else(|| ArchiveError::ManifestXml(format!("Identity lacks '{name}'")))
    };

    Ok(ArchiveIdentity {
        id: attr("Id")?,
        version: attr("Version")?,
        publisher: attr("Publisher")?,
    })
}

/// Recompute every member digest and compare against the archive's
/// integrity manifest.
///
/// # Errors
///
/// Fails when the archive cannot be read or carries no integrity
/// manifest. Digest differences are reported, not errors.
pub fn verify_vsix(path: &Path) -> Result<ChecksumReport, ArchiveError> {
    let file = File::open(path).map_err(|source| io_err(path, source))?;
    let mut zip = ZipArchive::new(file)?;

    let raw = read_member(&mut zip, CHECKSUM_PATH)?;
    let raw = String::from_utf8(raw)
        .map_err(|_| ArchiveError::ManifestXml("checksum member is not UTF-8".to_string()))?;
    let recorded = checksum::parse_checksum_file(&raw)?;

    let mut actual = BTreeMap::new();
    for idx in 0..zip.len() {
        let entry = zip.by_index(idx)?;
        let name = entry.name().to_string();
        if name == CHECKSUM_PATH || name.ends_with('/') {
            continue;
        }
        let digest = checksum::digest_reader(entry)
            .map_err(|source| io_err(Path::new(&name), source))?;
        actual.insert(name, digest);
    }

    Ok(checksum::compare(&recorded, &actual))
}
