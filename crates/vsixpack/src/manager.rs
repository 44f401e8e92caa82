//! Package manager adapters: `none`, `npm`, and `yarn`.
//!
//! Every adapter exposes the same capability set: self-version, self-check,
//! script command construction, latest-version lookup, and production
//! dependency path resolution. Selection is explicit, or yarn is
//! auto-detected by marker files in the project root.

use crate::exec::{exec, CancellationToken, ExecError, ExecOptions, ExecOutput};
use crate::resolve::{resolve_yarn_dependencies, ResolveError, YarnTreeNode};
use regex::Regex;
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// npm version requirements known to break dependency listing.
///
/// The list is data, not code: the intent (reject known-broken manager
/// versions) outlives any particular entry.
pub const NPM_VERSION_DENYLIST: &[&str] = &["<6"];

/// Files whose presence in the project root selects yarn during
/// auto-detection.
pub const YARN_MARKER_FILES: &[&str] = &[
    "yarn.lock",
    ".yarnrc",
    ".yarnrc.yml",
    ".pnp.cjs",
    ".pnp.js",
    ".yarn",
];

/// Errors that can occur in a package manager adapter.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("'{0}' is not a supported package manager. Valid managers: none, npm, yarn")]
    UnknownManager(String),

    #[error("{manager}@{version} is not supported. {hint}")]
    UnsupportedVersion {
        manager: &'static str,
        version: String,
        hint: String,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("could not parse output of '{command}': {reason}")]
    UnexpectedOutput { command: String, reason: String },
}

/// The three-valued package manager choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageManagerKind {
    /// Treat the project root as the only dependency path.
    None,
    #[default]
    Npm,
    Yarn,
}

impl PackageManagerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Npm => "npm",
            Self::Yarn => "yarn",
        }
    }
}

impl std::fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PackageManagerKind {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "npm" => Ok(Self::Npm),
            "yarn" => Ok(Self::Yarn),
            other => Err(ManagerError::UnknownManager(other.to_string())),
        }
    }
}

/// Pick yarn when any marker file sits in the project root, npm otherwise.
#[must_use]
pub fn detect_package_manager(root: &Path) -> PackageManagerKind {
    if YARN_MARKER_FILES
        .iter()
        .any(|marker| root.join(marker).exists())
    {
        PackageManagerKind::Yarn
    } else {
        PackageManagerKind::Npm
    }
}

/// Instantiate the adapter for a choice.
#[must_use]
pub fn package_manager(kind: PackageManagerKind) -> Box<dyn PackageManager> {
    match kind {
        PackageManagerKind::None => Box::new(NoManager),
        PackageManagerKind::Npm => Box::new(Npm::default()),
        PackageManagerKind::Yarn => Box::new(Yarn),
    }
}

/// Capability set shared by all package manager adapters.
pub trait PackageManager {
    /// The binary name of the package manager.
    fn binary_name(&self) -> &'static str;

    /// Version of the package manager itself.
    fn self_version(
        &self,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, ManagerError>;

    /// Fail if the detected version is known-incompatible.
    fn self_check(&self, cancellation: Option<&CancellationToken>) -> Result<(), ManagerError>;

    /// Command line used to run a named project script.
    fn script_command(&self, script: &str) -> String;

    /// Run a named project script to completion.
    fn run_script(
        &self,
        cwd: &Path,
        script: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<ExecOutput, ManagerError> {
        let output = exec(
            self.binary_name(),
            &["run", script],
            &exec_options(Some(cwd), cancellation),
        )?;
        Ok(output)
    }

    /// Latest published version of a package.
    fn latest_version(
        &self,
        package: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, ManagerError>;

    /// Absolute directory paths of the production dependency closure,
    /// always including `cwd` itself.
    fn production_dependencies(
        &self,
        cwd: &Path,
        packaged_dependencies: Option<&[String]>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<PathBuf>, ManagerError>;
}

fn exec_options(cwd: Option<&Path>, cancellation: Option<&CancellationToken>) -> ExecOptions {
    ExecOptions {
        cwd: cwd.map(Path::to_path_buf),
        cancellation: cancellation.cloned(),
        ..ExecOptions::default()
    }
}

/// The npm adapter.
pub struct Npm {
    denylist: Vec<VersionReq>,
}

impl Default for Npm {
    fn default() -> Self {
        Self {
            denylist: NPM_VERSION_DENYLIST
                .iter()
                .filter_map(|raw| VersionReq::parse(raw).ok())
                .collect(),
        }
    }
}

impl Npm {
    /// Replace the built-in incompatible-version denylist.
    #[must_use]
    pub fn with_denylist(denylist: Vec<VersionReq>) -> Self {
        Self { denylist }
    }

    fn ensure_supported(&self, version: &str) -> Result<(), ManagerError> {
        let parsed = Version::parse(version).map_err(|e| ManagerError::UnexpectedOutput {
            command: "npm -v".to_string(),
            reason: format!("'{version}' is not a version: {e}"),
        })?;
        if self.denylist.iter().any(|req| req.matches(&parsed)) {
            return Err(ManagerError::UnsupportedVersion {
                manager: "npm",
                version: version.to_string(),
                hint: "Please update npm: npm install -g npm".to_string(),
            });
        }
        Ok(())
    }
}

impl PackageManager for Npm {
    fn binary_name(&self) -> &'static str {
        "npm"
    }

    fn self_version(
        &self,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, ManagerError> {
        let output = exec("npm", &["-v"], &exec_options(None, cancellation))?;
        Ok(output.stdout.trim().to_string())
    }

    fn self_check(&self, cancellation: Option<&CancellationToken>) -> Result<(), ManagerError> {
        let version = self.self_version(cancellation)?;
        self.ensure_supported(&version)
    }

    fn script_command(&self, script: &str) -> String {
        format!("npm run {script}")
    }

    fn latest_version(
        &self,
        package: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, ManagerError> {
        self.self_check(cancellation)?;
        let output = exec(
            "npm",
            &["show", package, "version"],
            &exec_options(None, cancellation),
        )?;
        first_nonempty_line(&output.stdout, 0).map(str::to_string).ok_or_else(|| {
            ManagerError::UnexpectedOutput {
                command: format!("npm show {package} version"),
                reason: "empty output".to_string(),
            }
        })
    }

    fn production_dependencies(
        &self,
        cwd: &Path,
        _packaged_dependencies: Option<&[String]>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<PathBuf>, ManagerError> {
        self.self_check(cancellation)?;
        let output = exec(
            "npm",
            &[
                "list",
                "--production",
                "--parseable",
                "--depth=99999",
                "--loglevel=error",
            ],
            &exec_options(Some(cwd), cancellation),
        )?;
        Ok(parse_parseable_paths(&output.stdout))
    }
}

/// The yarn adapter. Only the 1.x line is supported.
pub struct Yarn;

impl Yarn {
    fn ensure_supported(version: &str) -> Result<(), ManagerError> {
        let parsed = Version::parse(version).map_err(|e| ManagerError::UnexpectedOutput {
            command: "yarn -v".to_string(),
            reason: format!("'{version}' is not a version: {e}"),
        })?;
        if parsed.major != 1 {
            return Err(ManagerError::UnsupportedVersion {
                manager: "yarn",
                version: version.to_string(),
                hint: "Only yarn 1.x is supported. To use a newer yarn, \
                       resolve dependencies with npm instead."
                    .to_string(),
            });
        }
        Ok(())
    }
}

impl PackageManager for Yarn {
    fn binary_name(&self) -> &'static str {
        "yarn"
    }

    fn self_version(
        &self,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, ManagerError> {
        let output = exec("yarn", &["-v"], &exec_options(None, cancellation))?;
        Ok(output.stdout.trim().to_string())
    }

    fn self_check(&self, cancellation: Option<&CancellationToken>) -> Result<(), ManagerError> {
        let version = self.self_version(cancellation)?;
        Self::ensure_supported(&version)
    }

    fn script_command(&self, script: &str) -> String {
        format!("yarn run {script}")
    }

    fn latest_version(
        &self,
        package: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, ManagerError> {
        self.self_check(cancellation)?;
        let output = exec(
            "yarn",
            &["info", package, "version"],
            &exec_options(None, cancellation),
        )?;
        // yarn prints a banner line first; the version is the second
        // non-empty line.
        first_nonempty_line(&output.stdout, 1).map(str::to_string).ok_or_else(|| {
            ManagerError::UnexpectedOutput {
                command: format!("yarn info {package} version"),
                reason: "missing version line".to_string(),
            }
        })
    }

    fn production_dependencies(
        &self,
        cwd: &Path,
        packaged_dependencies: Option<&[String]>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<PathBuf>, ManagerError> {
        self.self_check(cancellation)?;
        let mut options = exec_options(Some(cwd), cancellation);
        options
            .env
            .push(("DISABLE_V8_COMPILE_CACHE".to_string(), "1".to_string()));
        let output = exec("yarn", &["list", "--prod", "--json"], &options)?;
        let trees = parse_yarn_list(&output.stdout)?;
        Ok(resolve_yarn_dependencies(cwd, &trees, packaged_dependencies)?)
    }
}

/// The `none` adapter: the project root is the only dependency path and no
/// process is spawned for resolution. Everything else delegates to npm.
pub struct NoManager;

impl PackageManager for NoManager {
    fn binary_name(&self) -> &'static str {
        ""
    }

    fn self_version(
        &self,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, ManagerError> {
        Npm::default().self_version(cancellation)
    }

    fn self_check(&self, cancellation: Option<&CancellationToken>) -> Result<(), ManagerError> {
        Npm::default().self_check(cancellation)
    }

    fn script_command(&self, script: &str) -> String {
        Npm::default().script_command(script)
    }

    fn run_script(
        &self,
        cwd: &Path,
        script: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<ExecOutput, ManagerError> {
        Npm::default().run_script(cwd, script, cancellation)
    }

    fn latest_version(
        &self,
        package: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, ManagerError> {
        Npm::default().latest_version(package, cancellation)
    }

    fn production_dependencies(
        &self,
        cwd: &Path,
        _packaged_dependencies: Option<&[String]>,
        _cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<PathBuf>, ManagerError> {
        Ok(vec![cwd.to_path_buf()])
    }
}

/// Nth (0-based) non-empty line of process output.
fn first_nonempty_line(raw: &str, skip: usize) -> Option<&str> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .nth(skip)
}

/// Parse `npm list --parseable` output: one absolute path per line,
/// everything else dropped, order-preserving dedup.
fn parse_parseable_paths(raw: &str) -> Vec<PathBuf> {
    let mut seen: HashSet<&str> = HashSet::new();
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && Path::new(line).is_absolute())
        .filter(|line| seen.insert(line))
        .map(PathBuf::from)
        .collect()
}

#[derive(Debug, Deserialize)]
struct YarnListOutput {
    data: YarnListData,
}

#[derive(Debug, Deserialize)]
struct YarnListData {
    #[serde(default)]
    trees: Vec<YarnTreeNode>,
}

fn tree_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^\{"type":"tree".*$"#).expect("static pattern"))
}

/// Extract and parse the tree document from `yarn list --prod --json`
/// output, which interleaves progress records on other lines.
fn parse_yarn_list(raw: &str) -> Result<Vec<YarnTreeNode>, ManagerError> {
    let line = tree_line()
        .find(raw)
        .ok_or_else(|| ManagerError::UnexpectedOutput {
            command: "yarn list --prod --json".to_string(),
            reason: "no tree record in output".to_string(),
        })?;
    let parsed: YarnListOutput =
        serde_json::from_str(line.as_str()).map_err(|e| ManagerError::UnexpectedOutput {
            command: "yarn list --prod --json".to_string(),
            reason: e.to_string(),
        })?;
    Ok(parsed.data.trees)
}
