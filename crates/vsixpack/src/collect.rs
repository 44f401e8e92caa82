//! File collection: walking the project tree, applying layered ignore
//! rules, and restricting dependency-owned paths to the resolved set.
//!
//! Output order is deterministic: directories are walked with their entries
//! sorted by name, and duplicate archive paths collapse to the first
//! occurrence.

use glob::{MatchOptions, Pattern};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Archive-internal prefix for all project files.
pub const ARCHIVE_ROOT: &str = "extension";

/// Default ignore-rule filename in the project root.
pub const IGNORE_FILE: &str = ".vsixignore";

/// Built-in deny list, always applied.
pub const DEFAULT_IGNORE: &[&str] = &[
    ".vsixignore",
    ".git/**",
    "**/.git/**",
    ".svn/**",
    "**/.svn/**",
    ".hg/**",
    "**/.hg/**",
    "*.vsix",
    "**/*.vsix",
    ".DS_Store",
    "**/.DS_Store",
];

/// Errors that can occur while collecting files.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ignore file not found: {0}")]
    IgnoreFileNotFound(String),

    #[error("invalid ignore pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Content source of an archive member: a file on disk, read lazily at
/// archive time, or generated bytes held in memory.
#[derive(Debug, Clone)]
pub enum FileContents {
    OnDisk(PathBuf),
    InMemory(Vec<u8>),
}

/// One archive member: a forward-slash archive path plus its content
/// source. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct CollectedFile {
    pub path: String,
    pub contents: FileContents,
}

impl CollectedFile {
    /// A member backed by a file on the local filesystem.
    #[must_use]
    pub fn on_disk(path: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            contents: FileContents::OnDisk(local.into()),
        }
    }

    /// A generated member held in memory.
    #[must_use]
    pub fn in_memory(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: FileContents::InMemory(bytes.into()),
        }
    }
}

/// Options for a collection run.
#[derive(Debug, Default)]
pub struct CollectOptions {
    /// Alternate ignore-rule file; the default is `.vsixignore` in the
    /// project root (tolerated missing, unlike an explicit override).
    pub ignore_file: Option<PathBuf>,

    /// Traverse symlinked directories instead of emitting the link as an
    /// opaque file.
    pub follow_symlinks: bool,

    /// Resolved production dependency paths; the project root must be
    /// among them for project files to be admitted.
    pub dependency_paths: Vec<PathBuf>,
}

/// Compiled ignore rules: positive patterns exclude, negated patterns
/// re-include.
struct IgnoreRules {
    exclude: Vec<Pattern>,
    include: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl IgnoreRules {
    fn load(cwd: &Path, options: &CollectOptions) -> Result<Self, CollectError> {
        let raw = match &options.ignore_file {
            Some(path) => {
                if !path.exists() {
                    return Err(CollectError::IgnoreFileNotFound(path.display().to_string()));
                }
                std::fs::read_to_string(path).map_err(|source| CollectError::Io {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => {
                let path = cwd.join(IGNORE_FILE);
                match std::fs::read_to_string(&path) {
                    Ok(raw) => raw,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(source) => {
                        return Err(CollectError::Io {
                            path: path.display().to_string(),
                            source,
                        })
                    }
                }
            }
        };

        let mut exclude = Vec::new();
        let mut include = Vec::new();

        let lines = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));
        let all = DEFAULT_IGNORE.iter().copied().chain(lines);

        for line in all {
            let (negated, pattern) = match line.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            let bucket = if negated { &mut include } else { &mut exclude };
            bucket.push(compile(pattern)?);
            // A pattern naming a directory also covers everything below it.
            if !pattern.ends_with("/**") {
                bucket.push(compile(&format!("{pattern}/**"))?);
            }
        }

        Ok(Self { exclude, include })
    }

    /// Whether a relative forward-slash path is ignored.
    fn is_ignored(&self, rel: &str) -> bool {
        let excluded = self
            .exclude
            .iter()
            .any(|p| p.matches_with(rel, MATCH_OPTIONS));
        excluded
            && !self
                .include
                .iter()
                .any(|p| p.matches_with(rel, MATCH_OPTIONS))
    }
}

fn compile(pattern: &str) -> Result<Pattern, CollectError> {
    Pattern::new(pattern).map_err(|source| CollectError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Whether `abs` is admitted by the dependency path set: some dependency
/// directory must be an ancestor, with no further `node_modules` segment
/// between the two. This is what keeps unresolved (development-only)
/// packages out of the archive.
fn dependency_reachable(abs: &Path, dependency_paths: &[PathBuf]) -> bool {
    dependency_paths.iter().any(|dep| {
        abs.strip_prefix(dep).is_ok_and(|rest| {
            !rest
                .components()
                .any(|c| matches!(c, Component::Normal(n) if n == "node_modules"))
        })
    })
}

/// Collect the ordered, deduplicated archive members for a project.
///
/// # Errors
///
/// Returns an error on unreadable directories, a missing explicit ignore
/// file, or an invalid ignore pattern.
pub fn collect_files(
    cwd: &Path,
    options: &CollectOptions,
) -> Result<Vec<CollectedFile>, CollectError> {
    let rules = IgnoreRules::load(cwd, options)?;

    let mut entries = Vec::new();
    walk(cwd, options.follow_symlinks, &mut entries)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut collected = Vec::new();

    for abs in entries {
        let Ok(rel) = abs.strip_prefix(cwd) else {
            continue;
        };
        let rel = forward_slashes(rel);

        if rules.is_ignored(&rel) {
            continue;
        }
        if !dependency_reachable(&abs, &options.dependency_paths) {
            continue;
        }

        let archive_path = format!("{ARCHIVE_ROOT}/{rel}");
        if seen.insert(archive_path.clone()) {
            collected.push(CollectedFile::on_disk(archive_path, abs));
        }
    }

    Ok(collected)
}

/// Depth-first walk with sorted directory entries. Symlinks are emitted as
/// opaque files unless `follow` is set and the target is a directory.
fn walk(dir: &Path, follow: bool, out: &mut Vec<PathBuf>) -> Result<(), CollectError> {
    let read = std::fs::read_dir(dir).map_err(|source| CollectError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut children: Vec<PathBuf> = Vec::new();
    for entry in read {
        let entry = entry.map_err(|source| CollectError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        children.push(entry.path());
    }
    children.sort();

    for child in children {
        let meta = std::fs::symlink_metadata(&child).map_err(|source| CollectError::Io {
            path: child.display().to_string(),
            source,
        })?;

        if meta.is_dir() {
            walk(&child, follow, out)?;
        } else if meta.file_type().is_symlink() {
            if follow && child.metadata().map(|m| m.is_dir()).unwrap_or(false) {
                walk(&child, follow, out)?;
            } else {
                out.push(child);
            }
        } else {
            out.push(child);
        }
    }
    Ok(())
}

fn forward_slashes(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(n) => Some(n.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn paths(files: &[CollectedFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    fn options_for(root: &Path) -> CollectOptions {
        CollectOptions {
            dependency_paths: vec![root.to_path_buf()],
            ..CollectOptions::default()
        }
    }

    #[test]
    fn collects_with_archive_prefix_and_forward_slashes() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "package.json", "{}");
        write(tmp.path(), "src/main.js", "x");

        let files = collect_files(tmp.path(), &options_for(tmp.path())).unwrap();
        assert_eq!(
            paths(&files),
            vec!["extension/package.json", "extension/src/main.js"]
        );
    }

    #[test]
    fn order_is_sorted_and_deterministic() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.txt", "");
        write(tmp.path(), "a.txt", "");
        write(tmp.path(), "c/d.txt", "");

        let first = collect_files(tmp.path(), &options_for(tmp.path())).unwrap();
        let second = collect_files(tmp.path(), &options_for(tmp.path())).unwrap();
        assert_eq!(paths(&first), paths(&second));
        assert_eq!(
            paths(&first),
            vec!["extension/a.txt", "extension/b.txt", "extension/c/d.txt"]
        );
    }

    #[test]
    fn default_deny_list_applies() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "ok.txt", "");
        write(tmp.path(), ".git/config", "");
        write(tmp.path(), "sub/.git/HEAD", "");
        write(tmp.path(), "out.vsix", "");
        write(tmp.path(), ".DS_Store", "");
        write(tmp.path(), ".vsixignore", "");

        let files = collect_files(tmp.path(), &options_for(tmp.path())).unwrap();
        assert_eq!(paths(&files), vec!["extension/ok.txt"]);
    }

    #[test]
    fn ignore_file_excludes_and_negates() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "keep.js", "");
        write(tmp.path(), "drop.log", "");
        write(tmp.path(), "docs/notes.md", "");
        write(tmp.path(), "docs/api.md", "");
        write(
            tmp.path(),
            ".vsixignore",
            "# build noise\n*.log\ndocs/**\n!docs/api.md\n",
        );

        let files = collect_files(tmp.path(), &options_for(tmp.path())).unwrap();
        assert_eq!(
            paths(&files),
            vec!["extension/docs/api.md", "extension/keep.js"]
        );
    }

    #[test]
    fn directory_pattern_covers_contents() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "keep.js", "");
        write(tmp.path(), "build/out/bundle.js", "");
        write(tmp.path(), ".vsixignore", "build\n");

        let files = collect_files(tmp.path(), &options_for(tmp.path())).unwrap();
        assert_eq!(paths(&files), vec!["extension/keep.js"]);
    }

    #[test]
    fn explicit_ignore_override_must_exist() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.txt", "");
        let options = CollectOptions {
            ignore_file: Some(tmp.path().join("no-such-file")),
            dependency_paths: vec![tmp.path().to_path_buf()],
            follow_symlinks: false,
        };
        let err = collect_files(tmp.path(), &options).unwrap_err();
        assert!(matches!(err, CollectError::IgnoreFileNotFound(_)));
    }

    #[test]
    fn ignore_override_replaces_default_location() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.txt", "");
        write(tmp.path(), "b.txt", "");
        write(tmp.path(), ".vsixignore", "a.txt\n");
        write(tmp.path(), "custom.ignore", "b.txt\n");

        let options = CollectOptions {
            ignore_file: Some(tmp.path().join("custom.ignore")),
            dependency_paths: vec![tmp.path().to_path_buf()],
            follow_symlinks: false,
        };
        let files = collect_files(tmp.path(), &options).unwrap();
        // The default .vsixignore is not consulted, but stays excluded by
        // the built-in deny list; custom.ignore itself is collected.
        assert_eq!(
            paths(&files),
            vec!["extension/a.txt", "extension/custom.ignore"]
        );
    }

    #[test]
    fn node_modules_restricted_to_resolved_dependencies() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "index.js", "");
        write(tmp.path(), "node_modules/kept/lib.js", "");
        write(tmp.path(), "node_modules/devonly/lib.js", "");
        write(tmp.path(), "node_modules/kept/node_modules/inner/x.js", "");

        let options = CollectOptions {
            dependency_paths: vec![
                tmp.path().to_path_buf(),
                tmp.path().join("node_modules/kept"),
            ],
            ..CollectOptions::default()
        };
        let files = collect_files(tmp.path(), &options).unwrap();
        assert_eq!(
            paths(&files),
            vec!["extension/index.js", "extension/node_modules/kept/lib.js"]
        );
    }

    #[test]
    fn nested_dependency_needs_its_own_resolved_path() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "node_modules/a/node_modules/b/x.js", "");

        let options = CollectOptions {
            dependency_paths: vec![
                tmp.path().to_path_buf(),
                tmp.path().join("node_modules/a"),
                tmp.path().join("node_modules/a/node_modules/b"),
            ],
            ..CollectOptions::default()
        };
        let files = collect_files(tmp.path(), &options).unwrap();
        assert_eq!(
            paths(&files),
            vec!["extension/node_modules/a/node_modules/b/x.js"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_opaque_by_default() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "real/file.txt", "");
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

        let files = collect_files(tmp.path(), &options_for(tmp.path())).unwrap();
        assert_eq!(
            paths(&files),
            vec!["extension/link", "extension/real/file.txt"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn follow_symlinks_traverses_directories() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "real/file.txt", "");
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

        let options = CollectOptions {
            follow_symlinks: true,
            dependency_paths: vec![tmp.path().to_path_buf()],
            ignore_file: None,
        };
        let files = collect_files(tmp.path(), &options).unwrap();
        assert_eq!(
            paths(&files),
            vec!["extension/link/file.txt", "extension/real/file.txt"]
        );
    }

    #[test]
    fn hidden_files_are_collected() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".eslintrc", "{}");
        let files = collect_files(tmp.path(), &options_for(tmp.path())).unwrap();
        assert_eq!(paths(&files), vec!["extension/.eslintrc"]);
    }
}
