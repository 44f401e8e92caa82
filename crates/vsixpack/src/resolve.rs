//! Production dependency resolution.
//!
//! This module turns a package manager's reported dependency tree into the
//! minimal, deduplicated set of absolute directory paths that must be
//! packaged. Nodes live in an arena and reference their children by index,
//! so cyclic or re-entrant manager output cannot cause unbounded recursion;
//! the visit-once guard in the reachability traversal is the sole cycle
//! protection.

use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Errors that can occur during dependency resolution.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Two top-level tree nodes resolved to the same package name.
    #[error("dependency seen more than once: {0}")]
    DuplicateDependency(String),

    /// A name in the packaged-dependencies allow-list (or reached from it)
    /// is absent from the dependency index.
    #[error("could not find dependency: {0}")]
    UnknownDependency(String),
}

/// One node of the raw tree emitted by `yarn list --prod --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct YarnTreeNode {
    /// Package identifier as reported, possibly with an embedded version
    /// spec (`foo@^1.2.3`).
    pub name: String,

    /// Nested dependencies.
    #[serde(default)]
    pub children: Vec<YarnTreeNode>,
}

/// A resolved dependency with its computed install location.
#[derive(Debug, Clone)]
struct DependencyNode {
    name: String,
    path: PathBuf,
    children: Vec<usize>,
}

/// Arena of resolved nodes plus the indices of the top-level entries.
#[derive(Debug, Default)]
struct DependencyArena {
    nodes: Vec<DependencyNode>,
    roots: Vec<usize>,
}

impl DependencyArena {
    /// Build the arena from the raw tree. When `prune` is set, nodes whose
    /// reported name still carries a `^`/`~` range marker are dropped with
    /// their subtrees; they are hoisted duplicates of entries listed
    /// elsewhere in the flattened tree, not real install locations.
    fn build(cwd: &Path, trees: &[YarnTreeNode], prune: bool) -> Self {
        let mut arena = Self::default();
        let prefix = cwd.join("node_modules");
        for tree in trees {
            if let Some(index) = arena.add(&prefix, tree, prune) {
                arena.roots.push(index);
            }
        }
        arena
    }

    fn add(&mut self, prefix: &Path, tree: &YarnTreeNode, prune: bool) -> Option<usize> {
        if prune && range_marker().is_match(&tree.name) {
            return None;
        }

        let name = normalize_package_name(&tree.name);
        let path = prefix.join(&name);
        let child_prefix = path.join("node_modules");

        let mut children = Vec::new();
        for child in &tree.children {
            if let Some(index) = self.add(&child_prefix, child, prune) {
                children.push(index);
            }
        }

        self.nodes.push(DependencyNode {
            name,
            path,
            children,
        });
        Some(self.nodes.len() - 1)
    }

    /// Map top-level package name to arena index, failing on collisions.
    fn index(&self) -> Result<HashMap<&str, usize>, ResolveError> {
        let mut index = HashMap::new();
        for &root in &self.roots {
            let name = self.nodes[root].name.as_str();
            if index.insert(name, root).is_some() {
                return Err(ResolveError::DuplicateDependency(name.to_string()));
            }
        }
        Ok(index)
    }

    /// Depth-first reachability from the allow-list through the index.
    /// Child names resolve through the index too, so a typo anywhere in the
    /// closure is a hard failure rather than a silently smaller package.
    fn reachable(&self, seeds: &[String]) -> Result<Vec<usize>, ResolveError> {
        let index = self.index()?;
        let mut visited: HashSet<usize> = HashSet::new();
        let mut order: Vec<usize> = Vec::new();
        let mut stack: Vec<&str> = seeds.iter().rev().map(String::as_str).collect();

        while let Some(name) = stack.pop() {
            let &node = index
                .get(name)
                .ok_or_else(|| ResolveError::UnknownDependency(name.to_string()))?;
            if !visited.insert(node) {
                continue;
            }
            order.push(node);
            for &child in self.nodes[node].children.iter().rev() {
                stack.push(self.nodes[child].name.as_str());
            }
        }
        Ok(order)
    }

    /// Emit the paths of `roots` and everything below them, visitation
    /// order, deduplicated, guarded against re-entrant subtrees.
    fn flatten(&self, roots: &[usize], out: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>) {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            let node = &self.nodes[node];
            if seen.insert(node.path.clone()) {
                out.push(node.path.clone());
            }
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
    }
}

/// Resolve the yarn dependency tree to the set of absolute directory paths
/// to package. The project root is always the first entry.
///
/// With an allow-list, only the listed packages and their reachable closure
/// are included; without one, every top-level node survives pruning.
///
/// # Errors
///
/// Returns [`ResolveError::DuplicateDependency`] on top-level name
/// collisions and [`ResolveError::UnknownDependency`] when the allow-list
/// closure names a package absent from the index.
pub fn resolve_yarn_dependencies(
    cwd: &Path,
    trees: &[YarnTreeNode],
    packaged_dependencies: Option<&[String]>,
) -> Result<Vec<PathBuf>, ResolveError> {
    let arena = DependencyArena::build(cwd, trees, packaged_dependencies.is_none());

    let included = match packaged_dependencies {
        Some(seeds) => arena.reachable(seeds)?,
        None => arena.roots.clone(),
    };

    let mut paths = vec![cwd.to_path_buf()];
    let mut seen: HashSet<PathBuf> = paths.iter().cloned().collect();
    arena.flatten(&included, &mut paths, &mut seen);
    Ok(paths)
}

/// Matches names that still carry an embedded range spec (`foo@^1.0.0`).
fn range_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@[\^~]").expect("static pattern"))
}

/// Strips everything from the version-spec `@` onwards.
fn name_strip() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(@?[^@]+)@.*$").expect("static pattern"))
}

/// Normalize a reported package identifier down to the bare package name.
///
/// Structured parse first: split at the version-spec `@` (honoring
/// `@scope/` prefixes) and accept the suffix only if it is a valid semver
/// version or range. Anything else falls back to a regex strip.
#[must_use]
pub fn normalize_package_name(raw: &str) -> String {
    if let Some(name) = split_versioned(raw) {
        return name;
    }
    name_strip().replace(raw, "$1").into_owned()
}

fn split_versioned(raw: &str) -> Option<String> {
    // The leading @ of a scoped name is not a version separator.
    let at = if let Some(rest) = raw.strip_prefix('@') {
        rest.find('@').map(|i| i + 1)?
    } else {
        raw.find('@')?
    };

    let (name, spec) = (&raw[..at], &raw[at + 1..]);
    if name.is_empty() || spec.is_empty() {
        return None;
    }
    let parses =
        semver::Version::parse(spec).is_ok() || semver::VersionReq::parse(spec).is_ok();
    parses.then(|| name.to_string())
}
