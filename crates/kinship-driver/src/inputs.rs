//! Input expansion and classification
//!
//! Turns the user's input list (paths and glob patterns) into canonical
//! module and package seeds, and works out the root every id is relative to.

use std::path::{Component, Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use walkdir::WalkDir;

use crate::error::{KinshipError, Result};
use crate::package_json::has_manifest;
use crate::resolver::canonicalize;

/// A starting point of the module graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    /// A module file.
    Module(PathBuf),
    /// A package directory; its main module is seeded along with it.
    Package(PathBuf),
}

impl Seed {
    pub fn path(&self) -> &Path {
        match self {
            Seed::Module(path) | Seed::Package(path) => path,
        }
    }

    /// Directory used to guess the root.
    fn dir(&self) -> &Path {
        match self {
            Seed::Module(path) => path.parent().unwrap_or(path),
            Seed::Package(path) => path,
        }
    }
}

fn is_glob(input: &str) -> bool {
    input.contains(['*', '?', '['])
}

/// Expands glob patterns, keeping plain paths as they are. Each pattern's
/// matches are sorted, so the expansion is deterministic.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if is_glob(input) {
            let matches = expand_glob(input)?;
            if matches.is_empty() {
                return Err(KinshipError::user(format!("no file matches '{input}'")));
            }
            paths.extend(matches);
        } else {
            paths.push(PathBuf::from(input));
        }
    }
    Ok(paths)
}

/// Walks the non-glob prefix of a pattern and keeps what the rest matches.
fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let (base, rest) = split_glob(pattern);
    if !base.is_dir() {
        return Ok(Vec::new());
    }

    let invalid = |e: ignore::Error| KinshipError::user(format!("invalid glob '{pattern}': {e}"));
    let mut builder = OverrideBuilder::new(&base);
    builder.add(&format!("/{rest}")).map_err(invalid)?;
    let matcher = builder.build().map_err(invalid)?;

    let mut matches: Vec<PathBuf> = WalkDir::new(&base)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            matcher
                .matched(entry.path(), entry.file_type().is_dir())
                .is_whitelist()
        })
        .map(|entry| entry.into_path())
        .collect();
    matches.sort();
    Ok(matches)
}

/// Splits a pattern into the directory before its first glob component and
/// the remaining pattern.
fn split_glob(pattern: &str) -> (PathBuf, String) {
    let segments: Vec<&str> = pattern.split('/').collect();
    let first_glob = segments.iter().position(|s| is_glob(s)).unwrap_or(segments.len());

    let base = segments[..first_glob].join("/");
    let base = if base.is_empty() {
        if pattern.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        }
    } else {
        PathBuf::from(base)
    };
    (base, segments[first_glob..].join("/"))
}

/// A file is a module seed, a directory with a manifest a package seed.
/// Every seed is canonicalized.
pub fn classify(paths: &[PathBuf]) -> Result<Vec<Seed>> {
    let mut seeds = Vec::with_capacity(paths.len());
    for path in paths {
        let seed = if path.is_file() {
            Seed::Module(canonicalize(path)?)
        } else if path.is_dir() {
            if !has_manifest(path) {
                return Err(KinshipError::user(format!(
                    "input directory {} has no package.json",
                    path.display()
                )));
            }
            Seed::Package(canonicalize(path)?)
        } else {
            return Err(KinshipError::user(format!("can't find input file: {}", path.display())));
        };
        seeds.push(seed);
    }
    Ok(seeds)
}

/// The explicit root if any, else the single seed directory, else their
/// longest common ancestor.
pub fn compute_root(seeds: &[Seed], explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return canonicalize(root);
    }

    let mut dirs: Vec<&Path> = seeds.iter().map(Seed::dir).collect();
    dirs.dedup();
    let Some((first, rest)) = dirs.split_first() else {
        return Err(KinshipError::user("no input to pack"));
    };
    if rest.iter().all(|dir| dir == first) {
        return Ok(first.to_path_buf());
    }

    let mut common: Vec<Component> = first.components().collect();
    for dir in rest {
        let shared = common
            .iter()
            .zip(dir.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        common.truncate(shared);
    }

    // Only a filesystem root or drive prefix left: nothing meaningful is shared
    if !common.iter().any(|component| matches!(component, Component::Normal(_))) {
        return Err(KinshipError::user(
            "can't find a common root path for the inputs (use --root to set one)",
        ));
    }
    Ok(common.iter().collect())
}
