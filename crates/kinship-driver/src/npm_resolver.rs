//! Package lookup in `node_modules` directories
//!
//! Implements the bare-specifier half of resolution: walk up from the
//! requesting directory looking for `node_modules/<name>` folders that hold a
//! manifest, then find the package entry point or a file inside it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use kinship_runtime::path::{collapse_dots, package_name};

use crate::error::{KinshipError, Result};
use crate::package_json::{has_manifest, manifest_path, parse_package_json};

#[derive(Debug)]
pub struct NpmResolver {
    /// Upper bound of the ancestor walk for requesters inside the core directory.
    core_dir: Option<PathBuf>,
}

impl NpmResolver {
    pub fn new(core_dir: Option<PathBuf>) -> Self {
        Self { core_dir }
    }

    /// Whether a path lives inside the core polyfill directory.
    pub fn is_core_path(&self, path: &Path) -> bool {
        self.core_dir
            .as_deref()
            .is_some_and(|core_dir| path.starts_with(core_dir))
    }

    /// Find the package directory for `name`, starting at `from_dir`.
    ///
    /// Folders without a manifest are skipped. The walk stops after the
    /// core directory for core requesters, at the filesystem root otherwise.
    pub fn find_package(&self, name: &str, from_dir: &Path) -> Option<PathBuf> {
        let base = self
            .core_dir
            .as_deref()
            .filter(|core_dir| from_dir.starts_with(core_dir));
        let mut current = from_dir;

        loop {
            let package_dir = current.join("node_modules").join(name);
            if package_dir.is_dir() && has_manifest(&package_dir) {
                return Some(package_dir);
            }

            if Some(current) == base {
                return None;
            }
            current = current.parent()?;
        }
    }

    /// Parse a package specifier into package name and subpath
    ///
    /// Examples:
    /// - "lodash" → ("lodash", None)
    /// - "lodash/fp" → ("lodash", Some("fp"))
    /// - "@types/node" → ("@types/node", None)
    /// - "@types/node/fs" → ("@types/node", Some("fs"))
    pub fn parse_package_specifier(specifier: &str) -> Option<(String, Option<String>)> {
        let collapsed = collapse_dots(specifier);
        let name = package_name(&collapsed)?;
        let subpath = collapsed[name.len()..].trim_matches('/');
        let subpath = (!subpath.is_empty()).then(|| subpath.to_string());
        Some((name.to_string(), subpath))
    }

    /// Resolve the entry module of a package directory: the manifest `main`
    /// probed as a file or directory, else `index.js`, else `index.json`.
    pub fn resolve_package_main(&self, package_dir: &Path) -> Result<PathBuf> {
        let manifest = parse_package_json(&manifest_path(package_dir))?;

        if let Some(main) = &manifest.main {
            let main_path = normalize_path(&package_dir.join(main));
            if let Some(found) = probe_file(&main_path).or_else(|| probe_index(&main_path)) {
                return Ok(found);
            }
        }

        probe_index(package_dir).ok_or_else(|| {
            KinshipError::user(format!(
                "package {} has no main module (no usable \"main\", no index.js or index.json)",
                package_dir.display()
            ))
        })
    }
}

/// The exact file, then with `.js` appended, then with `.json` appended.
pub fn probe_file(target: &Path) -> Option<PathBuf> {
    if target.is_file() {
        return Some(target.to_path_buf());
    }
    [".js", ".json"]
        .iter()
        .map(|extension| {
            let mut with_extension = OsString::from(target.as_os_str());
            with_extension.push(extension);
            PathBuf::from(with_extension)
        })
        .find(|candidate| candidate.is_file())
}

/// `index.js`, then `index.json`, inside a directory.
pub fn probe_index(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    ["index.js", "index.json"]
        .iter()
        .map(|index| dir.join(index))
        .find(|candidate| candidate.is_file())
}

/// Lexically removes `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else if !matches!(components.last(), Some(Component::RootDir | Component::Prefix(_))) {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }
    components.iter().collect()
}
