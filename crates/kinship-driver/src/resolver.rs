//! Build-time resolution of `require()` specifiers
//!
//! The algorithm is the filesystem twin of the loader embedded in bundles:
//! relative specifiers are joined and probed, bare specifiers go through
//! `node_modules` lookup, and well-known host modules fall back to their
//! browser polyfill packages in the core directory.

use std::path::{Path, PathBuf};

use kinship_runtime::path::is_relative;

use crate::error::{KinshipError, Result};
use crate::npm_resolver::{normalize_path, probe_file, probe_index, NpmResolver};
use crate::package_json::has_manifest;

/// Host modules with a browser polyfill, and the polyfill package folder.
pub const CORE_MODULES: &[(&str, &str)] = &[
    ("assert", "assert"),
    ("buffer", "buffer"),
    ("events", "events"),
    ("os", "os-browserify"),
    ("path", "path-browserify"),
    ("punycode", "punycode"),
    ("querystring", "querystring-es3"),
    ("stream", "stream-browserify"),
    ("string_decoder", "string_decoder"),
    ("url", "url"),
    ("util", "util"),
];

/// Forces the core table, skipping the project tree.
pub const CORE_PREFIX: &str = "core:";

/// A package directory reached while resolving.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageTarget {
    /// Canonical package directory.
    pub dir: PathBuf,
    /// Canonical main module path.
    pub main: PathBuf,
    /// The core name it was requested as, when it came from the core table.
    pub core_name: Option<String>,
}

/// Represents a resolved module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Canonical path of the module file.
    pub module: PathBuf,
    /// Packages the resolution went through, outermost first.
    pub packages: Vec<PackageTarget>,
}

/// Module resolver handles require path resolution
#[derive(Debug)]
pub struct ModuleResolver {
    npm_resolver: NpmResolver,
    core_dir: Option<PathBuf>,
}

impl ModuleResolver {
    /// The core directory, when given, must already be canonical.
    pub fn new(core_dir: Option<PathBuf>) -> Self {
        Self {
            npm_resolver: NpmResolver::new(core_dir.clone()),
            core_dir,
        }
    }

    pub fn core_dir(&self) -> Option<&Path> {
        self.core_dir.as_deref()
    }

    pub fn is_core_path(&self, path: &Path) -> bool {
        self.npm_resolver.is_core_path(path)
    }

    /// The polyfill folder name of a core module.
    pub fn core_folder(name: &str) -> Option<&'static str> {
        CORE_MODULES
            .iter()
            .find(|(core, _)| *core == name)
            .map(|(_, folder)| *folder)
    }

    /// Resolve a specifier required by `from_file`.
    pub fn resolve(&self, specifier: &str, from_file: &Path) -> Result<Resolution> {
        let requester = from_file.display().to_string();
        let from_dir = from_file.parent().ok_or_else(|| {
            KinshipError::user(format!(
                "can't find module '{specifier}' required by {requester}: the requiring file has no parent directory"
            ))
        })?;
        self.resolve_for(specifier, from_dir, &requester)
    }

    /// Resolve a specifier as if required from `dir`. `requester` names what
    /// asked for it in error messages.
    pub fn resolve_for(&self, specifier: &str, from_dir: &Path, requester: &str) -> Result<Resolution> {
        let fail = |reason: &str| {
            KinshipError::user(format!(
                "can't find module '{specifier}' required by {requester}: {reason}"
            ))
        };
        if specifier.starts_with('/') || specifier.starts_with('~') {
            return Err(fail("absolute paths can't be bundled"));
        }

        if is_relative(specifier) {
            let target = normalize_path(&from_dir.join(specifier));
            return self
                .probe(&target, &fail)?
                .ok_or_else(|| fail("no such file, no .js/.json variant, no package or index"));
        }

        let Some((name, subpath)) = NpmResolver::parse_package_specifier(specifier) else {
            return Err(fail("not a relative path nor a package name"));
        };

        if let Some(core_name) = name.strip_prefix(CORE_PREFIX) {
            let package_dir = self.core_package_dir(core_name).map_err(|reason| fail(&reason))?;
            return self.resolve_in_package(package_dir, Some(core_name), subpath.as_deref(), &fail);
        }

        if let Some(package_dir) = self.npm_resolver.find_package(&name, from_dir) {
            not_linked(&package_dir, &fail)?;
            return self.resolve_in_package(package_dir, None, subpath.as_deref(), &fail);
        }

        // Project tree first, core table second
        if !self.is_core_path(from_dir) && Self::core_folder(&name).is_some() {
            let package_dir = self.core_package_dir(&name).map_err(|reason| fail(&reason))?;
            return self.resolve_in_package(package_dir, Some(name.as_str()), subpath.as_deref(), &fail);
        }

        Err(fail("no package with a manifest in any node_modules directory"))
    }

    /// Probes a target path: exact file, `.js`, `.json`, package main,
    /// `index.js`, `index.json`.
    fn probe(&self, target: &Path, fail: &dyn Fn(&str) -> KinshipError) -> Result<Option<Resolution>> {
        if let Some(file) = probe_file(target) {
            return Ok(Some(Resolution {
                module: not_linked(&file, fail)?,
                packages: Vec::new(),
            }));
        }

        if target.is_dir() && has_manifest(target) {
            not_linked(target, fail)?;
            let package = self.package_target(target, None)?;
            return Ok(Some(Resolution {
                module: package.main.clone(),
                packages: vec![package],
            }));
        }

        match probe_index(target) {
            Some(index) => Ok(Some(Resolution {
                module: not_linked(&index, fail)?,
                packages: Vec::new(),
            })),
            None => Ok(None),
        }
    }

    fn resolve_in_package(
        &self,
        package_dir: PathBuf,
        core_name: Option<&str>,
        subpath: Option<&str>,
        fail: &dyn Fn(&str) -> KinshipError,
    ) -> Result<Resolution> {
        let package = self.package_target(&package_dir, core_name)?;

        let Some(subpath) = subpath else {
            return Ok(Resolution {
                module: package.main.clone(),
                packages: vec![package],
            });
        };

        let target = normalize_path(&package_dir.join(subpath));
        let mut inner = self
            .probe(&target, fail)?
            .ok_or_else(|| fail(&format!("no '{subpath}' in package {}", package_dir.display())))?;
        inner.packages.insert(0, package);
        Ok(inner)
    }

    pub fn package_target(&self, dir: &Path, core_name: Option<&str>) -> Result<PackageTarget> {
        let main = self.npm_resolver.resolve_package_main(dir)?;
        Ok(PackageTarget {
            dir: canonicalize(dir)?,
            main: canonicalize(&main)?,
            core_name: core_name.map(str::to_string),
        })
    }

    fn core_package_dir(&self, name: &str) -> std::result::Result<PathBuf, String> {
        let folder = Self::core_folder(name)
            .ok_or_else(|| format!("'{name}' is not a known core module"))?;
        let core_dir = self.core_dir.as_deref().ok_or_else(|| {
            format!("core module '{name}' needs a core directory (--core-dir or KINSHIP_CORE_DIR)")
        })?;

        let package_dir = core_dir.join("node_modules").join(folder);
        if !has_manifest(&package_dir) {
            return Err(format!(
                "core polyfill '{folder}' not found in {}",
                core_dir.join("node_modules").display()
            ));
        }
        Ok(package_dir)
    }
}

/// Resolves symlinks so that one file always gets one identity.
pub fn canonicalize(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| KinshipError::io(path, e))
}

/// The canonical form of a path reached from a canonical directory, which
/// must be the path itself. Ids are derived from real paths, so the bundled
/// loader could never follow a link to its target.
fn not_linked(reached: &Path, fail: &dyn Fn(&str) -> KinshipError) -> Result<PathBuf> {
    let real = canonicalize(reached)?;
    if real != reached {
        return Err(fail(&format!(
            "{} is a symbolic link to {}, and linked files or packages can't be bundled \
             (install a copy instead)",
            reached.display(),
            real.display()
        )));
    }
    Ok(real)
}
