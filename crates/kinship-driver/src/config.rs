//! Pack configuration

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{KinshipError, Result};

/// Environment variable naming the core polyfill directory.
pub const CORE_DIR_ENV: &str = "KINSHIP_CORE_DIR";

/// How a bundle behaves once loaded, as recorded in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    /// Only prepares modules; nothing runs unless `require` is exposed.
    Silent,
    /// Requires the entry module once everything is prepared.
    Execute,
    /// Requires the entry module and binds its exports to a global.
    ExposeMain,
    /// An ES module whose default export is the entry module's exports.
    Esm,
}

impl BundleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleType::Silent => "silent",
            BundleType::Execute => "execute",
            BundleType::ExposeMain => "expose-main",
            BundleType::Esm => "esm",
        }
    }
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything `pack` and `analyse` need to know.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Files, package directories or glob patterns.
    pub inputs: Vec<String>,
    pub output: Option<PathBuf>,
    /// Follow static `require()` calls to find more modules.
    pub discovery: bool,
    pub execute: bool,
    /// Global name the entry module's exports are bound to.
    pub expose_main: Option<String>,
    /// Bind the bundle's `require` to `globalThis.require`.
    pub expose_require: bool,
    pub esm: bool,
    /// Overrides the computed root.
    pub root: Option<PathBuf>,
    /// Manifest whose name and version go in the header instead of the
    /// entry package's.
    pub manifest: Option<PathBuf>,
    /// Directory whose `node_modules` holds the core polyfill packages.
    pub core_dir: Option<PathBuf>,
    /// Drop comments and collapse whitespace in code modules.
    pub shrink: bool,
}

impl PackOptions {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_discovery(mut self, discovery: bool) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    pub fn with_expose_main(mut self, name: impl Into<String>) -> Self {
        self.expose_main = Some(name.into());
        self
    }

    pub fn with_expose_require(mut self, expose_require: bool) -> Self {
        self.expose_require = expose_require;
        self
    }

    pub fn with_esm(mut self, esm: bool) -> Self {
        self.esm = esm;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_manifest(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    pub fn with_core_dir(mut self, core_dir: impl Into<PathBuf>) -> Self {
        self.core_dir = Some(core_dir.into());
        self
    }

    /// Falls back to `KINSHIP_CORE_DIR` when no core directory is set.
    pub fn with_core_dir_from_env(mut self) -> Self {
        if self.core_dir.is_none() {
            self.core_dir = std::env::var_os(CORE_DIR_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from);
        }
        self
    }

    pub fn with_shrink(mut self, shrink: bool) -> Self {
        self.shrink = shrink;
        self
    }

    /// The header type implied by the mode flags. ESM output excludes every
    /// other mode.
    pub fn bundle_type(&self) -> Result<BundleType> {
        if self.esm {
            if self.execute || self.expose_main.is_some() || self.expose_require {
                return Err(KinshipError::user(
                    "ESM output cannot be combined with execute, expose-main or expose-require",
                ));
            }
            return Ok(BundleType::Esm);
        }

        if let Some(name) = &self.expose_main {
            if !is_identifier(name) {
                return Err(KinshipError::user(format!(
                    "'{name}' is not a valid global identifier"
                )));
            }
            return Ok(BundleType::ExposeMain);
        }

        Ok(if self.execute {
            BundleType::Execute
        } else {
            BundleType::Silent
        })
    }

    /// Global names the bundle defines, in header order.
    pub fn globals(&self) -> Vec<String> {
        let mut globals = Vec::new();
        if !self.esm {
            if let Some(name) = &self.expose_main {
                globals.push(name.clone());
            }
            if self.expose_require {
                globals.push("require".to_string());
            }
        }
        globals
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
