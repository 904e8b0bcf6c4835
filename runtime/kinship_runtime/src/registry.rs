//! In-memory module registry
//!
//! Mirrors the loader of `js/runtime.js`: records are prepared up front, ids
//! are resolved against the prepared graph only, and module bodies run
//! lazily, at most once. Exports are shared `serde_json::Value` cells so that
//! a module required during its own evaluation hands out what it has so far.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::path::{
    collapse_dots, dirname, is_relative, join, namespace_base, package_name, CORE_BASE,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("cannot find module '{specifier}' ({reason})")]
    ModuleNotFound { specifier: String, reason: String },
    #[error("package '{0}' not found")]
    PackageNotFound(String),
    #[error("module '{0}' not found")]
    UnknownModule(String),
}

impl RuntimeError {
    fn not_found(specifier: &str, reason: &str) -> Self {
        RuntimeError::ModuleNotFound {
            specifier: specifier.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// The exported value of a module.
pub type Exports = Rc<RefCell<Value>>;

/// A module body. It receives the registry to require its dependencies.
pub type Loader = Box<dyn Fn(&Registry, &ModuleContext) -> RuntimeResult<()>>;

/// What a module body sees while it runs.
pub struct ModuleContext {
    pub id: String,
    pub directory: String,
    pub exports: Exports,
}

impl ModuleContext {
    /// Requires a dependency relative to this module.
    pub fn require(&self, registry: &Registry, specifier: &str) -> RuntimeResult<Exports> {
        registry.require(specifier, &self.directory)
    }

    /// Replaces the whole export value.
    pub fn set_exports(&self, value: Value) {
        *self.exports.borrow_mut() = value;
    }

    /// Sets one property of an object export.
    pub fn export(&self, key: &str, value: Value) {
        let mut exports = self.exports.borrow_mut();
        if !exports.is_object() {
            *exports = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut *exports {
            map.insert(key.to_string(), value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Prepared,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub id: String,
    pub main_module_id: String,
    pub alias_id: Option<String>,
    pub modules: Vec<String>,
}

pub struct ModuleRecord {
    pub id: String,
    pub package_id: Option<String>,
    pub directory: String,
    state: Cell<LoadState>,
    exports: Exports,
    loader: Option<Loader>,
}

impl ModuleRecord {
    pub fn state(&self) -> LoadState {
        self.state.get()
    }
}

/// Registry of prepared packages and modules.
#[derive(Default)]
pub struct Registry {
    packages: Vec<PackageRecord>,
    package_index: HashMap<String, usize>,
    modules: Vec<ModuleRecord>,
    module_index: HashMap<String, usize>,
    resolve_cache: RefCell<HashMap<String, HashMap<String, String>>>,
    resolve_misses: Cell<usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a package under its id and, when given, its alias.
    pub fn prepare_package(&mut self, id: &str, main_module_id: &str, alias_id: Option<&str>) {
        let index = self.packages.len();
        self.packages.push(PackageRecord {
            id: id.to_string(),
            main_module_id: main_module_id.to_string(),
            alias_id: alias_id.map(str::to_string),
            modules: Vec::new(),
        });
        self.package_index.insert(id.to_string(), index);
        if let Some(alias) = alias_id {
            self.package_index.insert(alias.to_string(), index);
        }
    }

    /// Registers a module. Its package must already be prepared.
    pub fn prepare_module(
        &mut self,
        id: &str,
        package_id: Option<&str>,
        alias_id: Option<&str>,
        loader: Option<Loader>,
    ) -> RuntimeResult<()> {
        if let Some(package_id) = package_id {
            let package_index = *self
                .package_index
                .get(package_id)
                .ok_or_else(|| RuntimeError::PackageNotFound(package_id.to_string()))?;
            self.packages[package_index].modules.push(id.to_string());
        }

        let index = self.modules.len();
        self.modules.push(ModuleRecord {
            id: id.to_string(),
            package_id: package_id.map(str::to_string),
            directory: dirname(id).unwrap_or("/").to_string(),
            state: Cell::new(LoadState::Prepared),
            exports: Rc::new(RefCell::new(Value::Object(Default::default()))),
            loader,
        });
        self.module_index.insert(id.to_string(), index);
        if let Some(alias) = alias_id {
            self.module_index.insert(alias.to_string(), index);
        }
        Ok(())
    }

    pub fn package(&self, id: &str) -> Option<&PackageRecord> {
        self.package_index.get(id).map(|&index| &self.packages[index])
    }

    pub fn module(&self, id: &str) -> Option<&ModuleRecord> {
        self.module_index.get(id).map(|&index| &self.modules[index])
    }

    /// The first prepared module.
    pub fn main(&self) -> Option<&ModuleRecord> {
        self.modules.first()
    }

    /// How many resolutions actually ran, cache hits excluded.
    pub fn resolve_misses(&self) -> usize {
        self.resolve_misses.get()
    }

    /// Resolves a specifier requested from `directory`, memoized per
    /// (directory, specifier) pair.
    pub fn resolve(&self, specifier: &str, directory: &str) -> RuntimeResult<String> {
        if let Some(id) = self
            .resolve_cache
            .borrow()
            .get(directory)
            .and_then(|by_specifier| by_specifier.get(specifier))
        {
            return Ok(id.clone());
        }

        let id = self.resolve_uncached(specifier, directory)?;
        trace!(specifier, directory, id = %id, "resolved");
        self.resolve_misses.set(self.resolve_misses.get() + 1);
        self.resolve_cache
            .borrow_mut()
            .entry(directory.to_string())
            .or_default()
            .insert(specifier.to_string(), id.clone());
        Ok(id)
    }

    fn resolve_uncached(&self, specifier: &str, directory: &str) -> RuntimeResult<String> {
        if specifier.starts_with('/') || specifier.starts_with('~') {
            return Err(RuntimeError::not_found(specifier, "absolute paths are not supported"));
        }

        let path = collapse_dots(specifier);

        if let Some(name) = package_name(&path) {
            let sub_path = &path[name.len()..];
            let package = match name.strip_prefix("core:") {
                Some(core_name) => self.search_package(core_name, CORE_BASE, CORE_BASE),
                None => {
                    let base = namespace_base(directory);
                    self.search_package(name, directory, base).or_else(|| {
                        if base == CORE_BASE {
                            None
                        } else {
                            self.search_package(name, CORE_BASE, CORE_BASE)
                        }
                    })
                }
            };

            let package = package
                .ok_or_else(|| RuntimeError::not_found(specifier, "no package in any node_modules"))?;
            if sub_path.is_empty() || sub_path == "/" {
                return Ok(package.main_module_id.clone());
            }
            return self.probe(&join(&package.id, &[sub_path]), specifier);
        }

        if is_relative(&path) {
            let mut rest = path.as_str();
            let mut directory = directory;
            while rest == ".." || rest.starts_with("../") {
                rest = rest.get(3..).unwrap_or("");
                directory = dirname(directory)
                    .ok_or_else(|| RuntimeError::not_found(specifier, "no more parent directory"))?;
            }
            return self.probe(&join(directory, &[rest]), specifier);
        }

        Err(RuntimeError::not_found(specifier, "can't resolve"))
    }

    /// Probes a candidate id: exact, `.js`, `.json`, package main,
    /// `index.js`, `index.json`.
    fn probe(&self, candidate: &str, specifier: &str) -> RuntimeResult<String> {
        for id in [
            candidate.to_string(),
            format!("{candidate}.js"),
            format!("{candidate}.json"),
        ] {
            if let Some(module) = self.module(&id) {
                return Ok(module.id.clone());
            }
        }

        if let Some(package) = self.package(candidate) {
            return Ok(package.main_module_id.clone());
        }

        for id in [join(candidate, &["index.js"]), join(candidate, &["index.json"])] {
            if let Some(module) = self.module(&id) {
                return Ok(module.id.clone());
            }
        }

        Err(RuntimeError::not_found(specifier, "no such module"))
    }

    fn search_package(&self, name: &str, directory: &str, base: &str) -> Option<&PackageRecord> {
        let mut directory = directory;
        loop {
            if let Some(package) = self.package(&join(directory, &["node_modules", name])) {
                return Some(package);
            }
            if directory == base {
                return None;
            }
            directory = dirname(directory)?;
        }
    }

    /// Resolves and loads a module, returning its exports.
    pub fn require(&self, specifier: &str, directory: &str) -> RuntimeResult<Exports> {
        let id = self.resolve(specifier, directory)?;
        self.require_id(&id)
    }

    /// Loads a module by id, evaluating it on first use only.
    pub fn require_id(&self, id: &str) -> RuntimeResult<Exports> {
        let module = self
            .module(id)
            .ok_or_else(|| RuntimeError::UnknownModule(id.to_string()))?;

        if module.state.get() == LoadState::Prepared {
            module.state.set(LoadState::Loading);
            if let Some(loader) = &module.loader {
                let context = ModuleContext {
                    id: module.id.clone(),
                    directory: module.directory.clone(),
                    exports: Rc::clone(&module.exports),
                };
                loader(self, &context)?;
            }
            module.state.set(LoadState::Loaded);
        }

        Ok(Rc::clone(&module.exports))
    }
}
