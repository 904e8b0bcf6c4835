//! Module graph for bundling
//!
//! Seeds from the user's inputs are drained through a breadth-first
//! worklist: each module is read and analysed, its static requires are
//! resolved, and whatever was not seen before is queued. Once closed, modules
//! are linked to the package owning them and the whole graph is replayed
//! through the runtime resolver to make sure the bundle will resolve at run
//! time exactly what was resolved here.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};

use kinship_runtime::path::{dirname, is_core, CORE_BASE};
use kinship_runtime::Registry;
use kinship_scan::{analyse, Token};
use tracing::debug;

use crate::config::PackOptions;
use crate::error::{read_to_string, KinshipError, Result};
use crate::inputs::{classify, compute_root, expand_inputs, Seed};
use crate::package_json::{manifest_path, parse_package_json};
use crate::resolver::{canonicalize, ModuleResolver, PackageTarget};

/// How a module body is wrapped in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// JavaScript, scanned and wrapped in a function.
    Code,
    /// JSON, assigned to `module.exports` as is.
    Data,
}

impl ModuleKind {
    /// JSON files are data, everything else is code. Ids keep the file
    /// extension, so this applies to them too.
    pub fn of(path: &Path) -> Self {
        match path.extension() {
            Some(extension) if extension == "json" => ModuleKind::Data,
            _ => ModuleKind::Code,
        }
    }
}

/// A module of the graph
#[derive(Debug, Clone)]
pub struct Module {
    pub id: String,
    pub alias_id: Option<String>,
    /// Canonical path of the source file.
    pub path: PathBuf,
    pub kind: ModuleKind,
    /// Normalized body: no directive prologue, trimmed.
    pub body: String,
    /// Scanner output of the normalized body, empty for data modules.
    pub tokens: Vec<Token>,
    /// Static `require()` specifiers, in source order.
    pub requires: Vec<String>,
    /// Ambient identifiers the module uses.
    pub ambient: Vec<&'static str>,
    pub strict: bool,
    /// Index of the owning package in the graph's package list.
    pub package: Option<usize>,
    /// Specifiers resolved at build time with the id they resolved to.
    resolved: Vec<(String, String)>,
}

/// A package of the graph
#[derive(Debug, Clone)]
pub struct Package {
    pub id: String,
    pub alias_id: Option<String>,
    /// Canonical package directory.
    pub dir: PathBuf,
    pub name: Option<String>,
    pub version: Option<String>,
    pub main_module_id: String,
    /// Ids of the modules linked to this package, in graph order.
    pub modules: Vec<String>,
}

#[derive(Debug)]
enum Pending {
    Module(PathBuf),
    Package(PackageTarget),
}

/// The module graph, built from seeds to closure.
#[derive(Debug)]
pub struct ModuleGraph {
    root: PathBuf,
    resolver: ModuleResolver,
    discovery: bool,
    modules: Vec<Module>,
    packages: Vec<Package>,
    module_ids: HashSet<String>,
    package_index: HashMap<String, usize>,
    worklist: VecDeque<Pending>,
    /// Build-time resolutions of ambient polyfill requires, made from `/`.
    ambient_resolved: Vec<(String, String)>,
}

impl ModuleGraph {
    /// An empty graph. The root and core directory must be canonical.
    pub fn new(root: PathBuf, core_dir: Option<PathBuf>, discovery: bool) -> Self {
        Self {
            root,
            resolver: ModuleResolver::new(core_dir),
            discovery,
            modules: Vec::new(),
            packages: Vec::new(),
            module_ids: HashSet::new(),
            package_index: HashMap::new(),
            worklist: VecDeque::new(),
            ambient_resolved: Vec::new(),
        }
    }

    /// Expands and classifies the inputs, then builds, links and checks the
    /// whole graph.
    pub fn from_options(options: &PackOptions) -> Result<Self> {
        let paths = expand_inputs(&options.inputs)?;
        if paths.is_empty() {
            return Err(KinshipError::user("no input file"));
        }
        let seeds = classify(&paths)?;
        let root = compute_root(&seeds, options.root.as_deref())?;
        let core_dir = match &options.core_dir {
            Some(dir) if dir.is_dir() => Some(canonicalize(dir)?),
            Some(dir) => {
                return Err(KinshipError::user(format!(
                    "core directory {} doesn't exist",
                    dir.display()
                )))
            }
            None => None,
        };
        debug!(root = %root.display(), "computed root");

        let mut graph = Self::new(root, core_dir, options.discovery);
        for seed in &seeds {
            graph.add_seed(seed)?;
        }
        graph.drain()?;
        graph.link_packages();
        graph.check_runtime_agreement()?;
        Ok(graph)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// The first module in graph order.
    pub fn entry(&self) -> Option<&Module> {
        self.modules.first()
    }

    pub fn package_of(&self, module: &Module) -> Option<&Package> {
        module.package.map(|index| &self.packages[index])
    }

    /// Whether some module uses the given ambient identifier.
    pub fn uses_ambient(&self, name: &str) -> bool {
        self.ambient_user(name).is_some()
    }

    /// The first project module using the given ambient identifier. Core
    /// polyfills are left out: they provide those globals.
    pub fn ambient_user(&self, name: &str) -> Option<&Module> {
        self.modules
            .iter()
            .find(|module| !is_core(&module.id) && module.ambient.contains(&name))
    }

    /// Queues a seed. A package seed queues its main module too.
    pub fn add_seed(&mut self, seed: &Seed) -> Result<()> {
        match seed {
            Seed::Module(path) => self.worklist.push_back(Pending::Module(path.clone())),
            Seed::Package(dir) => {
                let target = self.resolver.package_target(dir, None)?;
                let main = target.main.clone();
                self.enqueue(vec![target], main);
            }
        }
        Ok(())
    }

    /// Processes the worklist until it is empty.
    pub fn drain(&mut self) -> Result<()> {
        while let Some(pending) = self.worklist.pop_front() {
            match pending {
                Pending::Package(target) => self.add_package(target)?,
                Pending::Module(path) => self.add_module(path)?,
            }
        }
        Ok(())
    }

    /// Id of a canonical path: `/[core]/...` inside the core directory,
    /// root-relative otherwise.
    pub fn id_of(&self, path: &Path) -> Result<String> {
        if let Some(core_dir) = self.resolver.core_dir() {
            if let Ok(relative) = path.strip_prefix(core_dir) {
                return Ok(format!("{CORE_BASE}{}", relative_id(relative)));
            }
        }

        match path.strip_prefix(&self.root) {
            Ok(relative) => Ok(relative_id(relative)),
            Err(_) => Err(KinshipError::user(format!(
                "{} is outside of the root {} (its id would be {})",
                path.display(),
                self.root.display(),
                escaping_id(path, &self.root)
            ))),
        }
    }

    fn add_module(&mut self, path: PathBuf) -> Result<()> {
        let id = self.id_of(&path)?;
        if !self.module_ids.insert(id.clone()) {
            return Ok(());
        }

        let mut module = load_module(id, path)?;
        debug!(id = %module.id, path = %module.path.display(), "discovered module");

        if self.discovery {
            let mut seen = HashSet::new();
            for specifier in &module.requires {
                if !seen.insert(specifier.as_str()) {
                    continue;
                }
                let resolution = self.resolver.resolve(specifier, &module.path)?;
                let resolved_id = self.id_of(&resolution.module)?;
                self.enqueue(resolution.packages, resolution.module);
                module.resolved.push((specifier.clone(), resolved_id));
            }

            if module.ambient.contains(&"Buffer") && !is_core(&module.id) && self.ambient_resolved.is_empty() {
                let requester = format!("the global Buffer of {}", module.id);
                let resolution = self.resolver.resolve_for("buffer", &self.root, &requester)?;
                let resolved_id = self.id_of(&resolution.module)?;
                self.enqueue(resolution.packages, resolution.module);
                self.ambient_resolved.push(("buffer".to_string(), resolved_id));
            }
        }

        self.modules.push(module);
        Ok(())
    }

    fn enqueue(&mut self, packages: Vec<PackageTarget>, module: PathBuf) {
        self.worklist
            .extend(packages.into_iter().map(Pending::Package));
        self.worklist.push_back(Pending::Module(module));
    }

    fn add_package(&mut self, target: PackageTarget) -> Result<()> {
        let id = self.id_of(&target.dir)?;
        let alias_id = match &target.core_name {
            Some(core_name) => {
                if !self.resolver.is_core_path(&target.dir) {
                    return Err(KinshipError::internal(format!(
                        "core package '{core_name}' resolved to {}, outside of the core directory",
                        target.dir.display()
                    )));
                }
                let folder = target.dir.file_name().and_then(|name| name.to_str());
                (folder != Some(core_name.as_str()))
                    .then(|| format!("{CORE_BASE}/node_modules/{core_name}"))
            }
            None => None,
        };

        if let Some(&index) = self.package_index.get(&id) {
            // reached first under its own folder name, later as a core module
            let package = &mut self.packages[index];
            if package.alias_id.is_none() {
                package.alias_id = alias_id;
            }
            return Ok(());
        }

        let manifest = parse_package_json(&manifest_path(&target.dir))?;
        let package = Package {
            main_module_id: self.id_of(&target.main)?,
            id: id.clone(),
            alias_id,
            dir: target.dir,
            name: manifest.name,
            version: manifest.version,
            modules: Vec::new(),
        };
        debug!(id = %package.id, name = ?package.name, "discovered package");

        self.package_index.insert(id, self.packages.len());
        self.packages.push(package);
        Ok(())
    }

    /// Links each module to the package with the longest id prefixing its
    /// own. Package order is left untouched.
    pub fn link_packages(&mut self) {
        let mut by_length: Vec<usize> = (0..self.packages.len()).collect();
        by_length.sort_by(|&a, &b| self.packages[b].id.len().cmp(&self.packages[a].id.len()));

        for package in &mut self.packages {
            package.modules.clear();
        }

        for module in &mut self.modules {
            module.package = by_length.iter().copied().find(|&index| {
                let package_id = &self.packages[index].id;
                let prefix = if package_id.ends_with('/') {
                    package_id.clone()
                } else {
                    format!("{package_id}/")
                };
                module.id.starts_with(&prefix)
            });

            if let Some(index) = module.package {
                self.packages[index].modules.push(module.id.clone());
            }
        }
    }

    /// The graph as the bundled runtime will see it, without loaders.
    pub fn runtime_registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();
        for package in &self.packages {
            registry.prepare_package(&package.id, &package.main_module_id, package.alias_id.as_deref());
        }
        for module in &self.modules {
            let package_id = self.package_of(module).map(|package| package.id.as_str());
            registry
                .prepare_module(&module.id, package_id, module.alias_id.as_deref(), None)
                .map_err(|e| KinshipError::internal(e.to_string()))?;
        }
        Ok(registry)
    }

    /// Replays every build-time resolution through the runtime resolver.
    pub fn check_runtime_agreement(&self) -> Result<()> {
        let registry = self.runtime_registry()?;

        let module_resolutions = self.modules.iter().flat_map(|module| {
            let directory = dirname(&module.id).unwrap_or("/");
            module
                .resolved
                .iter()
                .map(move |(specifier, id)| (module.id.as_str(), directory, specifier, id))
        });
        let ambient_resolutions = self
            .ambient_resolved
            .iter()
            .map(|(specifier, id)| ("<ambient>", "/", specifier, id));

        for (requester, directory, specifier, expected) in module_resolutions.chain(ambient_resolutions) {
            let actual = registry.resolve(specifier, directory).map_err(|e| {
                KinshipError::internal(format!(
                    "'{specifier}' required by {requester} resolves to {expected} at build time, \
                     but the runtime fails: {e}"
                ))
            })?;
            if actual != *expected {
                return Err(KinshipError::internal(format!(
                    "'{specifier}' required by {requester} resolves to {expected} at build time, \
                     but to {actual} at run time"
                )));
            }
        }
        Ok(())
    }
}

fn load_module(id: String, path: PathBuf) -> Result<Module> {
    let source = read_to_string(&path)?;
    let kind = ModuleKind::of(&path);

    let mut module = Module {
        id,
        alias_id: None,
        path,
        kind,
        body: String::new(),
        tokens: Vec::new(),
        requires: Vec::new(),
        ambient: Vec::new(),
        strict: false,
        package: None,
        resolved: Vec::new(),
    };

    match kind {
        ModuleKind::Data => {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&source) {
                return Err(KinshipError::user(format!(
                    "{} is not valid JSON: {e}",
                    module.path.display()
                )));
            }
            module.body = source.trim().to_string();
        }
        ModuleKind::Code => {
            let analysis = match analyse(&source, true) {
                Ok(analysis) => analysis,
                Err(error) => {
                    return Err(KinshipError::Scan {
                        path: module.path,
                        source_text: source,
                        error,
                    })
                }
            };
            module.body = analysis.body;
            module.tokens = analysis.tokens;
            module.requires = analysis.requires;
            module.ambient = analysis.ambient;
            module.strict = analysis.strict;
        }
    }

    Ok(module)
}

fn relative_id(relative: &Path) -> String {
    let segments: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", segments.join("/"))
}

/// The `..`-laden id an outside path would get, for error messages.
fn escaping_id(path: &Path, root: &Path) -> String {
    let path_components: Vec<Component> = path.components().collect();
    let root_components: Vec<Component> = root.components().collect();
    let shared = path_components
        .iter()
        .zip(&root_components)
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments = vec!["..".to_string(); root_components.len() - shared];
    segments.extend(
        path_components[shared..]
            .iter()
            .map(|component| component.as_os_str().to_string_lossy().into_owned()),
    );
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project() -> (tempfile::TempDir, PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        (temp, root)
    }

    fn ids(graph: &ModuleGraph) -> Vec<&str> {
        graph.modules().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_discovery_is_breadth_first() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "require('./b'); require('./c');");
        write(&root.join("b.js"), "require('./d');");
        write(&root.join("c.js"), "require('./b.js');");
        write(&root.join("d.json"), "{\"x\": 1}\n");

        let options = PackOptions::new([root.join("a.js").display().to_string()]).with_discovery(true);
        let graph = ModuleGraph::from_options(&options).unwrap();

        assert_eq!(graph.root(), root);
        assert_eq!(ids(&graph), vec!["/a.js", "/b.js", "/c.js", "/d.json"]);
        assert_eq!(graph.modules()[3].kind, ModuleKind::Data);
        assert_eq!(graph.modules()[3].body, "{\"x\": 1}");
        assert!(graph.packages().is_empty());
    }

    #[test]
    fn test_discovery_disabled_keeps_seeds_only() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "'use strict';\nrequire('./b');");
        write(&root.join("b.js"), "");

        let options = PackOptions::new([root.join("a.js").display().to_string()]);
        let graph = ModuleGraph::from_options(&options).unwrap();
        assert_eq!(ids(&graph), vec!["/a.js"]);
        assert!(graph.modules()[0].strict);
        assert_eq!(graph.modules()[0].body, "require('./b');");
        assert_eq!(graph.modules()[0].requires, vec!["./b"]);
    }

    #[test]
    fn test_package_seed_and_bare_require() {
        let (_temp, root) = project();
        write(&root.join("app/package.json"), r#"{"name":"app","version":"1.2.3","main":"main.js"}"#);
        write(&root.join("app/main.js"), "module.exports = require('dep/lib/x');");
        write(&root.join("app/node_modules/dep/package.json"), r#"{"name":"dep","version":"0.1.0"}"#);
        write(&root.join("app/node_modules/dep/index.js"), "");
        write(&root.join("app/node_modules/dep/lib/x.js"), "");

        let options = PackOptions::new([root.join("app").display().to_string()]).with_discovery(true);
        let graph = ModuleGraph::from_options(&options).unwrap();

        let packages: Vec<&str> = graph.packages().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(packages, vec!["/", "/node_modules/dep"]);
        assert_eq!(ids(&graph), vec!["/main.js", "/node_modules/dep/lib/x.js"]);

        let entry = graph.entry().unwrap();
        assert_eq!(graph.package_of(entry).unwrap().name.as_deref(), Some("app"));
        let x = &graph.modules()[1];
        assert_eq!(graph.package_of(x).unwrap().id, "/node_modules/dep");
        assert_eq!(graph.packages()[1].main_module_id, "/node_modules/dep/index.js");
    }

    #[test]
    fn test_longest_package_prefix_wins() {
        let mut graph = ModuleGraph::new(PathBuf::from("/r"), None, false);
        for id in ["/pkg", "/pkg/sub", "/pkgs"] {
            graph.package_index.insert(id.to_string(), graph.packages.len());
            graph.packages.push(Package {
                id: id.to_string(),
                alias_id: None,
                dir: PathBuf::from(format!("/r{id}")),
                name: None,
                version: None,
                main_module_id: format!("{id}/index.js"),
                modules: Vec::new(),
            });
        }
        for id in ["/pkg/sub/x.js", "/pkg/y.js", "/pkgs/z.js", "/other.js"] {
            graph.modules.push(placeholder(id));
        }

        graph.link_packages();
        let owners: Vec<Option<&str>> = graph
            .modules()
            .iter()
            .map(|m| graph.package_of(m).map(|p| p.id.as_str()))
            .collect();
        assert_eq!(owners, vec![Some("/pkg/sub"), Some("/pkg"), Some("/pkgs"), None]);
        assert_eq!(graph.packages()[0].id, "/pkg");
        assert_eq!(graph.packages()[1].modules, vec!["/pkg/sub/x.js"]);
    }

    fn placeholder(id: &str) -> Module {
        Module {
            id: id.to_string(),
            alias_id: None,
            path: PathBuf::from(id),
            kind: ModuleKind::Code,
            body: String::new(),
            tokens: Vec::new(),
            requires: Vec::new(),
            ambient: Vec::new(),
            strict: false,
            package: None,
            resolved: Vec::new(),
        }
    }

    #[test]
    fn test_outside_root_is_a_user_error() {
        let (_temp, root) = project();
        write(&root.join("src/a.js"), "require('../shared/b');");
        write(&root.join("shared/b.js"), "");

        let options = PackOptions::new([root.join("src/a.js").display().to_string()]).with_discovery(true);
        let err = ModuleGraph::from_options(&options).err().unwrap();
        assert!(err.is_user_error());
        let message = err.to_string();
        assert!(message.contains("outside of the root"));
        assert!(message.contains("/../shared/b.js"));
    }

    #[test]
    fn test_core_modules_get_core_ids_and_alias() {
        let (_temp, root) = project();
        let core = root.join("core");
        write(&core.join("node_modules/path-browserify/package.json"), r#"{"name":"path-browserify","main":"index.js"}"#);
        write(&core.join("node_modules/path-browserify/index.js"), "");
        write(&root.join("app/a.js"), "const path = require('path');");

        let options = PackOptions::new([root.join("app/a.js").display().to_string()])
            .with_discovery(true)
            .with_core_dir(&core);
        let graph = ModuleGraph::from_options(&options).unwrap();

        assert_eq!(ids(&graph), vec!["/a.js", "/[core]/node_modules/path-browserify/index.js"]);
        let package = &graph.packages()[0];
        assert_eq!(package.id, "/[core]/node_modules/path-browserify");
        assert_eq!(package.alias_id.as_deref(), Some("/[core]/node_modules/path"));
        assert_eq!(graph.package_of(&graph.modules()[1]).unwrap().id, package.id);
    }

    #[test]
    fn test_buffer_pulls_the_buffer_package() {
        let (_temp, root) = project();
        let core = root.join("core");
        write(&core.join("node_modules/buffer/package.json"), r#"{"name":"buffer"}"#);
        write(
            &core.join("node_modules/buffer/index.js"),
            "exports.Buffer = function () { return process.browser; };",
        );
        write(&root.join("app/a.js"), "Buffer.from('x');");

        let options = PackOptions::new([root.join("app/a.js").display().to_string()])
            .with_discovery(true)
            .with_core_dir(&core);
        let graph = ModuleGraph::from_options(&options).unwrap();

        assert_eq!(graph.ambient_user("Buffer").unwrap().id, "/a.js");
        // the polyfill's own use of process does not count
        assert!(!graph.uses_ambient("process"));
        assert_eq!(ids(&graph), vec!["/a.js", "/[core]/node_modules/buffer/index.js"]);
        let registry = graph.runtime_registry().unwrap();
        assert_eq!(registry.resolve("buffer", "/").unwrap(), "/[core]/node_modules/buffer/index.js");
    }

    #[test]
    fn test_buffer_without_core_dir_names_the_module() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "require('./b');");
        write(&root.join("b.js"), "module.exports = Buffer.alloc(2);");

        let options = PackOptions::new([root.join("a.js").display().to_string()]).with_discovery(true);
        let err = ModuleGraph::from_options(&options).unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("required by the global Buffer of /b.js"));
    }

    #[test]
    fn test_invalid_json_and_scan_errors() {
        let (_temp, root) = project();
        write(&root.join("bad.json"), "{ nope");
        write(&root.join("bad.js"), "let s = `unterminated");

        let options = PackOptions::new([root.join("bad.json").display().to_string()]);
        let err = ModuleGraph::from_options(&options).err().unwrap();
        assert!(err.to_string().contains("bad.json"));

        let options = PackOptions::new([root.join("bad.js").display().to_string()]);
        let err = ModuleGraph::from_options(&options).err().unwrap();
        assert!(matches!(err, KinshipError::Scan { .. }));
    }

    #[test]
    fn test_unresolved_require_names_specifier_and_requester() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "require('./missing');");

        let options = PackOptions::new([root.join("a.js").display().to_string()]).with_discovery(true);
        let err = ModuleGraph::from_options(&options).err().unwrap();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("./missing"));
        assert!(err.to_string().contains("a.js"));
    }

    #[test]
    fn test_escaping_id() {
        assert_eq!(escaping_id(Path::new("/p/shared/b.js"), Path::new("/p/src")), "/../shared/b.js");
        assert_eq!(relative_id(Path::new("")), "/");
        assert_eq!(relative_id(Path::new("a/b.js")), "/a/b.js");
    }
}
