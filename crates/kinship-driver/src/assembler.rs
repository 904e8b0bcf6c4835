//! Bundle assembly
//!
//! Renders a closed module graph into one script: header, embedded runtime,
//! package segments, module segments, ambient polyfills, then the trailers of
//! the selected mode.

use std::io::Write;
use std::path::Path;

use kinship_runtime::{PROCESS_JS, RUNTIME_JS};
use kinship_scan::shrink;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tempfile::NamedTempFile;
use tracing::info;

use crate::bundle::{BundleHeader, PackageEntry, BOUNDARY_LEN, BUNDLER, BUNDLER_VERSION, SIGNATURE};
use crate::config::{BundleType, PackOptions};
use crate::dep_graph::{Module, ModuleGraph, ModuleKind};
use crate::error::{KinshipError, Result};
use crate::package_json::parse_package_json;
use crate::templates::{Binding, Template, Templates};

/// Builds the module graph described by `options` and renders it. When an
/// output path is set, the bundle is also written there atomically.
pub fn pack(options: &PackOptions) -> Result<String> {
    // Reject conflicting modes before touching the filesystem
    options.bundle_type()?;

    let graph = ModuleGraph::from_options(options)?;
    let bundle = assemble(&graph, options, &generate_boundary())?;

    if let Some(output) = &options.output {
        write_atomically(output, &bundle)?;
    }

    info!(
        modules = graph.modules().len(),
        packages = graph.packages().len(),
        bytes = bundle.len(),
        output = ?options.output,
        "packed bundle"
    );
    Ok(bundle)
}

/// Random alphanumeric token guarding the segment markers of one bundle.
pub fn generate_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect()
}

/// Renders a graph with a given boundary.
pub fn assemble(graph: &ModuleGraph, options: &PackOptions, boundary: &str) -> Result<String> {
    let bundle_type = options.bundle_type()?;
    let templates = Templates::new()?;

    let header = header(graph, options, bundle_type, boundary)?;
    let header = serde_json::to_string(&header)
        .map_err(|e| KinshipError::internal(format!("can't serialize the bundle header: {e}")))?;

    let mut content = String::from(RUNTIME_JS);
    ensure_newline(&mut content);

    for package in graph.packages() {
        content.push_str(&templates.render(
            Template::Package,
            &[
                ("boundary", Binding::Quoted(Some(boundary))),
                ("id", Binding::Quoted(Some(package.id.as_str()))),
                ("main-id", Binding::Quoted(Some(package.main_module_id.as_str()))),
                ("alias-id", Binding::Quoted(package.alias_id.as_deref())),
            ],
        )?);
    }

    for module in graph.modules() {
        content.push_str(&module_segment(&templates, graph, module, boundary, options.shrink)?);
    }

    content.push_str(&ambient_segments(&templates, graph)?);

    let mut content = match bundle_type {
        BundleType::Silent => content,
        BundleType::Execute => templates.wrap(Template::Execute, &content)?,
        BundleType::ExposeMain => {
            let name = options.expose_main.as_deref();
            templates.render(
                Template::ExposeMain,
                &[("body", Binding::Raw(content.as_str())), ("expose-name", Binding::Quoted(name))],
            )?
        }
        BundleType::Esm => templates.wrap(Template::Esm, &content)?,
    };
    if options.expose_require {
        content = templates.wrap(Template::ExposeRequire, &content)?;
    }

    let bundle = format!("{SIGNATURE}{header};\n{content}");
    match bundle_type {
        BundleType::Esm => Ok(bundle),
        _ => templates.wrap(Template::Pack, &bundle),
    }
}

fn header(
    graph: &ModuleGraph,
    options: &PackOptions,
    bundle_type: BundleType,
    boundary: &str,
) -> Result<BundleHeader> {
    let entry = graph
        .entry()
        .ok_or_else(|| KinshipError::user("nothing to pack: no module in the graph"))?;

    let (name, version) = match &options.manifest {
        Some(path) => {
            let manifest = parse_package_json(path)?;
            (manifest.name, manifest.version)
        }
        None => match graph.package_of(entry) {
            Some(package) => (package.name.clone(), package.version.clone()),
            None => (None, None),
        },
    };

    Ok(BundleHeader {
        name,
        version,
        bundle_type,
        expose_require: options.expose_require,
        globals: options.globals(),
        bundler: BUNDLER.to_string(),
        bundler_version: BUNDLER_VERSION.to_string(),
        boundary: boundary.to_string(),
        packages: graph
            .packages()
            .iter()
            .map(|package| PackageEntry {
                name: package.name.clone(),
                version: package.version.clone(),
                id: package.id.clone(),
            })
            .collect(),
    })
}

fn module_segment(
    templates: &Templates,
    graph: &ModuleGraph,
    module: &Module,
    boundary: &str,
    shrink_body: bool,
) -> Result<String> {
    let package_id = graph.package_of(module).map(|package| package.id.as_str());
    let common = [
        ("boundary", Binding::Quoted(Some(boundary))),
        ("id", Binding::Quoted(Some(module.id.as_str()))),
        ("package-id", Binding::Quoted(package_id)),
        ("alias-id", Binding::Quoted(module.alias_id.as_deref())),
    ];

    match module.kind {
        ModuleKind::Data => {
            let mut bindings = common.to_vec();
            bindings.push(("body", Binding::Raw(module.body.as_str())));
            templates.render(Template::Json, &bindings)
        }
        ModuleKind::Code => {
            let shrunk;
            let body = if shrink_body {
                shrunk = shrink(&module.tokens);
                shrunk.trim()
            } else {
                module.body.as_str()
            };

            let mut bindings = common.to_vec();
            bindings.push(("strict", Binding::Gate(module.strict, "\"use strict\";\n")));
            bindings.push(("body", Binding::Raw(body)));
            templates.render(Template::Module, &bindings)
        }
    }
}

/// Polyfills for the host globals modules use: `process` is defined inline,
/// `Buffer` comes from the `buffer` core package, which must be bundled.
fn ambient_segments(templates: &Templates, graph: &ModuleGraph) -> Result<String> {
    let mut segments = String::new();

    if graph.uses_ambient("process") {
        segments.push_str(PROCESS_JS);
        ensure_newline(&mut segments);
    }

    if let Some(module) = graph.ambient_user("Buffer") {
        let registry = graph.runtime_registry()?;
        if registry.resolve("buffer", "/").is_err() {
            return Err(KinshipError::user(format!(
                "{} uses the global 'Buffer' but the 'buffer' package is not in the bundle \
                 (enable discovery with a core directory, or add the package as an input)",
                module.id
            )));
        }
        segments.push_str(&templates.render(Template::Buffer, &[])?);
    }

    Ok(segments)
}

fn ensure_newline(text: &mut String) {
    if !text.ends_with('\n') {
        text.push('\n');
    }
}

/// Writes to a temporary file beside `output`, then renames it over
/// `output`. Nothing is left behind on failure.
fn write_atomically(output: &Path, content: &str) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| KinshipError::io(dir, e))?;
    temp.write_all(content.as_bytes())
        .map_err(|e| KinshipError::io(temp.path(), e))?;
    temp.persist(output)
        .map_err(|e| KinshipError::io(output, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project() -> (tempfile::TempDir, PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        (temp, root)
    }

    fn input(path: &Path) -> String {
        path.display().to_string()
    }

    #[test]
    fn test_boundary() {
        let boundary = generate_boundary();
        assert_eq!(boundary.len(), BOUNDARY_LEN);
        assert!(boundary.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_silent_layout() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "\"use strict\";\nmodule.exports = 1;\n");
        write(&root.join("b.json"), "[1, 2]\n");

        let options = PackOptions::new([input(&root.join("a.js")), input(&root.join("b.json"))]);
        let graph = ModuleGraph::from_options(&options).unwrap();
        let bundle = assemble(&graph, &options, "BBBBBBBBBBBBBBBB").unwrap();

        assert!(bundle.starts_with("(function(){let KINSHIP_BUNDLE={\"name\":null,\"version\":null,\"type\":\"silent\","));
        assert!(bundle.ends_with("})();\n"));
        assert!(bundle.contains(
            "KINSHIP_START_MODULE('BBBBBBBBBBBBBBBB');\n\
             Module.prepare('/a.js',null,null,(module,exports,require,__dirname,__filename)=>{\n\
             \"use strict\";\nmodule.exports = 1;\n});\n\
             KINSHIP_END_MODULE('BBBBBBBBBBBBBBBB');\n"
        ));
        assert!(bundle.contains("Module.prepare('/b.json',null,null,(module)=>{module.exports=[1, 2];});"));
        assert!(bundle.contains("Module.resolve = "));
        assert!(!bundle.contains("Module.main.load()"));
    }

    #[test]
    fn test_modes() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "module.exports = 1;");
        let graph = ModuleGraph::from_options(&PackOptions::new([input(&root.join("a.js"))])).unwrap();

        let options = PackOptions::new(["a.js"]).with_execute(true).with_expose_require(true);
        let bundle = assemble(&graph, &options, "B").unwrap();
        assert!(bundle.contains("\"type\":\"execute\",\"exposeRequire\":true,\"globals\":[\"require\"]"));
        assert!(bundle.ends_with("Module.main.load() ;\nglobalThis.require = require ;\n})();\n"));

        let options = PackOptions::new(["a.js"]).with_expose_main("myLib");
        let bundle = assemble(&graph, &options, "B").unwrap();
        assert!(bundle.contains("globalThis[ 'myLib' ] = Module.main.exports ;"));

        let options = PackOptions::new(["a.js"]).with_esm(true);
        let bundle = assemble(&graph, &options, "B").unwrap();
        assert!(bundle.starts_with("let KINSHIP_BUNDLE={"));
        assert!(bundle.ends_with("export default Module.main.exports ;\n"));
    }

    #[test]
    fn test_process_polyfill_and_shrink() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "// env\nvar   mode =   process.env.MODE ;\n\n\nexports.mode = mode;");

        let options = PackOptions::new([input(&root.join("a.js"))]).with_shrink(true);
        let graph = ModuleGraph::from_options(&options).unwrap();
        let bundle = assemble(&graph, &options, "B").unwrap();

        assert!(bundle.contains("const process = {"));
        assert!(bundle.contains("=>{\nvar mode = process.env.MODE ;\nexports.mode = mode;\n});"));
    }

    #[test]
    fn test_buffer_without_buffer_package() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "module.exports = Buffer.from('x');");

        let options = PackOptions::new([input(&root.join("a.js"))]);
        let graph = ModuleGraph::from_options(&options).unwrap();
        let err = assemble(&graph, &options, "B").unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().starts_with("/a.js uses the global 'Buffer'"));
    }

    #[test]
    fn test_locally_declared_buffer_needs_no_polyfill() {
        let (_temp, root) = project();
        write(
            &root.join("a.js"),
            "var Buffer = require('./buf.js').Buffer;\nmodule.exports = new Buffer();\n",
        );
        write(&root.join("buf.js"), "exports.Buffer = function Buffer() {};\n");

        let options = PackOptions::new([input(&root.join("a.js"))]).with_discovery(true);
        let graph = ModuleGraph::from_options(&options).unwrap();
        assert!(!graph.uses_ambient("Buffer"));

        let bundle = assemble(&graph, &options, "B").unwrap();
        assert!(!bundle.contains("require( 'buffer' )"));
    }

    #[test]
    fn test_manifest_override() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "");
        write(&root.join("meta/package.json"), r#"{"name":"override","version":"9.9.9"}"#);

        let options = PackOptions::new([input(&root.join("a.js"))]).with_manifest(root.join("meta/package.json"));
        let graph = ModuleGraph::from_options(&options).unwrap();
        let bundle = assemble(&graph, &options, "B").unwrap();
        assert!(bundle.contains("{\"name\":\"override\",\"version\":\"9.9.9\""));
    }

    #[test]
    fn test_pack_writes_output() {
        let (_temp, root) = project();
        write(&root.join("a.js"), "exports.a = 1;");
        let output = root.join("dist/bundle.js");
        fs::create_dir_all(root.join("dist")).unwrap();

        let options = PackOptions::new([input(&root.join("a.js"))]).with_output(&output);
        let bundle = pack(&options).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), bundle);
        assert_eq!(fs::read_dir(root.join("dist")).unwrap().count(), 1);
    }

    #[test]
    fn test_pack_rejects_conflicting_modes_early() {
        let options = PackOptions::new(["does-not-exist.js"]).with_esm(true).with_execute(true);
        let err = pack(&options).unwrap_err();
        assert!(err.to_string().contains("ESM"));
    }
}
