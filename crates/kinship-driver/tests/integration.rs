//! Integration tests for the kinship bundler.
//!
//! Project trees are built in temporary directories, packed through the
//! library API or the `kinship` binary, then read back.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

use kinship_driver::{
    extract, info, pack, BundleReader, BundleType, KinshipError, ModuleGraph, PackOptions, Segment,
};

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn project() -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    (temp, root)
}

fn arg(path: &Path) -> String {
    path.display().to_string()
}

fn kinship() -> Command {
    let mut command = Command::cargo_bin("kinship").unwrap();
    command.env_remove("RUST_LOG").env_remove("KINSHIP_CORE_DIR");
    command
}

fn module_ids(bundle: &str) -> Vec<String> {
    BundleReader::new(bundle)
        .unwrap()
        .segments()
        .unwrap()
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Module(module) => Some(module.id),
            Segment::Package(_) => None,
        })
        .collect()
}

/// A small app with a package, a scoped package and a data module.
fn sample_app(root: &Path) {
    write(
        &root.join("package.json"),
        r#"{"name":"sample-app","version":"1.4.0","main":"src/main.js"}"#,
    );
    write(
        &root.join("src/main.js"),
        "'use strict';\n\
         const greet = require('./greet');\n\
         const config = require('../config.json');\n\
         const pad = require('left-pad');\n\
         module.exports = greet(pad(config.name, 8));\n",
    );
    write(
        &root.join("src/greet.js"),
        "// say hello\nmodule.exports = name => `hello ${name}`;\n",
    );
    write(&root.join("config.json"), "{ \"name\": \"world\" }\n");
    write(
        &root.join("node_modules/left-pad/package.json"),
        r#"{"name":"left-pad","version":"1.3.0","main":"lib/pad"}"#,
    );
    write(
        &root.join("node_modules/left-pad/lib/pad.js"),
        "module.exports = (s, n) => require('@util/repeat')(' ', n - s.length) + s;\n",
    );
    write(
        &root.join("node_modules/@util/repeat/package.json"),
        r#"{"name":"@util/repeat","version":"0.0.1"}"#,
    );
    write(
        &root.join("node_modules/@util/repeat/index.js"),
        "module.exports = (c, n) => n > 0 ? c.repeat(n) : '';\n",
    );
}

#[test]
fn test_scenario_shared_directory_root() {
    let (_temp, root) = project();
    write(&root.join("a.js"), "module.exports = require('./b.js') + 1;\n");
    write(&root.join("b.js"), "module.exports = 41;\n");

    let options = PackOptions::new([arg(&root.join("a.js"))])
        .with_discovery(true)
        .with_execute(true);
    let bundle = pack(&options).unwrap();

    let header = info(&bundle).unwrap();
    assert_eq!(header.name, None);
    assert_eq!(header.version, None);
    assert_eq!(header.bundle_type, BundleType::Execute);
    assert!(header.packages.is_empty());
    assert_eq!(header.bundler, "kinship");
    assert_eq!(module_ids(&bundle), vec!["/a.js", "/b.js"]);
    assert!(bundle.contains("Module.main.load() ;"));
}

#[test]
fn test_scenario_bare_package_skips_manifest_less_folder() {
    let (_temp, root) = project();
    let project = root.join("project");
    write(&project.join("src/x.js"), "module.exports = require('lodash');\n");
    write(
        &project.join("node_modules/lodash/package.json"),
        r#"{"name":"lodash","version":"4.17.21","main":"lodash.js"}"#,
    );
    write(&project.join("node_modules/lodash/lodash.js"), "module.exports = {};\n");
    write(&project.join("src/node_modules/lodash/index.js"), "throw new Error('wrong lodash');\n");

    let options = PackOptions::new([arg(&project.join("src/x.js"))])
        .with_discovery(true)
        .with_root(&project);
    let bundle = pack(&options).unwrap();

    assert_eq!(module_ids(&bundle), vec!["/src/x.js", "/node_modules/lodash/lodash.js"]);
    let header = info(&bundle).unwrap();
    assert_eq!(header.packages.len(), 1);
    assert_eq!(header.packages[0].id, "/node_modules/lodash");
    assert_eq!(header.packages[0].name.as_deref(), Some("lodash"));
    assert!(!bundle.contains("wrong lodash"));
}

#[test]
fn test_packing_without_discovery_is_idempotent() {
    let (_temp, root) = project();
    sample_app(&root);

    let options = PackOptions::new([
        arg(&root.join("src/main.js")),
        arg(&root.join("src/greet.js")),
        arg(&root.join("config.json")),
    ]);
    let first = pack(&options).unwrap();
    let second = pack(&options).unwrap();

    let first_boundary = info(&first).unwrap().boundary;
    let second_boundary = info(&second).unwrap().boundary;
    assert_ne!(first_boundary, second_boundary);
    assert_eq!(first.replace(&first_boundary, "BOUNDARY"), second.replace(&second_boundary, "BOUNDARY"));
}

#[test]
fn test_round_trip() {
    let (_temp, root) = project();
    sample_app(&root);

    let options = PackOptions::new([arg(&root)]).with_discovery(true);
    let graph = ModuleGraph::from_options(&options).unwrap();
    let bundle = pack(&options).unwrap();

    let header = info(&bundle).unwrap();
    assert_eq!(header.name.as_deref(), Some("sample-app"));
    assert_eq!(header.version.as_deref(), Some("1.4.0"));
    let package_ids: Vec<&str> = header.packages.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(package_ids, vec!["/", "/node_modules/left-pad", "/node_modules/@util/repeat"]);

    assert_eq!(graph.modules().len(), 5);
    for module in graph.modules() {
        let Segment::Module(segment) = extract(&bundle, &module.id).unwrap() else {
            panic!("{} is not a module segment", module.id);
        };
        assert_eq!(segment.body, module.body, "body of {}", module.id);
        assert_eq!(segment.strict, module.strict, "strictness of {}", module.id);
        assert_eq!(segment.kind, module.kind);
    }

    let Segment::Package(left_pad) = extract(&bundle, "left-pad").unwrap() else {
        panic!("left-pad is not a package segment");
    };
    assert_eq!(left_pad.main_module_id, "/node_modules/left-pad/lib/pad.js");
}

#[test]
fn test_nested_package_linking() {
    let (_temp, root) = project();
    write(&root.join("pkg/package.json"), r#"{"name":"pkg","main":"index.js"}"#);
    write(&root.join("pkg/index.js"), "module.exports = require('./sub');\n");
    write(&root.join("pkg/sub/package.json"), r#"{"name":"sub","main":"x.js"}"#);
    write(&root.join("pkg/sub/x.js"), "module.exports = 'x';\n");

    let options = PackOptions::new([arg(&root.join("pkg"))])
        .with_discovery(true)
        .with_root(&root);
    let bundle = pack(&options).unwrap();

    let Segment::Module(x) = extract(&bundle, "/pkg/sub/x.js").unwrap() else {
        panic!("expected a module segment");
    };
    assert_eq!(x.package_id.as_deref(), Some("/pkg/sub"));
    let Segment::Module(index) = extract(&bundle, "/pkg/index.js").unwrap() else {
        panic!("expected a module segment");
    };
    assert_eq!(index.package_id.as_deref(), Some("/pkg"));
}

#[test]
fn test_outside_root_fails() {
    let (_temp, root) = project();
    write(&root.join("app/main.js"), "require('../lib/util');\n");
    write(&root.join("lib/util.js"), "");

    let options = PackOptions::new([arg(&root.join("app/main.js"))])
        .with_discovery(true)
        .with_root(root.join("app"));
    let err = pack(&options).unwrap_err();
    assert!(matches!(err, KinshipError::UserInput { .. }));
    assert!(err.to_string().contains("lib/util.js"));
}

#[cfg(unix)]
#[test]
fn test_workspace_symlink_is_a_user_error() {
    let (_temp, root) = project();
    write(&root.join("packages/dep/package.json"), r#"{"name":"dep","version":"1.0.0"}"#);
    write(&root.join("packages/dep/index.js"), "module.exports = 'dep';\n");
    write(&root.join("a.js"), "module.exports = require('dep');\n");
    fs::create_dir_all(root.join("node_modules")).unwrap();
    std::os::unix::fs::symlink(root.join("packages/dep"), root.join("node_modules/dep")).unwrap();

    let options = PackOptions::new([arg(&root.join("a.js"))]).with_discovery(true);
    let err = pack(&options).unwrap_err();
    assert!(err.is_user_error(), "{err:?}");
    assert!(err.to_string().contains("node_modules/dep is a symbolic link"));

    kinship()
        .args(["pack", "-d"])
        .arg(root.join("a.js"))
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error: "))
        .stderr(predicate::str::contains("symbolic link"));
}

#[test]
fn test_local_buffer_binding_packs_without_core_dir() {
    let (_temp, root) = project();
    write(
        &root.join("a.js"),
        "var Buffer = require('./buf.js').Buffer;\nmodule.exports = new Buffer();\n",
    );
    write(&root.join("buf.js"), "exports.Buffer = class Buffer {};\n");

    let options = PackOptions::new([arg(&root.join("a.js"))]).with_discovery(true);
    let bundle = pack(&options).unwrap();
    assert_eq!(module_ids(&bundle), vec!["/a.js", "/buf.js"]);
    assert!(!bundle.contains("require( 'buffer' )"));
}

#[test]
fn test_core_polyfills_and_ambient_globals() {
    let (_temp, root) = project();
    let core = root.join("core");
    write(&core.join("node_modules/path-browserify/package.json"), r#"{"name":"path-browserify","version":"1.0.1"}"#);
    write(&core.join("node_modules/path-browserify/index.js"), "exports.sep = '/';\n");
    write(&core.join("node_modules/buffer/package.json"), r#"{"name":"buffer","version":"6.0.3"}"#);
    write(&core.join("node_modules/buffer/index.js"), "exports.Buffer = function Buffer() {};\n");
    write(
        &root.join("app/main.js"),
        "const path = require('path');\nmodule.exports = [path.sep, process.env.NODE_ENV, Buffer.name];\n",
    );

    let options = PackOptions::new([arg(&root.join("app/main.js"))])
        .with_discovery(true)
        .with_core_dir(&core);
    let bundle = pack(&options).unwrap();

    assert_eq!(
        module_ids(&bundle),
        vec![
            "/main.js",
            "/[core]/node_modules/path-browserify/index.js",
            "/[core]/node_modules/buffer/index.js",
        ]
    );
    assert!(bundle.contains(
        "Package.prepare('/[core]/node_modules/path-browserify','/[core]/node_modules/path-browserify/index.js','/[core]/node_modules/path');"
    ));
    assert!(bundle.contains("const process = {"));
    assert!(bundle.contains("var Buffer = require( 'buffer' ).Buffer ;"));

    let Segment::Package(path) = extract(&bundle, "/[core]/node_modules/path").unwrap() else {
        panic!("expected a package segment");
    };
    assert_eq!(path.id, "/[core]/node_modules/path-browserify");
}

#[test]
fn test_cli_pack_info_extract() {
    let (_temp, root) = project();
    sample_app(&root);
    let output = root.join("dist/app.js");
    fs::create_dir_all(root.join("dist")).unwrap();

    kinship()
        .args(["pack", "--discover", "--expose-main", "sampleApp", "-o"])
        .arg(&output)
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    kinship()
        .arg("info")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"sample-app\""))
        .stdout(predicate::str::contains("\"type\": \"expose-main\""))
        .stdout(predicate::str::contains("\"sampleApp\""));

    kinship()
        .arg("extract")
        .arg(&output)
        .arg("/src/greet.js")
        .assert()
        .success()
        .stdout("// say hello\nmodule.exports = name => `hello ${name}`;\n");

    kinship()
        .arg("extract")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("package  /node_modules/@util/repeat"))
        .stdout(predicate::str::contains("module   /config.json"));
}

#[test]
fn test_cli_pack_to_stdout_and_analyse() {
    let (_temp, root) = project();
    sample_app(&root);

    kinship()
        .args(["pack", "--esm"])
        .arg(root.join("src/greet.js"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("let KINSHIP_BUNDLE={"))
        .stdout(predicate::str::ends_with("export default Module.main.exports ;\n"));

    kinship()
        .args(["analyse", "-d"])
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": \"/node_modules/left-pad\""))
        .stdout(predicate::str::contains("\"id\": \"/src/greet.js\""));
}

#[test]
fn test_cli_glob_inputs() {
    let (_temp, root) = project();
    write(&root.join("lib/b.js"), "exports.b = 2;\n");
    write(&root.join("lib/a.js"), "exports.a = 1;\n");
    write(&root.join("lib/notes.txt"), "");

    let assert = kinship()
        .arg("pack")
        .arg(format!("{}/lib/*.js", root.display()))
        .assert()
        .success();
    let bundle = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert_eq!(module_ids(&bundle), vec!["/a.js", "/b.js"]);
}

#[test]
fn test_cli_errors() {
    let (_temp, root) = project();
    write(&root.join("not-a-bundle.js"), "console.log('hi');\n");
    write(&root.join("broken.js"), "/* never closed\n");
    fs::create_dir_all(root.join("plain-dir")).unwrap();

    kinship()
        .arg("info")
        .arg(root.join("not-a-bundle.js"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: not a kinship bundle"));

    kinship()
        .arg("pack")
        .arg(root.join("plain-dir"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("plain-dir"));

    kinship()
        .arg("pack")
        .arg(root.join("broken.js"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Scan error"));

    kinship()
        .args(["pack", "--esm", "--execute"])
        .arg(root.join("not-a-bundle.js"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("ESM output cannot be combined"));
}

#[test]
fn test_cli_scan() {
    let (_temp, root) = project();
    write(&root.join("a.js"), "x = a / b; y = /re/g;\n");

    kinship()
        .args(["scan", "--positions"])
        .arg(root.join("a.js"))
        .assert()
        .success()
        .stdout(predicate::str::contains("regex"))
        .stdout(predicate::str::contains("\"/re/g\""));
}
