//! Graph analysis without bundling

use std::path::PathBuf;

use serde::Serialize;

use crate::config::PackOptions;
use crate::dep_graph::ModuleGraph;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    pub id: String,
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub path: PathBuf,
}

/// What a pack with the same options would contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub root: PathBuf,
    pub packages: Vec<PackageSummary>,
    pub modules: Vec<ModuleSummary>,
}

/// Resolves the module graph and lists its packages and modules.
pub fn analyse(options: &PackOptions) -> Result<Analysis> {
    let graph = ModuleGraph::from_options(options)?;

    Ok(Analysis {
        root: graph.root().to_path_buf(),
        packages: graph
            .packages()
            .iter()
            .map(|package| PackageSummary {
                id: package.id.clone(),
                name: package.name.clone(),
                version: package.version.clone(),
            })
            .collect(),
        modules: graph
            .modules()
            .iter()
            .map(|module| ModuleSummary {
                id: module.id.clone(),
                path: module.path.clone(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_analyse_lists_packages_and_modules() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        fs::write(root.join("node_modules/dep/package.json"), r#"{"name":"dep","version":"2.0.0"}"#).unwrap();
        fs::write(root.join("node_modules/dep/index.js"), "module.exports = 2;").unwrap();
        fs::write(root.join("main.js"), "module.exports = require('dep');").unwrap();

        let options = PackOptions::new([root.join("main.js").display().to_string()]).with_discovery(true);
        let analysis = analyse(&options).unwrap();

        assert_eq!(analysis.root, root);
        assert_eq!(
            analysis.packages,
            vec![PackageSummary {
                id: "/node_modules/dep".to_string(),
                name: Some("dep".to_string()),
                version: Some("2.0.0".to_string()),
            }]
        );
        let modules: Vec<&str> = analysis.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(modules, vec!["/main.js", "/node_modules/dep/index.js"]);
        assert_eq!(analysis.modules[1].path, root.join("node_modules/dep/index.js"));
    }
}
