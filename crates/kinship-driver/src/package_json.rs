//! Package manifest reader
//!
//! Only the fields the bundler cares about are extracted: `name` and
//! `version` for the bundle header, `main` for the package entry point.
//! Fields of the wrong type are ignored rather than rejected.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{read_to_string, KinshipError, Result};

pub const MANIFEST: &str = "package.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageJson {
    pub name: Option<String>,
    pub version: Option<String>,
    pub main: Option<String>,
}

/// Path of the manifest of a package directory.
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST)
}

/// Whether a directory is a package, i.e. holds a manifest.
pub fn has_manifest(dir: &Path) -> bool {
    manifest_path(dir).is_file()
}

/// Parse a package.json file
pub fn parse_package_json(path: &Path) -> Result<PackageJson> {
    let content = read_to_string(path)?;
    parse_package_json_str(&content)
        .map_err(|e| KinshipError::user(format!("can't parse manifest {}: {e}", path.display())))
}

/// Parse package.json from string content
fn parse_package_json_str(content: &str) -> std::result::Result<PackageJson, String> {
    let json: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let Value::Object(json) = json else {
        return Err("expected a JSON object".to_string());
    };

    let field = |key: &str| match json.get(key) {
        Some(Value::String(value)) if !value.is_empty() => Some(value.clone()),
        _ => None,
    };

    Ok(PackageJson {
        name: field("name"),
        version: field("version"),
        main: field("main"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_package_json() {
        let json = r#"{
            "name": "test-package",
            "version": "1.0.0",
            "main": "lib/index.js",
            "dependencies": { "lodash": "^4.17.21" }
        }"#;

        let pkg = parse_package_json_str(json).unwrap();
        assert_eq!(pkg.name.as_deref(), Some("test-package"));
        assert_eq!(pkg.version.as_deref(), Some("1.0.0"));
        assert_eq!(pkg.main.as_deref(), Some("lib/index.js"));
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        let pkg = parse_package_json_str(r#"{"name": "x", "version": 3, "main": ""}"#).unwrap();
        assert_eq!(pkg.name.as_deref(), Some("x"));
        assert_eq!(pkg.version, None);
        assert_eq!(pkg.main, None);
    }

    #[test]
    fn test_not_an_object() {
        assert!(parse_package_json_str("[1, 2]").is_err());
        assert!(parse_package_json_str("{ name: 'relaxed' }").is_err());
    }

    #[test]
    fn test_parse_file_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST);
        std::fs::write(&path, "{ nope").unwrap();

        let err = parse_package_json(&path).unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("package.json"));
        assert!(has_manifest(dir.path()));
    }
}
