//! Bundle header and segment records shared by the assembler and the reader

use serde::{Deserialize, Serialize};

use crate::config::BundleType;
use crate::dep_graph::ModuleKind;

/// What every bundle starts with, after the optional isolation wrapper.
pub const SIGNATURE: &str = "let KINSHIP_BUNDLE=";

pub const BUNDLER: &str = "kinship";
pub const BUNDLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Length of the random token guarding segment markers.
pub const BOUNDARY_LEN: usize = 16;

/// The one-line JSON record heading a bundle. Field order is the
/// serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleHeader {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub bundle_type: BundleType,
    #[serde(default)]
    pub expose_require: bool,
    #[serde(default)]
    pub globals: Vec<String>,
    #[serde(default)]
    pub bundler: String,
    #[serde(default)]
    pub bundler_version: String,
    pub boundary: String,
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub id: String,
}

/// A package declaration read back from a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSegment {
    pub id: String,
    pub main_module_id: String,
    pub alias_id: Option<String>,
}

/// A module declaration read back from a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSegment {
    pub id: String,
    pub package_id: Option<String>,
    pub alias_id: Option<String>,
    #[serde(skip)]
    pub kind: ModuleKind,
    pub strict: bool,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "segment", rename_all = "kebab-case")]
pub enum Segment {
    Package(PackageSegment),
    Module(ModuleSegment),
}

impl Segment {
    pub fn id(&self) -> &str {
        match self {
            Segment::Package(package) => &package.id,
            Segment::Module(module) => &module.id,
        }
    }
}
