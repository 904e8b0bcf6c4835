//! kinship: bundles CommonJS modules and their `node_modules` dependencies
//! into one self-contained browser script, and reads such bundles back.

pub mod analysis;
pub mod assembler;
pub mod bundle;
pub mod config;
pub mod dep_graph;
pub mod error;
pub mod inputs;
pub mod logging;
pub mod npm_resolver;
pub mod package_json;
pub mod reader;
pub mod relaxed_json;
pub mod resolver;
pub mod templates;

pub use analysis::{analyse, Analysis, ModuleSummary, PackageSummary};
pub use assembler::{assemble, generate_boundary, pack};
pub use bundle::{BundleHeader, ModuleSegment, PackageEntry, PackageSegment, Segment};
pub use config::{BundleType, PackOptions, CORE_DIR_ENV};
pub use dep_graph::{Module, ModuleGraph, ModuleKind, Package};
pub use error::{KinshipError, Result};
pub use reader::{extract, info, BundleReader};
pub use resolver::{ModuleResolver, PackageTarget, Resolution};
