//! The module loader shipped inside every kinship bundle.
//!
//! `RUNTIME_JS` and `PROCESS_JS` are embedded verbatim by the assembler. The
//! [`Registry`] is a Rust rendition of the same loader, used at build time to
//! check that every dependency resolves in the bundle exactly as it did on
//! disk.

pub mod path;
pub mod registry;

pub use registry::{
    Exports, LoadState, Loader, ModuleContext, ModuleRecord, PackageRecord, Registry,
    RuntimeError, RuntimeResult,
};

/// Browser-side loader: `Package.prepare`, `Module.prepare` and `require`.
pub const RUNTIME_JS: &str = include_str!("../js/runtime.js");

/// Minimal `process` global for modules that expect one.
pub const PROCESS_JS: &str = include_str!("../js/process.js");
