//! Module identity for the CUE package system.
//!
//! A module is named by a slash-separated path carrying a major-version
//! suffix (`example.com/foo@v1`), versioned by canonical semver strings
//! (`v1.2.3`), and described by a `cue.mod/module.cue` manifest. This crate
//! owns those three notions and the invariants that tie them together; the
//! registry, cache, and loader crates all speak in its types.

pub mod error;
pub mod manifest;
pub mod path;
pub mod version;

pub use error::{ModuleError, Result};
pub use manifest::{Dep, Manifest, ParseMode, Source};
pub use path::{check_path_element, escape_path, unescape_path, ImportPath, ModulePath};
pub use version::{ModuleVersion, Version};
