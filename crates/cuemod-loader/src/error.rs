//! Errors attached to packages during a load.

use cuemod_parse::Pos;

/// A per-package load error.
///
/// These are recorded on the owning [`crate::Package`] and surfaced by the
/// caller; a single bad package never halts the load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// No selected module provides the import path.
    #[error("cannot find module providing package {path}")]
    NoModuleForImport { path: String },

    /// A version-less import path matching several selected majors, none
    /// marked default.
    #[error("ambiguous import {path}: major versions {majors:?} all match and none is default")]
    AmbiguousImport { path: String, majors: Vec<u32> },

    /// Fetching or materialising the containing module failed.
    #[error("cannot fetch module {module}: {message}")]
    Fetch { module: String, message: String },

    /// A source file failed the minimal import parse.
    #[error("{file}: {message}")]
    Parse { file: String, message: String },

    /// A build attribute is malformed.
    #[error("{file}: invalid build attribute: {message}")]
    BadAttribute { file: String, message: String },

    /// More than one `@if` attribute on a single file.
    #[error("{file}: multiple @if attributes (at {first} and {second})")]
    MultipleIfAttributes { file: String, first: Pos, second: Pos },

    /// A malformed import path in a source file.
    #[error("invalid import path {path:?}: {message}")]
    BadImport { path: String, message: String },

    /// An I/O failure reading sources.
    #[error("{path}: {message}")]
    Io { path: String, message: String },

    /// A package with no source files after filtering.
    #[error("no source files for package {path}")]
    EmptyPackage { path: String },

    /// The load's cancellation token was set. Never attached to a package;
    /// propagated verbatim to the caller of [`crate::load`].
    #[error("load cancelled")]
    Cancelled,
}
