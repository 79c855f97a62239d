//! Error types for module identity and manifest parsing.

/// Errors from module path, version, and manifest handling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModuleError {
    /// A malformed module or import path.
    #[error("invalid module path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A malformed or non-canonical version string.
    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    /// A version whose major number disagrees with its path's major suffix.
    #[error("version {version} does not match major version suffix of {path}")]
    MismatchedMajor { path: String, version: String },

    /// A manifest field that fails schema validation. `field` is the dotted
    /// path to the offending key, e.g. `deps."foo.com/bar@v1".v`.
    #[error("{field}: {message}")]
    ManifestField { field: String, message: String },

    /// Two majors of the same base path both marked `default: true`.
    #[error(
        "multiple default major versions for module {base:?}: {first} and {second}"
    )]
    DefaultMajorConflict {
        base: String,
        first: String,
        second: String,
    },

    /// A syntax error in the manifest source.
    #[error("manifest syntax: {0}")]
    Syntax(#[from] cuemod_parse::ParseError),
}

/// Result type alias for module operations.
pub type Result<T> = std::result::Result<T, ModuleError>;
