//! Registry error types.

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The requested repository, tag, or blob does not exist. This is a
    /// typed sentinel; callers test for it with
    /// [`RegistryError::is_not_found`] and fall back to cached content or
    /// report the path.
    #[error("{what} not found in repository {repo:?}")]
    NotFound { repo: String, what: String },

    /// The module path falls under a prefix configured as `none`.
    #[error("imports under {prefix:?} are disabled: cannot resolve {path:?}")]
    DisabledPrefix { prefix: String, path: String },

    /// A malformed or contradictory registry configuration.
    #[error("invalid registry configuration: {message}")]
    Config { message: String },

    /// A manifest that is not a well-formed module artifact.
    #[error("{repo}:{tag}: {message}")]
    BadManifest {
        repo: String,
        tag: String,
        message: String,
    },

    /// Content fetched from a registry disagrees with its digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// A transport-level failure talking to a remote registry.
    #[error("registry transport: {message}")]
    Transport { message: String },

    /// The operation's cancellation token was set. Propagated verbatim to
    /// the caller; never attached to partial results.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Archive(#[from] cuemod_archive::ArchiveError),

    #[error(transparent)]
    Module(#[from] cuemod_module::ModuleError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Whether this error is the not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
