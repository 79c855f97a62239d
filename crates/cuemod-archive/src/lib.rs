//! Canonical zip archives for module publication.
//!
//! A module version is published as a deflate zip whose every entry sits
//! under a single top-level directory `<escapedPath>@<version>/`. Three
//! operations share one validator: [`check_files`] partitions a candidate
//! file list, [`create`] writes the canonical archive, and
//! [`check_zip`]/[`unzip`] validate and extract one. Create and unzip are
//! refusal-symmetric: an archive create will not produce, unzip rejects.

pub mod check;
pub mod codec;
pub mod file;

pub use check::{check_files, CheckedFiles, OmitReason};
pub use codec::{check_zip, create, unzip, ZipContents};
pub use file::{DirSource, FileKind, FileMeta, FileSource, MemSource};

/// Maximum total uncompressed size of an archive: 500 MB.
pub const MAX_ZIP_FILE: u64 = 500 << 20;

/// Maximum size of the `cue.mod/module.cue` entry: 128 KB.
pub const MAX_MOD_FILE: u64 = 128 << 10;

/// Maximum size of a `LICENSE` entry at the module root: 16 MB.
pub const MAX_LICENSE: u64 = 16 << 20;

/// Errors from archive validation, creation, and extraction.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("{path}: file is {size} bytes, limit is {limit}")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("{path}: {reason}")]
    PathInvalid { path: String, reason: String },

    #[error("{path}: duplicate path after case-folding")]
    DuplicatePath { path: String },

    #[error("archive is {size} bytes uncompressed, limit is {limit}")]
    TotalTooLarge { size: u64, limit: u64 },

    #[error("{path}: nested module below the archive root")]
    NestedSubmodule { path: String },

    #[error("{path}: not a regular file")]
    NonRegular { path: String },

    #[error("cue.mod/module.cue not found at archive root")]
    MissingManifest,

    #[error("manifest declares module {declared:?}, archive is for {expected:?}")]
    ManifestMismatch { declared: String, expected: String },

    #[error("{path}: declared size {declared} but read {actual} bytes")]
    SizeMismatch {
        path: String,
        declared: u64,
        actual: u64,
    },

    #[error("archive missing top-level directory {prefix:?}: entry {path:?}")]
    BadPrefix { prefix: String, path: String },

    #[error(transparent)]
    Manifest(#[from] cuemod_module::ModuleError),

    #[error(transparent)]
    Zip(#[from] ::zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
