//! Content-addressed local cache of module archives.
//!
//! Stores downloaded archives and their extracted trees under a configured
//! root, at most one materialised copy per (path, version) pair. All path
//! components are case-escaped.
//!
//! Layout:
//! ```text
//! <root>/
//!   download/<escapedPath>/@v/
//!     <version>.zip       — the raw archive (atomic rename from a temp)
//!     <version>.ziphash   — content digest of the zip
//!     <version>.mod       — the extracted cue.mod/module.cue
//!     <version>.lock      — advisory lock serialising builds of this key
//!   <escapedPath>@<version>/   — the unpacked tree
//! ```
//!
//! Once materialised, reads take no lock; an archive is immutable for the
//! lifetime of the cache.

mod lock;

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cuemod_module::{escape_path, Manifest, ModulePath, ModuleVersion, ParseMode, Version};
use cuemod_registry::{digest_of, RegistryError};
use parking_lot::Mutex;
use tracing::{debug, warn};

pub use cuemod_registry::CancelToken;

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A re-downloaded archive disagrees with the digest recorded when the
    /// version was first cached; the registry served different content for
    /// an immutable version.
    #[error("{module}: archive digest {actual} does not match recorded {expected}")]
    DigestMismatch {
        module: String,
        expected: String,
        actual: String,
    },

    /// Could not acquire the per-key lock within the configured timeout.
    #[error("timed out waiting for cache lock {path}", path = .path.display())]
    LockTimeout { path: PathBuf },

    /// The cache root is not writable.
    #[error("permission denied writing cache entry {path}", path = .path.display())]
    PermissionDenied { path: PathBuf },

    /// The operation's cancellation token was set. Propagated verbatim to
    /// the caller; no partial artifact is left behind.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Registry(#[from] cuemod_registry::RegistryError),

    #[error(transparent)]
    Archive(#[from] cuemod_archive::ArchiveError),

    #[error(transparent)]
    Module(#[from] cuemod_module::ModuleError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Whether the underlying cause is the registry's not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Registry(e) if e.is_not_found())
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Where module content comes from on a cache miss.
pub trait ModuleSource: Send + Sync {
    /// The zip archive for a module version.
    fn zip(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<Vec<u8>>;

    /// The raw `cue.mod/module.cue` bytes for a module version.
    fn module_file(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<Vec<u8>>;
}

fn from_registry(err: RegistryError) -> CacheError {
    match err {
        RegistryError::Cancelled => CacheError::Cancelled,
        other => CacheError::Registry(other),
    }
}

impl ModuleSource for cuemod_registry::Client {
    fn zip(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<Vec<u8>> {
        self.get_module(mv, cancel)
            .and_then(|handle| handle.zip())
            .map_err(from_registry)
    }

    fn module_file(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<Vec<u8>> {
        self.get_module(mv, cancel)
            .and_then(|handle| handle.module_file())
            .map_err(from_registry)
    }
}

/// A materialised module version.
#[derive(Debug, Clone)]
pub struct CachedModule {
    /// The module root directory of the unpacked tree.
    pub dir: PathBuf,
    pub zip_path: PathBuf,
    pub manifest_path: PathBuf,
}

/// The direct-requirement summary the version selector consumes.
///
/// Satisfied entirely from `.mod` files; after the first fetch of a version
/// the registry is never touched again for this.
#[derive(Debug, Clone)]
pub struct ModSummary {
    pub module: ModuleVersion,
    /// Sorted direct requirements.
    pub requires: Vec<ModuleVersion>,
}

/// A content-addressed cache rooted at a directory.
pub struct Cache {
    root: PathBuf,
    source: Arc<dyn ModuleSource>,
    lock_timeout: Duration,
    // In-process dedup: one build per key inside this process, so parallel
    // loader workers do not contend on the file lock.
    keys: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Cache {
    /// Create a cache rooted at `root`, fetching misses from `source`.
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn ModuleSource>) -> Cache {
        Cache {
            root: root.into(),
            source,
            lock_timeout: Duration::from_secs(30),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Override the per-key lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Cache {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn download_dir(&self, path: &ModulePath) -> PathBuf {
        self.root
            .join("download")
            .join(escape_path(path.base_path()))
            .join("@v")
    }

    fn zip_path(&self, mv: &ModuleVersion) -> PathBuf {
        self.download_dir(mv.path())
            .join(format!("{}.zip", mv.version()))
    }

    fn ziphash_path(&self, mv: &ModuleVersion) -> PathBuf {
        self.download_dir(mv.path())
            .join(format!("{}.ziphash", mv.version()))
    }

    fn mod_path(&self, mv: &ModuleVersion) -> PathBuf {
        self.download_dir(mv.path())
            .join(format!("{}.mod", mv.version()))
    }

    fn lock_path(&self, mv: &ModuleVersion) -> PathBuf {
        self.download_dir(mv.path())
            .join(format!("{}.lock", mv.version()))
    }

    fn unpacked_dir(&self, mv: &ModuleVersion) -> PathBuf {
        self.root.join(mv.escaped_dir())
    }

    fn key_lock(&self, mv: &ModuleVersion) -> Arc<Mutex<()>> {
        self.keys
            .lock()
            .entry(mv.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetch a module version, materialising it on first use.
    ///
    /// Subsequent calls return the cached copy without locking. A corrupt
    /// entry is rewritten in place rather than reported. Cancellation is
    /// observed while waiting for the key lock and around the download.
    pub fn fetch(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<CachedModule> {
        if let Some(cached) = self.materialised(mv)? {
            return Ok(cached);
        }
        check_cancel(cancel)?;

        let key = self.key_lock(mv);
        let _in_process = key.lock();
        lock::with_file_lock(&self.lock_path(mv), self.lock_timeout, cancel, || {
            // A competing process may have finished the build while this
            // one waited; re-read instead of redoing the work.
            if let Some(cached) = self.materialised(mv)? {
                return Ok(cached);
            }
            self.build(mv, cancel)
        })
    }

    /// The materialised entry, if whole. A damaged entry reads as absent so
    /// the caller rebuilds it.
    fn materialised(&self, mv: &ModuleVersion) -> Result<Option<CachedModule>> {
        let zip_path = self.zip_path(mv);
        let hash_path = self.ziphash_path(mv);
        let dir = self.unpacked_dir(mv);
        if !zip_path.is_file() || !hash_path.is_file() {
            return Ok(None);
        }
        let recorded = std::fs::read_to_string(&hash_path)?;
        let data = std::fs::read(&zip_path)?;
        if digest_of(&data) != recorded.trim() {
            warn!(module = %mv, "cached archive is corrupt, rewriting");
            return Ok(None);
        }
        if !dir.join("cue.mod").join("module.cue").is_file() {
            return Ok(None);
        }
        Ok(Some(CachedModule {
            dir,
            zip_path,
            manifest_path: self.mod_path(mv),
        }))
    }

    /// Download, verify, and unpack one version. Runs under the key lock.
    fn build(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<CachedModule> {
        check_cancel(cancel)?;
        debug!(module = %mv, "fetching module archive");
        let zip = self.source.zip(mv, cancel)?;
        check_cancel(cancel)?;
        let digest = digest_of(&zip);

        // An existing hash pins the content of this immutable version.
        let hash_path = self.ziphash_path(mv);
        if let Ok(recorded) = std::fs::read_to_string(&hash_path) {
            let recorded = recorded.trim();
            if !recorded.is_empty() && recorded != digest {
                return Err(CacheError::DigestMismatch {
                    module: mv.to_string(),
                    expected: recorded.to_string(),
                    actual: digest,
                });
            }
        }

        let contents = cuemod_archive::check_zip(Cursor::new(&zip), mv)?;

        let dl_dir = self.download_dir(mv.path());
        std::fs::create_dir_all(&dl_dir).map_err(|e| self.write_err(&dl_dir, e))?;
        write_atomic(&dl_dir, &self.zip_path(mv), &zip)?;
        write_atomic(&dl_dir, &self.mod_path(mv), &contents.manifest)?;
        write_atomic(&dl_dir, &hash_path, digest.as_bytes())?;

        // Unpack into a temp dir and rename into place so a failed extract
        // leaves no partial tree.
        let unpacked = self.unpacked_dir(mv);
        if let Some(parent) = unpacked.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.write_err(parent, e))?;
        }
        let tmp = tempfile::tempdir_in(&self.root)?;
        cuemod_archive::unzip(tmp.path(), Cursor::new(&zip), mv)?;
        match std::fs::rename(tmp.path(), &unpacked) {
            Ok(()) => {
                // Keep the temp dir from deleting the renamed tree.
                std::mem::forget(tmp);
            }
            Err(_) if unpacked.is_dir() => {
                // A competing build won the rename.
            }
            Err(e) => return Err(self.write_err(&unpacked, e)),
        }

        Ok(CachedModule {
            dir: unpacked,
            zip_path: self.zip_path(mv),
            manifest_path: self.mod_path(mv),
        })
    }

    fn write_err(&self, path: &Path, e: std::io::Error) -> CacheError {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            CacheError::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            CacheError::Io(e)
        }
    }

    /// The raw manifest bytes for a version, fetching only the module file
    /// layer when the archive itself has not been needed yet.
    pub fn module_file(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<Vec<u8>> {
        let path = self.mod_path(mv);
        if path.is_file() {
            return Ok(std::fs::read(&path)?);
        }
        check_cancel(cancel)?;
        let key = self.key_lock(mv);
        let _in_process = key.lock();
        lock::with_file_lock(&self.lock_path(mv), self.lock_timeout, cancel, || {
            if path.is_file() {
                return Ok(std::fs::read(&path)?);
            }
            debug!(module = %mv, "fetching module file");
            let data = self.source.module_file(mv, cancel)?;
            let dir = self.download_dir(mv.path());
            std::fs::create_dir_all(&dir).map_err(|e| self.write_err(&dir, e))?;
            write_atomic(&dir, &path, &data)?;
            Ok(data)
        })
    }

    /// The direct-requirement summary for a version, from `.mod` data only.
    pub fn summary(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<ModSummary> {
        let data = self.module_file(mv, cancel)?;
        let manifest = match Manifest::parse(&data, ParseMode::Strict) {
            Ok(m) => m,
            Err(_) => Manifest::parse(&data, ParseMode::Legacy)?,
        };
        Ok(ModSummary {
            module: mv.clone(),
            requires: manifest.direct_requirements(),
        })
    }

    /// Locally materialised versions of a module, sorted by semver. Never
    /// touches the registry.
    pub fn cached_versions(&self, path: &ModulePath) -> Result<Vec<Version>> {
        let dir = self.download_dir(path);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".zip") {
                if let Ok(v) = Version::parse(stem) {
                    versions.push(v);
                }
            }
        }
        versions.sort();
        Ok(versions)
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CacheError::Cancelled);
    }
    Ok(())
}

/// Write via a temp file in `dir` and atomically rename over `path`.
fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, data)?;
    tmp.persist(path).map_err(|e| CacheError::Io(e.error))?;
    Ok(())
}
