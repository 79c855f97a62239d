//! Packages and their atomic load-time flags.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cuemod_module::{ImportPath, ModuleVersion};
use parking_lot::{Condvar, Mutex};

use crate::error::LoadError;
use crate::load::Resolution;

/// Monotone per-package flag bits.
///
/// Flags are additive: setting a set bit is a no-op and no bit is ever
/// cleared, so readers race-free off a single atomic word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags(pub(crate) u32);

impl Flags {
    /// The package is in the transitive import closure of the roots.
    pub const IN_ALL: Flags = Flags(1 << 0);
    /// The package matches a root pattern.
    pub const IS_ROOT: Flags = Flags(1 << 1);
    /// The package is reachable from a root by forward import edges.
    pub const FROM_ROOT: Flags = Flags(1 << 2);
    /// The package's own imports have been enumerated and enqueued.
    pub const IMPORTS_LOADED: Flags = Flags(1 << 3);

    pub const NONE: Flags = Flags(0);

    pub fn has(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

/// The mutable portion of a package, written by its single load task.
#[derive(Debug, Default)]
pub(crate) struct PkgState {
    pub module: Option<ModuleVersion>,
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub imports: Vec<Arc<Package>>,
    pub error: Option<LoadError>,
    /// One predecessor on a minimal import path from a root; assigned by
    /// the post-pass.
    pub stack_pred: Option<String>,
}

/// One package in a load, identified by its canonical import path.
///
/// Created at most once per canonical import path per load.
pub struct Package {
    canonical: String,
    import_path: ImportPath,
    resolution: Resolution,
    flags: AtomicU32,
    pub(crate) state: Mutex<PkgState>,
    done: Mutex<bool>,
    done_cv: Condvar,
}

impl Package {
    pub(crate) fn new(canonical: String, import_path: ImportPath, resolution: Resolution) -> Self {
        Package {
            canonical,
            import_path,
            resolution,
            flags: AtomicU32::new(0),
            state: Mutex::new(PkgState::default()),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
        }
    }

    /// The canonical import path this package is keyed by.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn import_path(&self) -> &ImportPath {
        &self.import_path
    }

    /// How the import path resolved.
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Whether this is a stdlib-like package (first path element without a
    /// dot).
    pub fn is_stdlib(&self) -> bool {
        matches!(self.resolution, Resolution::Stdlib)
    }

    /// The current flag set.
    pub fn flags(&self) -> Flags {
        Flags(self.flags.load(Ordering::SeqCst))
    }

    /// Set flags, returning the previous set. Monotone union via
    /// compare-and-swap semantics.
    pub(crate) fn set_flags(&self, flags: Flags) -> Flags {
        Flags(self.flags.fetch_or(flags.0, Ordering::SeqCst))
    }

    /// The containing module version, if the package resolved into a
    /// dependency.
    pub fn module(&self) -> Option<ModuleVersion> {
        self.state.lock().module.clone()
    }

    /// Source directories: the leaf plus qualifying ancestors, leaf first.
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.state.lock().dirs.clone()
    }

    /// The source files selected for this package.
    pub fn files(&self) -> Vec<PathBuf> {
        self.state.lock().files.clone()
    }

    /// Direct imports, sorted by canonical import path.
    pub fn imports(&self) -> Vec<Arc<Package>> {
        self.state.lock().imports.clone()
    }

    /// The error attached to this package, if any.
    pub fn error(&self) -> Option<LoadError> {
        self.state.lock().error.clone()
    }

    /// The predecessor on a minimal import path from a root.
    pub fn stack_pred(&self) -> Option<String> {
        self.state.lock().stack_pred.clone()
    }

    pub(crate) fn mark_done(&self) {
        *self.done.lock() = true;
        self.done_cv.notify_all();
    }

    /// Block until this package's load task has finished. A concurrent
    /// second request for the same key waits here for the first's result.
    /// After a cancelled load this may block forever; re-issue the load
    /// instead.
    pub fn wait_loaded(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.done_cv.wait(&mut done);
        }
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("canonical", &self.canonical)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// Every package reached by one load.
#[derive(Debug, Default)]
pub struct Packages {
    pkgs: Mutex<HashMap<String, Arc<Package>>>,
    roots: Mutex<Vec<Arc<Package>>>,
}

impl Packages {
    pub(crate) fn new() -> Packages {
        Packages::default()
    }

    pub(crate) fn insert_or_get(&self, pkg: Arc<Package>) -> (Arc<Package>, bool) {
        let mut pkgs = self.pkgs.lock();
        match pkgs.get(pkg.canonical()) {
            Some(existing) => (existing.clone(), false),
            None => {
                pkgs.insert(pkg.canonical().to_string(), pkg.clone());
                (pkg, true)
            }
        }
    }

    pub(crate) fn add_root(&self, pkg: Arc<Package>) {
        let mut roots = self.roots.lock();
        if !roots.iter().any(|r| r.canonical() == pkg.canonical()) {
            roots.push(pkg);
        }
    }

    /// Look up a package by canonical import path.
    pub fn package(&self, canonical: &str) -> Option<Arc<Package>> {
        self.pkgs.lock().get(canonical).cloned()
    }

    /// All packages, sorted by canonical import path.
    pub fn all(&self) -> Vec<Arc<Package>> {
        let mut out: Vec<Arc<Package>> = self.pkgs.lock().values().cloned().collect();
        out.sort_by(|a, b| a.canonical().cmp(b.canonical()));
        out
    }

    /// The root packages, in root-list order.
    pub fn roots(&self) -> Vec<Arc<Package>> {
        self.roots.lock().clone()
    }

    /// Every attached error, sorted by canonical import path for
    /// deterministic rendering.
    pub fn errors(&self) -> Vec<(String, LoadError)> {
        self.all()
            .into_iter()
            .filter_map(|p| p.error().map(|e| (p.canonical().to_string(), e)))
            .collect()
    }

    /// Render attached errors as `path@version: message` lines with their
    /// minimal import stacks.
    pub fn error_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for pkg in self.all() {
            let Some(err) = pkg.error() else { continue };
            let mut line = match pkg.module() {
                Some(mv) => format!("{}@{}: {err}", pkg.import_path(), mv.version()),
                None => format!("{}: {err}", pkg.import_path()),
            };
            let mut pred = pkg.stack_pred();
            while let Some(p) = pred {
                line.push_str(&format!(", imported by {p}"));
                pred = self.package(&p).and_then(|pp| pp.stack_pred());
            }
            out.push(line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_monotone_unions() {
        let f = Flags::NONE.union(Flags::IN_ALL).union(Flags::IS_ROOT);
        assert!(f.has(Flags::IN_ALL));
        assert!(f.has(Flags::IS_ROOT));
        assert!(!f.has(Flags::FROM_ROOT));
        assert!(f.has(Flags::IN_ALL.union(Flags::IS_ROOT)));
    }

    #[test]
    fn set_flags_returns_previous() {
        let pkg = Package::new(
            "a.com/x@v0:x".to_string(),
            ImportPath::parse("a.com/x@v0").unwrap(),
            Resolution::Unresolved,
        );
        let old = pkg.set_flags(Flags::IN_ALL);
        assert_eq!(old, Flags::NONE);
        let old = pkg.set_flags(Flags::IN_ALL.union(Flags::IMPORTS_LOADED));
        assert!(old.has(Flags::IN_ALL));
        assert!(pkg.flags().has(Flags::IMPORTS_LOADED));
    }

    #[test]
    fn insert_or_get_is_idempotent() {
        let packages = Packages::new();
        let a = Arc::new(Package::new(
            "a.com/x@v0:x".to_string(),
            ImportPath::parse("a.com/x@v0").unwrap(),
            Resolution::Unresolved,
        ));
        let (first, created) = packages.insert_or_get(a.clone());
        assert!(created);
        let dup = Arc::new(Package::new(
            "a.com/x@v0:x".to_string(),
            ImportPath::parse("a.com/x@v0").unwrap(),
            Resolution::Unresolved,
        ));
        let (second, created) = packages.insert_or_get(dup);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn all_is_sorted() {
        let packages = Packages::new();
        for path in ["b.com/y", "a.com/x", "c.com/z"] {
            let pkg = Arc::new(Package::new(
                path.to_string(),
                ImportPath::parse(path).unwrap(),
                Resolution::Unresolved,
            ));
            packages.insert_or_get(pkg);
        }
        let order: Vec<String> = packages
            .all()
            .iter()
            .map(|p| p.canonical().to_string())
            .collect();
        assert_eq!(order, vec!["a.com/x", "b.com/y", "c.com/z"]);
    }
}
