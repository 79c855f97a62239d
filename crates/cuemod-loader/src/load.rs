//! The load algorithm.
//!
//! A bounded pool of workers drains a queue of package-load tasks. Each
//! task resolves its import path to a containing module, enumerates the
//! package's source directories (leaf plus qualifying ancestors), runs the
//! minimal import parse over candidate files, applies the build-attribute
//! filter, and enqueues the union of imports as fresh tasks. Flag bits
//! propagate monotonically as tasks complete, so the final flag set is
//! independent of scheduling.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use cuemod_module::{ImportPath, ModulePath, ModuleVersion};
use cuemod_parse::SourceFilePrefix;
use cuemod_resolve::{ModuleForImport, Selected};
use tracing::trace;

use crate::error::LoadError;
use crate::fs::{OsFs, SourceFs};
use crate::pkg::{Flags, Package, Packages};
use crate::queue::{CancelToken, Pending};
use crate::tags::TagFilter;

/// How an import path resolved against the selected requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// First path element carries no dot: a standard-library package, not
    /// ours to load.
    Stdlib,
    /// The import lives in the main module.
    Main,
    /// The import lives in the given selected dependency.
    Dep(ModuleVersion),
    /// A version-less path matching several selected majors with no
    /// default entry.
    Ambiguous { majors: Vec<u32> },
    /// No selected module provides the path.
    Unresolved,
}

/// Maps a module version to its materialised root directory.
///
/// Materialisation may hit the registry, so it takes the load's
/// cancellation token; a cancelled locate returns [`LoadError::Cancelled`].
pub trait ModuleLocator: Send + Sync {
    fn module_root(
        &self,
        mv: &ModuleVersion,
        cancel: &CancelToken,
    ) -> std::result::Result<PathBuf, LoadError>;
}

impl ModuleLocator for cuemod_cache::Cache {
    fn module_root(
        &self,
        mv: &ModuleVersion,
        cancel: &CancelToken,
    ) -> std::result::Result<PathBuf, LoadError> {
        self.fetch(mv, cancel).map(|c| c.dir).map_err(|e| match e {
            cuemod_cache::CacheError::Cancelled => LoadError::Cancelled,
            other => LoadError::Fetch {
                module: mv.to_string(),
                message: other.to_string(),
            },
        })
    }
}

/// A locator over a fixed set of already-materialised module roots.
#[derive(Debug, Default)]
pub struct FixedLocator {
    roots: HashMap<String, PathBuf>,
}

impl FixedLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mv: &ModuleVersion, root: impl Into<PathBuf>) -> &mut Self {
        self.roots.insert(mv.to_string(), root.into());
        self
    }
}

impl ModuleLocator for FixedLocator {
    fn module_root(
        &self,
        mv: &ModuleVersion,
        _cancel: &CancelToken,
    ) -> std::result::Result<PathBuf, LoadError> {
        self.roots
            .get(&mv.to_string())
            .cloned()
            .ok_or_else(|| LoadError::Fetch {
                module: mv.to_string(),
                message: "module not materialised".to_string(),
            })
    }
}

/// The main module being loaded: its path and on-disk root.
#[derive(Debug, Clone)]
pub struct MainModule {
    pub path: Option<ModulePath>,
    pub root: PathBuf,
}

/// Input to [`load`].
pub struct LoadConfig {
    pub main: MainModule,
    /// The closed requirement selection imports resolve against.
    pub selected: Arc<Selected>,
    pub locator: Arc<dyn ModuleLocator>,
    pub fs: Arc<dyn SourceFs>,
    pub tags: TagFilter,
    /// Source file suffix, normally `.cue`.
    pub file_suffix: String,
    pub cancel: CancelToken,
    /// Worker-pool size; defaults to the available parallelism.
    pub workers: usize,
}

impl LoadConfig {
    pub fn new(
        main: MainModule,
        selected: Arc<Selected>,
        locator: Arc<dyn ModuleLocator>,
    ) -> LoadConfig {
        LoadConfig {
            main,
            selected,
            locator,
            fs: Arc::new(OsFs),
            tags: TagFilter::default(),
            file_suffix: ".cue".to_string(),
            cancel: CancelToken::new(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// Resolve an import path to its canonical form and containing module.
pub fn resolve_import(selected: &Selected, ip: &ImportPath) -> (String, Resolution) {
    if ip.is_stdlib_like() {
        return (ip.base_path().to_string(), Resolution::Stdlib);
    }
    match selected.module_for_import(ip.base_path(), ip.major()) {
        Some(ModuleForImport::Main(path)) => {
            let canonical = match path.major() {
                Some(m) => ip.with_major(m).canonical(),
                None => ip.canonical(),
            };
            (canonical, Resolution::Main)
        }
        Some(ModuleForImport::Dependency(mv)) => {
            let major = mv.path().major().unwrap_or_else(|| mv.version().major());
            (ip.with_major(major).canonical(), Resolution::Dep(mv.clone()))
        }
        Some(ModuleForImport::Ambiguous { majors, .. }) => {
            (ip.canonical(), Resolution::Ambiguous { majors })
        }
        None => (ip.canonical(), Resolution::Unresolved),
    }
}

enum Job {
    Load(Arc<Package>),
    Quit,
}

/// Load the packages named by `roots` plus their transitive imports.
///
/// Cancellation propagates verbatim: a load whose token is set while work
/// remains fails with [`LoadError::Cancelled`] rather than returning a
/// partially-loaded graph; the caller re-issues the load to complete it.
pub fn load(cfg: &LoadConfig, roots: &[ImportPath]) -> Result<Packages, LoadError> {
    let packages = Packages::new();
    let pending = Pending::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let loader = Loader {
        cfg,
        packages: &packages,
        pending: &pending,
        tx,
    };

    std::thread::scope(|scope| {
        let workers = cfg.workers.max(1);
        for _ in 0..workers {
            let rx = rx.clone();
            let worker = loader.clone();
            scope.spawn(move || loop {
                match rx.recv() {
                    Ok(Job::Load(pkg)) => {
                        if !worker.cfg.cancel.is_cancelled() {
                            worker.load_one(&pkg);
                        }
                        worker.pending.dec();
                    }
                    Ok(Job::Quit) | Err(_) => break,
                }
            });
        }

        let mut seeds = roots.to_vec();
        seeds.sort();
        seeds.dedup();
        for ip in &seeds {
            let pkg = loader.add_pkg(ip, Flags::IN_ALL);
            packages.add_root(pkg);
        }

        pending.wait_idle();
        for _ in 0..workers {
            let _ = loader.tx.send(Job::Quit);
        }
    });

    if cfg.cancel.is_cancelled() {
        return Err(LoadError::Cancelled);
    }
    assign_import_stacks(&packages);
    Ok(packages)
}

struct Loader<'a> {
    cfg: &'a LoadConfig,
    packages: &'a Packages,
    pending: &'a Pending,
    tx: Sender<Job>,
}

impl Clone for Loader<'_> {
    fn clone(&self) -> Self {
        Loader {
            cfg: self.cfg,
            packages: self.packages,
            pending: self.pending,
            tx: self.tx.clone(),
        }
    }
}

impl Loader<'_> {
    /// Create-or-get the package for an import path, applying `flags`.
    /// Idempotent per canonical import path; only the creating call
    /// enqueues the load task.
    fn add_pkg(&self, ip: &ImportPath, flags: Flags) -> Arc<Package> {
        let (canonical, resolution) = resolve_import(&self.cfg.selected, ip);
        let candidate = Arc::new(Package::new(canonical, ip.clone(), resolution));
        let (pkg, created) = self.packages.insert_or_get(candidate);
        if !created {
            self.apply_flags(&pkg, flags);
            return pkg;
        }
        match pkg.resolution() {
            Resolution::Stdlib => {
                // Nothing to enumerate; the evaluator owns these.
                self.apply_flags(&pkg, flags.union(Flags::IMPORTS_LOADED));
                pkg.mark_done();
            }
            Resolution::Unresolved => {
                pkg.state.lock().error = Some(LoadError::NoModuleForImport {
                    path: ip.to_string(),
                });
                self.apply_flags(&pkg, flags.union(Flags::IMPORTS_LOADED));
                pkg.mark_done();
            }
            Resolution::Ambiguous { majors } => {
                let majors = majors.clone();
                pkg.state.lock().error = Some(LoadError::AmbiguousImport {
                    path: ip.to_string(),
                    majors,
                });
                self.apply_flags(&pkg, flags.union(Flags::IMPORTS_LOADED));
                pkg.mark_done();
            }
            Resolution::Main | Resolution::Dep(_) => {
                self.apply_flags(&pkg, flags);
                self.pending.inc();
                let _ = self.tx.send(Job::Load(pkg.clone()));
            }
        }
        pkg
    }

    /// Apply flag bits and run the propagation rules.
    ///
    /// Additive only; the final flag set for each package is independent of
    /// scheduling because exactly the thread that completes a transition
    /// performs its propagation.
    fn apply_flags(&self, pkg: &Arc<Package>, flags: Flags) {
        let mut flags = flags;
        if flags.has(Flags::IN_ALL) {
            flags = flags.union(Flags::IS_ROOT);
        }
        if flags.has(Flags::IS_ROOT) {
            flags = flags.union(Flags::FROM_ROOT);
        }
        let old = pkg.set_flags(flags);
        let new = old.union(flags);
        if new == old || !new.has(Flags::IMPORTS_LOADED) {
            return;
        }
        let newly_loaded = !old.has(Flags::IMPORTS_LOADED);
        let prop_in_all = new.has(Flags::IN_ALL) && (!old.has(Flags::IN_ALL) || newly_loaded);
        let prop_from_root =
            new.has(Flags::FROM_ROOT) && (!old.has(Flags::FROM_ROOT) || newly_loaded);
        if !prop_in_all && !prop_from_root {
            return;
        }
        let mut inherit = Flags::NONE;
        if prop_in_all {
            inherit = inherit.union(Flags::IN_ALL);
        }
        if prop_from_root {
            inherit = inherit.union(Flags::FROM_ROOT);
        }
        for dep in pkg.imports() {
            self.apply_flags(&dep, inherit);
        }
    }

    fn load_one(&self, pkg: &Arc<Package>) {
        trace!(package = pkg.canonical(), "loading package");
        match self.do_load(pkg) {
            Ok(()) => {}
            // Cancellation is not a package error: the package keeps its
            // partial state and is not considered loaded.
            Err(LoadError::Cancelled) => {
                pkg.mark_done();
                return;
            }
            Err(err) => {
                let mut state = pkg.state.lock();
                if state.error.is_none() {
                    state.error = Some(err);
                }
            }
        }
        self.apply_flags(pkg, Flags::IMPORTS_LOADED);
        pkg.mark_done();
    }

    fn do_load(&self, pkg: &Arc<Package>) -> Result<(), LoadError> {
        let ip = pkg.import_path().clone();
        let (module_root, module_base) = match pkg.resolution() {
            Resolution::Main => {
                let path = self.cfg.main.path.as_ref().ok_or_else(|| {
                    LoadError::NoModuleForImport {
                        path: ip.to_string(),
                    }
                })?;
                (self.cfg.main.root.clone(), path.base_path().to_string())
            }
            Resolution::Dep(mv) => {
                let root = self.cfg.locator.module_root(mv, &self.cfg.cancel)?;
                pkg.state.lock().module = Some(mv.clone());
                (root, mv.base_path().to_string())
            }
            // Never enqueued as load tasks.
            Resolution::Stdlib | Resolution::Unresolved | Resolution::Ambiguous { .. } => {
                return Ok(())
            }
        };

        let rel = ip
            .base_path()
            .strip_prefix(&module_base)
            .map(|r| r.trim_start_matches('/'))
            .unwrap_or("");
        let leaf = if rel.is_empty() {
            module_root.clone()
        } else {
            module_root.join(rel)
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut imports: BTreeSet<String> = BTreeSet::new();
        let mut first_error: Option<LoadError> = None;
        let record = |err: LoadError, slot: &mut Option<LoadError>| {
            if slot.is_none() {
                *slot = Some(err);
            }
        };

        for dir in self.candidate_dirs(&leaf, &module_root) {
            let entries = self.cfg.fs.list_dir(&dir).map_err(|e| LoadError::Io {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;
            let mut qualifies = false;
            for entry in entries {
                if !entry.is_file || !entry.name.ends_with(&self.cfg.file_suffix) {
                    continue;
                }
                let fpath = dir.join(&entry.name);
                let parsed = match self.parse_prefix(&fpath) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        record(err, &mut first_error);
                        continue;
                    }
                };
                if parsed.package_name.as_deref() != Some(ip.qualifier()) {
                    continue;
                }
                qualifies = true;
                match self
                    .cfg
                    .tags
                    .keep(&fpath.display().to_string(), &parsed.attributes)
                {
                    Ok(true) => {
                        files.push(fpath);
                        imports.extend(parsed.imports.into_iter().map(|i| i.path));
                    }
                    Ok(false) => {}
                    Err(err) => record(err, &mut first_error),
                }
            }
            if qualifies {
                dirs.push(dir);
            }
        }

        if files.is_empty() && first_error.is_none() {
            first_error = Some(LoadError::EmptyPackage {
                path: ip.to_string(),
            });
        }

        // Canonicalise and order imports; processing order across the
        // output graph stays deterministic.
        let mut resolved: Vec<(String, ImportPath)> = Vec::new();
        for import in &imports {
            match ImportPath::parse(import) {
                Ok(dep_ip) => {
                    let (canonical, _) = resolve_import(&self.cfg.selected, &dep_ip);
                    resolved.push((canonical, dep_ip));
                }
                Err(e) => record(
                    LoadError::BadImport {
                        path: import.clone(),
                        message: e.to_string(),
                    },
                    &mut first_error,
                ),
            }
        }
        resolved.sort_by(|a, b| a.0.cmp(&b.0));
        resolved.dedup_by(|a, b| a.0 == b.0);
        let deps: Vec<Arc<Package>> = resolved
            .iter()
            .map(|(_, dep_ip)| self.add_pkg(dep_ip, Flags::NONE))
            .collect();

        let mut state = pkg.state.lock();
        state.dirs = dirs;
        state.files = files;
        state.imports = deps;
        if state.error.is_none() {
            state.error = first_error;
        }
        Ok(())
    }

    /// The leaf directory plus every ancestor strictly below the module
    /// root, stopping at a nested module boundary.
    fn candidate_dirs(&self, leaf: &Path, root: &Path) -> Vec<PathBuf> {
        let mut out = vec![leaf.to_path_buf()];
        let mut dir = leaf.to_path_buf();
        while dir != *root {
            let Some(parent) = dir.parent().map(Path::to_path_buf) else {
                break;
            };
            if parent == *root {
                break;
            }
            if self.dir_contains_dir(&parent, "cue.mod") {
                break;
            }
            out.push(parent.clone());
            dir = parent;
        }
        out
    }

    fn dir_contains_dir(&self, dir: &Path, name: &str) -> bool {
        self.cfg
            .fs
            .list_dir(dir)
            .map(|entries| entries.iter().any(|e| !e.is_file && e.name == name))
            .unwrap_or(false)
    }

    fn parse_prefix(&self, path: &Path) -> Result<SourceFilePrefix, LoadError> {
        if let Some(cached) = self.cfg.fs.cached_imports(path) {
            return cached.map_err(|e| LoadError::Parse {
                file: path.display().to_string(),
                message: e.to_string(),
            });
        }
        let bytes = self.cfg.fs.read_file(path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        cuemod_parse::parse_imports(&bytes).map_err(|e| LoadError::Parse {
            file: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

/// Breadth-first from the roots: record one predecessor per package so
/// diagnostics can render a minimal import stack.
fn assign_import_stacks(packages: &Packages) {
    let mut queue: VecDeque<Arc<Package>> = VecDeque::new();
    let mut seen: HashSet<String> = HashSet::new();
    for root in packages.roots() {
        seen.insert(root.canonical().to_string());
        queue.push_back(root);
    }
    while let Some(pkg) = queue.pop_front() {
        for dep in pkg.imports() {
            if seen.insert(dep.canonical().to_string()) {
                dep.state.lock().stack_pred = Some(pkg.canonical().to_string());
                queue.push_back(dep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuemod_module::{Manifest, ParseMode};
    use cuemod_resolve::{RequirementSource, Requirements};

    struct NoReqs;
    impl RequirementSource for NoReqs {
        fn requirements_of(
            &self,
            _mv: &ModuleVersion,
            _cancel: &CancelToken,
        ) -> cuemod_resolve::Result<Vec<ModuleVersion>> {
            Ok(Vec::new())
        }
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// A main module rooted in a temp dir, with a selection closed over
    /// its manifest.
    fn config_for(root: &Path) -> LoadConfig {
        let manifest_bytes =
            std::fs::read(root.join("cue.mod/module.cue")).expect("manifest present");
        let manifest = Manifest::parse(&manifest_bytes, ParseMode::NonStrict).unwrap();
        let requirements = Requirements::from_manifest(&manifest);
        let selected = requirements.select(&NoReqs, &CancelToken::new()).unwrap();
        LoadConfig::new(
            MainModule {
                path: manifest.module().cloned(),
                root: root.to_path_buf(),
            },
            Arc::new(selected),
            Arc::new(FixedLocator::new()),
        )
    }

    fn ip(s: &str) -> ImportPath {
        ImportPath::parse(s).unwrap()
    }

    #[test]
    fn loads_single_package() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(dir.path(), "a/a.cue", "package a\nx: 1\n");

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/a")]).unwrap();

        let pkg = packages.package("main.example/m/a@v0:a").unwrap();
        assert!(pkg.error().is_none(), "{:?}", pkg.error());
        assert_eq!(pkg.files().len(), 1);
        assert!(pkg.flags().has(Flags::IMPORTS_LOADED));
        assert!(pkg.flags().has(Flags::IN_ALL));
        assert!(pkg.flags().has(Flags::IS_ROOT));
        assert!(pkg.flags().has(Flags::FROM_ROOT));
    }

    #[test]
    fn ancestor_inheritance() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(dir.path(), "a/b/c/x.cue", "package p\nx: 1\n");
        write(dir.path(), "a/y.cue", "package p\ny: 2\n");
        // a/b has no file with package p, so it is filtered out.
        write(dir.path(), "a/b/other.cue", "package q\n");

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/a/b/c:p")]).unwrap();

        let pkg = packages.package("main.example/m/a/b/c@v0:p").unwrap();
        assert!(pkg.error().is_none(), "{:?}", pkg.error());
        let dirs = pkg.dirs();
        assert_eq!(
            dirs,
            vec![dir.path().join("a/b/c"), dir.path().join("a")],
            "leaf first, then qualifying ancestors"
        );
        let files = pkg.files();
        assert_eq!(
            files,
            vec![dir.path().join("a/b/c/x.cue"), dir.path().join("a/y.cue")]
        );
    }

    #[test]
    fn imports_link_packages() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(
            dir.path(),
            "x/x.cue",
            "package x\nimport \"main.example/m/y\"\nv: 1\n",
        );
        write(dir.path(), "y/y.cue", "package y\nw: 2\n");

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/x")]).unwrap();

        let x = packages.package("main.example/m/x@v0:x").unwrap();
        let imports = x.imports();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].canonical(), "main.example/m/y@v0:y");

        let y = packages.package("main.example/m/y@v0:y").unwrap();
        assert!(y.error().is_none());
        // Flags propagated along the forward edge.
        assert!(y.flags().has(Flags::IN_ALL));
        assert!(y.flags().has(Flags::FROM_ROOT));
        // y was not itself a requested root.
        assert_eq!(packages.roots().len(), 1);
    }

    #[test]
    fn stdlib_imports_classified_and_stopped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(
            dir.path(),
            "x/x.cue",
            "package x\nimport \"strings\"\nv: 1\n",
        );

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/x")]).unwrap();

        let std_pkg = packages.package("strings").unwrap();
        assert!(std_pkg.is_stdlib());
        assert!(std_pkg.error().is_none());
        assert!(std_pkg.flags().has(Flags::IMPORTS_LOADED));
        assert!(std_pkg.files().is_empty());
    }

    #[test]
    fn unresolved_import_error_with_stack() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(
            dir.path(),
            "x/x.cue",
            "package x\nimport \"unknown.example/pkg\"\nv: 1\n",
        );

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/x")]).unwrap();

        let bad = packages.package("unknown.example/pkg:pkg").unwrap();
        assert!(matches!(
            bad.error(),
            Some(LoadError::NoModuleForImport { .. })
        ));

        let lines = packages.error_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("unknown.example/pkg"));
        assert!(lines[0].contains("imported by main.example/m/x"));
    }

    #[test]
    fn build_attribute_filter_applies() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(dir.path(), "p/keep.cue", "package p\na: 1\n");
        write(dir.path(), "p/skip.cue", "@ignore()\npackage p\nb: 2\n");
        write(dir.path(), "p/prod.cue", "@if(prod)\npackage p\nc: 3\n");

        let mut cfg = config_for(dir.path());
        cfg.tags = TagFilter::from_tags(["prod"]);
        let packages = load(&cfg, &[ip("main.example/m/p")]).unwrap();
        let pkg = packages.package("main.example/m/p@v0:p").unwrap();
        let names: Vec<String> = pkg
            .files()
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["keep.cue", "prod.cue"]);

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/p")]).unwrap();
        let pkg = packages.package("main.example/m/p@v0:p").unwrap();
        let names: Vec<String> = pkg
            .files()
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["keep.cue"]);
    }

    #[test]
    fn two_if_attributes_attach_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(
            dir.path(),
            "p/bad.cue",
            "@if(a)\n@if(b)\npackage p\nx: 1\n",
        );

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/p")]).unwrap();
        let pkg = packages.package("main.example/m/p@v0:p").unwrap();
        assert!(matches!(
            pkg.error(),
            Some(LoadError::MultipleIfAttributes { .. })
        ));
    }

    #[test]
    fn missing_package_directory_is_empty_package() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/nothing")]).unwrap();
        let pkg = packages
            .package("main.example/m/nothing@v0:nothing")
            .unwrap();
        assert!(matches!(pkg.error(), Some(LoadError::EmptyPackage { .. })));
    }

    #[test]
    fn dependency_modules_load_through_locator() {
        let main_dir = tempfile::tempdir().unwrap();
        let dep_dir = tempfile::tempdir().unwrap();
        write(
            main_dir.path(),
            "cue.mod/module.cue",
            "module: \"main.example/m@v0\"\ndeps: {\n\t\"dep.example/d@v1\": {\n\t\tv: \"v1.2.0\"\n\t}\n}\n",
        );
        write(
            main_dir.path(),
            "x/x.cue",
            "package x\nimport \"dep.example/d/lib\"\nv: 1\n",
        );
        write(
            dep_dir.path(),
            "cue.mod/module.cue",
            "module: \"dep.example/d@v1\"\n",
        );
        write(dep_dir.path(), "lib/lib.cue", "package lib\nl: 1\n");

        let mut cfg = config_for(main_dir.path());
        let dep = ModuleVersion::parse("dep.example/d@v1", "v1.2.0").unwrap();
        let mut locator = FixedLocator::new();
        locator.insert(&dep, dep_dir.path());
        cfg.locator = Arc::new(locator);

        let packages = load(&cfg, &[ip("main.example/m/x")]).unwrap();
        let lib = packages.package("dep.example/d/lib@v1:lib").unwrap();
        assert!(lib.error().is_none(), "{:?}", lib.error());
        assert_eq!(lib.module().unwrap().to_string(), "dep.example/d@v1.2.0");
        assert_eq!(lib.files(), vec![dep_dir.path().join("lib/lib.cue")]);
    }

    #[test]
    fn from_root_equals_reachability() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(
            dir.path(),
            "a/a.cue",
            "package a\nimport \"main.example/m/b\"\n",
        );
        write(
            dir.path(),
            "b/b.cue",
            "package b\nimport \"main.example/m/c\"\n",
        );
        write(dir.path(), "c/c.cue", "package c\nz: 1\n");
        // Not reachable from the root.
        write(dir.path(), "island/i.cue", "package island\n");

        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/a")]).unwrap();

        for canonical in [
            "main.example/m/a@v0:a",
            "main.example/m/b@v0:b",
            "main.example/m/c@v0:c",
        ] {
            let pkg = packages.package(canonical).unwrap();
            assert!(pkg.flags().has(Flags::FROM_ROOT), "{canonical}");
            assert!(pkg.flags().has(Flags::IN_ALL), "{canonical}");
        }
        assert!(packages.package("main.example/m/island@v0:island").is_none());
    }

    #[test]
    fn load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(
            dir.path(),
            "a/a.cue",
            "package a\nimport (\n\t\"main.example/m/b\"\n\t\"strings\"\n)\n",
        );
        write(dir.path(), "b/b.cue", "package b\n");

        let cfg = config_for(dir.path());
        let snapshot = |packages: &Packages| -> Vec<(String, u32, Vec<PathBuf>, Vec<String>)> {
            packages
                .all()
                .iter()
                .map(|p| {
                    (
                        p.canonical().to_string(),
                        p.flags().0,
                        p.files(),
                        p.imports()
                            .iter()
                            .map(|i| i.canonical().to_string())
                            .collect(),
                    )
                })
                .collect()
        };
        let first = snapshot(&load(&cfg, &[ip("main.example/m/a")]).unwrap());
        for _ in 0..5 {
            let again = snapshot(&load(&cfg, &[ip("main.example/m/a")]).unwrap());
            assert_eq!(first, again);
        }
    }

    #[test]
    fn cancelled_load_propagates_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(dir.path(), "a/a.cue", "package a\n");

        let cfg = config_for(dir.path());
        cfg.cancel.cancel();
        assert!(matches!(
            load(&cfg, &[ip("main.example/m/a")]),
            Err(LoadError::Cancelled)
        ));

        // A fresh token completes the re-issued load.
        let cfg = config_for(dir.path());
        let packages = load(&cfg, &[ip("main.example/m/a")]).unwrap();
        let pkg = packages.package("main.example/m/a@v0:a").unwrap();
        assert!(pkg.flags().has(Flags::IMPORTS_LOADED));
    }

    #[test]
    fn duplicate_roots_collapse() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(dir.path(), "a/a.cue", "package a\n");

        let cfg = config_for(dir.path());
        let packages = load(
            &cfg,
            &[ip("main.example/m/a"), ip("main.example/m/a")],
        )
        .unwrap();
        assert_eq!(packages.roots().len(), 1);
    }
}
