//! Incremental reload engine backing editor views of a module.
//!
//! A [`ViewModule`] owns the parsed manifest, the packages of interest, a
//! dirty-file set, and a status. File edits mark things dirty;
//! `reload_module` refreshes the manifest and requirement selection;
//! `reload_packages` reloads exactly the dirty portion of the package
//! graph, following inverted import edges so importers of changed packages
//! are refreshed too, and iterates to a fixed point when files move
//! between packages.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cuemod_loader::{
    load, CancelToken, LoadConfig, LoadError, MainModule, ModuleLocator, Packages, TagFilter,
};
use cuemod_module::{ImportPath, Manifest, ModulePath, ParseMode};
use cuemod_parse::parse_imports;
use cuemod_resolve::{RequirementSource, Requirements, ResolveError, Selected};
use tracing::debug;

/// The lifecycle status of a module or package in a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Loaded and current.
    Splendid,
    /// Something it owns changed on disk since the last load.
    Dirty,
    /// The manifest cannot be read or parsed.
    Deleted,
}

/// Errors from view operations.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    /// `reload_packages` requires a splendid module.
    #[error("module is {status:?}; reload the module first")]
    ModuleNotSplendid { status: Status },

    /// A whole-load failure; cancellation arrives here verbatim as
    /// `Load(LoadError::Cancelled)`.
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for view operations.
pub type Result<T> = std::result::Result<T, ViewError>;

/// The collaborators a view needs to load packages.
#[derive(Clone)]
pub struct ViewEnv {
    pub locator: Arc<dyn ModuleLocator>,
    pub requirements: Arc<dyn RequirementSource>,
    pub tags: TagFilter,
    /// Cancels in-flight reloads; the editor sets it when a newer change
    /// supersedes the one being loaded.
    pub cancel: CancelToken,
}

/// One package as the view tracks it between loads.
#[derive(Debug, Clone)]
pub struct ViewPackage {
    canonical: String,
    import_path: ImportPath,
    /// Source directories, leaf first.
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
    /// Forward edges, by canonical import path.
    imports: Vec<String>,
    /// Inverted edges, maintained by the owning module.
    imported_by: BTreeSet<String>,
    error: Option<LoadError>,
    status: Status,
}

impl ViewPackage {
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn import_path(&self) -> &ImportPath {
        &self.import_path
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn imported_by(&self) -> &BTreeSet<String> {
        &self.imported_by
    }

    pub fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    fn leaf_dir(&self) -> Option<&Path> {
        self.dirs.first().map(PathBuf::as_path)
    }
}

/// A module as the editor sees it.
pub struct ViewModule {
    root: PathBuf,
    env: ViewEnv,
    manifest: Option<Manifest>,
    main_path: Option<ModulePath>,
    selected: Arc<Selected>,
    packages: BTreeMap<String, ViewPackage>,
    dirty_files: BTreeSet<PathBuf>,
    status: Status,
}

struct NoRequirements;

impl RequirementSource for NoRequirements {
    fn requirements_of(
        &self,
        _mv: &cuemod_module::ModuleVersion,
        _cancel: &CancelToken,
    ) -> cuemod_resolve::Result<Vec<cuemod_module::ModuleVersion>> {
        Ok(Vec::new())
    }
}

impl ViewModule {
    /// Open the module rooted at `root` and load its manifest. A missing
    /// or unparseable manifest leaves the module in `Deleted` status
    /// rather than failing.
    pub fn open(root: impl Into<PathBuf>, env: ViewEnv) -> Result<ViewModule> {
        let empty = Requirements::new(None, Vec::new(), BTreeMap::new())
            .select(&NoRequirements, &env.cancel)?;
        let mut module = ViewModule {
            root: root.into(),
            env,
            manifest: None,
            main_path: None,
            selected: Arc::new(empty),
            packages: BTreeMap::new(),
            dirty_files: BTreeSet::new(),
            status: Status::Dirty,
        };
        module.reload_module()?;
        Ok(module)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// All tracked packages, sorted by canonical import path.
    pub fn packages(&self) -> impl Iterator<Item = &ViewPackage> {
        self.packages.values()
    }

    pub fn package(&self, canonical: &str) -> Option<&ViewPackage> {
        self.packages.get(canonical)
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("cue.mod").join("module.cue")
    }

    /// Record a file change.
    ///
    /// Editing the manifest dirties the module itself; editing any other
    /// file dirties the packages that own it (ancestor-inheriting
    /// packages included, since the file appears in their file lists).
    pub fn mark_file_dirty(&mut self, file: &Path) {
        if file == self.manifest_path() {
            self.status = Status::Dirty;
            return;
        }
        let mut owned = false;
        for pkg in self.packages.values_mut() {
            if pkg.files.iter().any(|f| f == file) {
                pkg.status = Status::Dirty;
                owned = true;
            }
        }
        self.dirty_files.insert(file.to_path_buf());
        if !owned {
            debug!(file = %file.display(), "dirty file not owned by any package yet");
        }
    }

    /// Re-parse the manifest if the module is dirty and refresh the
    /// requirement selection. Returns whether the module is splendid.
    pub fn reload_module(&mut self) -> Result<bool> {
        if self.status == Status::Splendid {
            return Ok(true);
        }
        let bytes = match std::fs::read(self.manifest_path()) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.status = Status::Deleted;
                return Ok(false);
            }
        };
        let manifest = match Manifest::parse(&bytes, ParseMode::NonStrict) {
            Ok(manifest) => manifest,
            Err(err) => {
                debug!(module = %self.root.display(), %err, "manifest failed to parse");
                self.status = Status::Deleted;
                return Ok(false);
            }
        };
        let requirements = Requirements::from_manifest(&manifest);
        let selected = requirements.select(self.env.requirements.as_ref(), &self.env.cancel)?;

        self.main_path = manifest.module().cloned();
        self.manifest = Some(manifest);
        self.selected = Arc::new(selected);
        for pkg in self.packages.values_mut() {
            pkg.status = Status::Dirty;
        }
        self.status = Status::Splendid;
        Ok(true)
    }

    /// Load the given packages (and their transitive imports) into the
    /// view.
    pub fn load_roots(&mut self, roots: &[ImportPath]) -> Result<()> {
        if self.status != Status::Splendid {
            return Err(ViewError::ModuleNotSplendid {
                status: self.status,
            });
        }
        let cfg = self.load_config();
        let loaded = load(&cfg, roots)?;
        let moved = self.install(&loaded);
        self.dirty_files.extend(moved);
        Ok(())
    }

    /// Reload the dirty portion of the package graph to a fixed point.
    pub fn reload_packages(&mut self) -> Result<()> {
        if self.status != Status::Splendid {
            return Err(ViewError::ModuleNotSplendid {
                status: self.status,
            });
        }
        loop {
            let dirty = self.collect_dirty();
            if dirty.is_empty() {
                return Ok(());
            }
            debug!(count = dirty.len(), "reloading dirty packages");
            let roots: Vec<ImportPath> = dirty
                .iter()
                .filter_map(|canonical| ImportPath::parse(canonical).ok())
                .collect();
            let cfg = self.load_config();
            let loaded = load(&cfg, &roots)?;
            let moved = self.install(&loaded);
            self.dirty_files.extend(moved);
        }
    }

    /// The packages to reload: everything dirty, everything a dirty file
    /// maps to, and transitively everything that imports one of those via
    /// the inverted edges.
    fn collect_dirty(&mut self) -> BTreeSet<String> {
        let mut dirty: BTreeSet<String> = self
            .packages
            .iter()
            .filter(|(_, p)| p.status == Status::Dirty)
            .map(|(c, _)| c.clone())
            .collect();

        let files = std::mem::take(&mut self.dirty_files);
        for file in files {
            let mut hit = false;
            for (canonical, pkg) in &self.packages {
                if pkg.files.iter().any(|f| f == &file) {
                    dirty.insert(canonical.clone());
                    hit = true;
                }
            }
            if !hit {
                // A file no package owns yet: derive its package from the
                // directory and package clause, plus descendant packages
                // that inherit from this directory.
                for canonical in self.find_packages_for_file(&file) {
                    dirty.insert(canonical);
                    hit = true;
                }
            }
            if !hit {
                debug!(file = %file.display(), "no package for dirty file");
            }
        }

        // Follow inverted edges: whoever imports a dirty package must be
        // reloaded with it.
        let mut queue: Vec<String> = dirty.iter().cloned().collect();
        while let Some(canonical) = queue.pop() {
            let importers: Vec<String> = match self.packages.get(&canonical) {
                Some(pkg) => pkg.imported_by.iter().cloned().collect(),
                None => continue,
            };
            for importer in importers {
                if dirty.insert(importer.clone()) {
                    queue.push(importer);
                }
            }
        }
        dirty
    }

    fn load_config(&self) -> LoadConfig {
        let mut cfg = LoadConfig::new(
            MainModule {
                path: self.main_path.clone(),
                root: self.root.clone(),
            },
            self.selected.clone(),
            self.env.locator.clone(),
        );
        cfg.tags = self.env.tags.clone();
        cfg.cancel = self.env.cancel.clone();
        cfg
    }

    /// Fold a load result into the view: upsert packages, rebuild the
    /// inverted edges by diffing old against new imports, drop packages
    /// that lost all their files, and report files whose package
    /// assignment changed.
    fn install(&mut self, loaded: &Packages) -> Vec<PathBuf> {
        let all = loaded.all();
        let mut moved: Vec<PathBuf> = Vec::new();
        let mut edge_diffs: Vec<(String, Vec<String>, Vec<String>)> = Vec::new();
        let mut removals: Vec<(String, BTreeSet<String>)> = Vec::new();

        // Upsert every loaded package, remembering old state for the edge
        // and removal passes so the outcome is independent of iteration
        // order.
        for pkg in &all {
            let canonical = pkg.canonical().to_string();
            let new_files = pkg.files();
            let new_imports: Vec<String> = pkg
                .imports()
                .iter()
                .map(|p| p.canonical().to_string())
                .collect();
            let error = pkg.error();

            let (old_files, old_imports, old_backptrs) = match self.packages.get(&canonical) {
                Some(old) => (
                    old.files.clone(),
                    old.imports.clone(),
                    old.imported_by.clone(),
                ),
                None => (Vec::new(), Vec::new(), BTreeSet::new()),
            };

            for file in &old_files {
                if !new_files.contains(file) && file.is_file() {
                    moved.push(file.clone());
                }
            }
            edge_diffs.push((canonical.clone(), old_imports, new_imports.clone()));

            if new_files.is_empty()
                && matches!(error, Some(LoadError::EmptyPackage { .. }))
                && !old_files.is_empty()
            {
                // The package lost all its sources: it ceases to exist,
                // and its importers record the broken edge.
                removals.push((canonical.clone(), old_backptrs));
                self.packages.remove(&canonical);
                continue;
            }

            let view_pkg = ViewPackage {
                canonical: canonical.clone(),
                import_path: pkg.import_path().clone(),
                dirs: pkg.dirs(),
                files: new_files,
                imports: new_imports,
                imported_by: old_backptrs,
                error,
                status: Status::Splendid,
            };
            self.packages.insert(canonical, view_pkg);
        }

        for (canonical, importers) in &removals {
            for importer in importers {
                if let Some(imp) = self.packages.get_mut(importer) {
                    if imp.error.is_none() {
                        imp.error = Some(LoadError::NoModuleForImport {
                            path: canonical.clone(),
                        });
                    }
                }
            }
        }

        // Rebuild inverted edges from the diffs.
        for (canonical, old_imports, new_imports) in edge_diffs {
            let gone = removals.iter().any(|(c, _)| *c == canonical);
            for target in &old_imports {
                if gone || !new_imports.contains(target) {
                    if let Some(t) = self.packages.get_mut(target) {
                        t.imported_by.remove(&canonical);
                    }
                }
            }
            if !gone {
                for target in &new_imports {
                    if let Some(t) = self.packages.get_mut(target) {
                        t.imported_by.insert(canonical.clone());
                    }
                }
            }
        }
        moved
    }

    /// The packages a file belongs to: the package named by its directory
    /// and package clause, plus every tracked package whose leaf directory
    /// is a descendant of the file's directory with the same qualifier
    /// (those inherit the file under the ancestor rule).
    pub fn find_packages_for_file(&self, file: &Path) -> Vec<String> {
        let mut out = Vec::new();
        let Some((canonical, ip, dir)) = self.derive_package(file) else {
            return out;
        };
        out.push(canonical.clone());
        for (other, pkg) in &self.packages {
            if *other == canonical {
                continue;
            }
            if pkg.import_path.qualifier() != ip.qualifier() {
                continue;
            }
            if let Some(leaf) = pkg.leaf_dir() {
                if leaf != dir && leaf.starts_with(&dir) {
                    out.push(other.clone());
                }
            }
        }
        out
    }

    /// Derive (canonical path, import path, directory) for a file from its
    /// on-disk location and package clause.
    fn derive_package(&self, file: &Path) -> Option<(String, ImportPath, PathBuf)> {
        let main = self.main_path.as_ref()?;
        let dir = file.parent()?;
        let rel = dir.strip_prefix(&self.root).ok()?;
        let bytes = std::fs::read(file).ok()?;
        let parsed = parse_imports(&bytes).ok()?;
        let qualifier = parsed.package_name?;

        let mut base = main.base_path().to_string();
        for component in rel.components() {
            base.push('/');
            base.push_str(&component.as_os_str().to_string_lossy());
        }
        let spec = format!("{base}:{qualifier}");
        let mut ip = ImportPath::parse(&spec).ok()?;
        if let Some(major) = main.major() {
            ip = ip.with_major(major);
        }
        Some((ip.canonical(), ip, dir.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuemod_loader::FixedLocator;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn env() -> ViewEnv {
        ViewEnv {
            locator: Arc::new(FixedLocator::new()),
            requirements: Arc::new(NoRequirements),
            tags: TagFilter::default(),
            cancel: CancelToken::new(),
        }
    }

    fn ip(s: &str) -> ImportPath {
        ImportPath::parse(s).unwrap()
    }

    fn module_with_x_y(root: &Path) -> ViewModule {
        write(root, "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(
            root,
            "x/x.cue",
            "package x\nimport \"main.example/m/y\"\nv: 1\n",
        );
        write(root, "y/y.cue", "package y\nw: 2\n");
        let mut module = ViewModule::open(root, env()).unwrap();
        module.load_roots(&[ip("main.example/m/x")]).unwrap();
        module
    }

    #[test]
    fn open_loads_manifest_and_packages() {
        let dir = tempfile::tempdir().unwrap();
        let module = module_with_x_y(dir.path());
        assert_eq!(module.status(), Status::Splendid);

        let x = module.package("main.example/m/x@v0:x").unwrap();
        assert_eq!(x.status(), Status::Splendid);
        assert_eq!(x.imports(), ["main.example/m/y@v0:y"]);

        let y = module.package("main.example/m/y@v0:y").unwrap();
        assert!(y.imported_by().contains("main.example/m/x@v0:x"));
    }

    #[test]
    fn missing_manifest_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let module = ViewModule::open(dir.path(), env()).unwrap();
        assert_eq!(module.status(), Status::Deleted);
    }

    #[test]
    fn broken_manifest_is_deleted_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: 42\n");
        let mut module = ViewModule::open(dir.path(), env()).unwrap();
        assert_eq!(module.status(), Status::Deleted);

        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        assert!(module.reload_module().unwrap());
        assert_eq!(module.status(), Status::Splendid);
    }

    #[test]
    fn manifest_edit_dirties_module() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = module_with_x_y(dir.path());

        module.mark_file_dirty(&dir.path().join("cue.mod/module.cue"));
        assert_eq!(module.status(), Status::Dirty);
        assert!(matches!(
            module.reload_packages(),
            Err(ViewError::ModuleNotSplendid { .. })
        ));

        assert!(module.reload_module().unwrap());
        // Every package became dirty on module reload.
        assert!(module
            .packages()
            .all(|p| p.status() == Status::Dirty));
        module.reload_packages().unwrap();
        assert!(module
            .packages()
            .all(|p| p.status() == Status::Splendid));
    }

    #[test]
    fn edit_marks_importers_dirty_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = module_with_x_y(dir.path());

        write(dir.path(), "y/y.cue", "package y\nw: 3\n");
        module.mark_file_dirty(&dir.path().join("y/y.cue"));
        assert_eq!(
            module.package("main.example/m/y@v0:y").unwrap().status(),
            Status::Dirty
        );
        // x is not yet dirty; the reload pulls it in via the inverse edge.
        assert_eq!(
            module.package("main.example/m/x@v0:x").unwrap().status(),
            Status::Splendid
        );

        module.reload_packages().unwrap();
        assert!(module
            .packages()
            .all(|p| p.status() == Status::Splendid));
        let y = module.package("main.example/m/y@v0:y").unwrap();
        assert!(y.error().is_none());
    }

    #[test]
    fn repackaged_file_moves_between_packages() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = module_with_x_y(dir.path());

        // y's sole file now declares package z.
        write(dir.path(), "y/y.cue", "package z\nw: 3\n");
        module.mark_file_dirty(&dir.path().join("y/y.cue"));
        module.reload_packages().unwrap();

        // y ceased to exist as a package.
        assert!(module.package("main.example/m/y@v0:y").is_none());
        // A new package z exists at the same directory.
        let z = module.package("main.example/m/y@v0:z").unwrap();
        assert_eq!(z.files(), [dir.path().join("y/y.cue")]);
        assert!(z.error().is_none());
        // x records the broken import edge.
        let x = module.package("main.example/m/x@v0:x").unwrap();
        match x.error() {
            Some(LoadError::NoModuleForImport { path }) => {
                assert!(path.contains("main.example/m/y"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn new_file_creates_package_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = module_with_x_y(dir.path());

        write(dir.path(), "w/w.cue", "package w\nn: 1\n");
        module.mark_file_dirty(&dir.path().join("w/w.cue"));
        module.reload_packages().unwrap();

        let w = module.package("main.example/m/w@v0:w").unwrap();
        assert_eq!(w.status(), Status::Splendid);
    }

    #[test]
    fn find_packages_for_file_includes_descendants() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(dir.path(), "a/b/c/x.cue", "package p\nx: 1\n");
        write(dir.path(), "a/y.cue", "package p\ny: 2\n");
        let mut module = ViewModule::open(dir.path(), env()).unwrap();
        module.load_roots(&[ip("main.example/m/a/b/c:p")]).unwrap();

        let found = module.find_packages_for_file(&dir.path().join("a/y.cue"));
        assert!(found.contains(&"main.example/m/a@v0:p".to_string()));
        assert!(found.contains(&"main.example/m/a/b/c@v0:p".to_string()));
    }

    #[test]
    fn ancestor_file_edit_dirties_descendant_package() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue.mod/module.cue", "module: \"main.example/m@v0\"\n");
        write(dir.path(), "a/b/c/x.cue", "package p\nx: 1\n");
        write(dir.path(), "a/y.cue", "package p\ny: 2\n");
        let mut module = ViewModule::open(dir.path(), env()).unwrap();
        module.load_roots(&[ip("main.example/m/a/b/c:p")]).unwrap();

        // The ancestor file is part of the descendant package's file list,
        // so marking it dirty dirties that package directly.
        module.mark_file_dirty(&dir.path().join("a/y.cue"));
        assert_eq!(
            module
                .package("main.example/m/a/b/c@v0:p")
                .unwrap()
                .status(),
            Status::Dirty
        );
        module.reload_packages().unwrap();
        assert_eq!(
            module
                .package("main.example/m/a/b/c@v0:p")
                .unwrap()
                .status(),
            Status::Splendid
        );
    }
}
