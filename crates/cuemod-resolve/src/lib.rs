//! Requirements graphs and minimum version selection.
//!
//! Given the main module's direct requirements and a way to fetch any
//! module's direct requirements, selection computes the closed set in which
//! every module's version is the maximum of all versions required for it.
//! No backtracking: requirements are strictly monotone, so the walk visits
//! each (path, version) pair once and the result is independent of
//! traversal order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

use cuemod_module::{Manifest, ModulePath, ModuleVersion, Version};
use tracing::debug;

pub use cuemod_cache::CancelToken;

/// Errors from requirement resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Fetching a module's direct requirements failed.
    #[error("requirements of {module}: {source}")]
    Requirements {
        module: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The operation's cancellation token was set. Propagated verbatim to
    /// the caller; the memoised graph keeps whatever edges completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn requirements(
        module: &ModuleVersion,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ResolveError::Requirements {
            module: module.to_string(),
            source: Box::new(source),
        }
    }
}

/// Result type alias for resolution operations.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Where a module's direct requirements come from.
pub trait RequirementSource: Send + Sync {
    /// The sorted direct requirements of one module version.
    fn requirements_of(
        &self,
        mv: &ModuleVersion,
        cancel: &CancelToken,
    ) -> Result<Vec<ModuleVersion>>;
}

impl RequirementSource for cuemod_cache::Cache {
    fn requirements_of(
        &self,
        mv: &ModuleVersion,
        cancel: &CancelToken,
    ) -> Result<Vec<ModuleVersion>> {
        match self.summary(mv, cancel) {
            Ok(summary) => Ok(summary.requires),
            Err(cuemod_cache::CacheError::Cancelled) => Err(ResolveError::Cancelled),
            Err(e) => Err(ResolveError::requirements(mv, e)),
        }
    }
}

/// The version slot selected for one module path.
///
/// Ordering encodes the two sentinel rules: `None` loses to every concrete
/// version (it drops the module from the closure) and `Main` beats every
/// concrete version (only the main module carries it).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SelectedVersion {
    None,
    Concrete(Version),
    Main,
}

/// The main module's requirement set, ready to be closed over.
pub struct Requirements {
    main: Option<ModulePath>,
    roots: Vec<ModuleVersion>,
    default_majors: BTreeMap<String, u32>,
    excluded: BTreeSet<ModulePath>,
    // Memoised (version → direct requirements) edges, shared across
    // selections of this graph.
    graph: Mutex<HashMap<ModuleVersion, Arc<Vec<ModuleVersion>>>>,
}

impl Requirements {
    /// A requirement set with the given main module and direct
    /// requirements.
    pub fn new(
        main: Option<ModulePath>,
        mut roots: Vec<ModuleVersion>,
        default_majors: BTreeMap<String, u32>,
    ) -> Requirements {
        roots.sort();
        roots.dedup();
        Requirements {
            main,
            roots,
            default_majors,
            excluded: BTreeSet::new(),
            graph: Mutex::new(HashMap::new()),
        }
    }

    /// The requirement set declared by a main-module manifest.
    pub fn from_manifest(manifest: &Manifest) -> Requirements {
        Requirements::new(
            manifest.module().cloned(),
            manifest.direct_requirements(),
            manifest.default_majors().clone(),
        )
    }

    /// Mark module paths as version "none": they and their requirements
    /// drop out of the closure.
    pub fn with_excluded(mut self, excluded: impl IntoIterator<Item = ModulePath>) -> Self {
        self.excluded.extend(excluded);
        self
    }

    pub fn main(&self) -> Option<&ModulePath> {
        self.main.as_ref()
    }

    /// Sorted direct requirements of the main module.
    pub fn roots(&self) -> &[ModuleVersion] {
        &self.roots
    }

    pub fn default_majors(&self) -> &BTreeMap<String, u32> {
        &self.default_majors
    }

    fn edges(
        &self,
        src: &dyn RequirementSource,
        mv: &ModuleVersion,
        cancel: &CancelToken,
    ) -> Result<Arc<Vec<ModuleVersion>>> {
        if let Some(reqs) = self.graph.lock().expect("graph lock").get(mv) {
            return Ok(reqs.clone());
        }
        let reqs = Arc::new(src.requirements_of(mv, cancel)?);
        self.graph
            .lock()
            .expect("graph lock")
            .insert(mv.clone(), reqs.clone());
        Ok(reqs)
    }

    /// Close the requirement set: minimum version selection over the
    /// transitive requirement graph.
    ///
    /// Requirement lists of the current frontier are fetched concurrently,
    /// deduplicated by (path, version); the selection itself is a pure fold
    /// and independent of fetch order. Cancellation is checked per round
    /// and inside each fetch.
    pub fn select(
        &self,
        src: &dyn RequirementSource,
        cancel: &CancelToken,
    ) -> Result<Selected> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let mut chosen: BTreeMap<ModulePath, SelectedVersion> = BTreeMap::new();
        if let Some(main) = &self.main {
            chosen.insert(main.clone(), SelectedVersion::Main);
        }
        for path in &self.excluded {
            chosen.insert(path.clone(), SelectedVersion::None);
        }

        let mut visited: HashSet<ModuleVersion> = HashSet::new();
        let mut frontier: Vec<ModuleVersion> = Vec::new();
        for root in &self.roots {
            self.consider(root, &mut chosen, &mut visited, &mut frontier);
        }

        while !frontier.is_empty() {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            frontier.sort();
            let batch = std::mem::take(&mut frontier);
            let results: Vec<(ModuleVersion, Result<Arc<Vec<ModuleVersion>>>)> =
                std::thread::scope(|scope| {
                    let handles: Vec<_> = batch
                        .iter()
                        .map(|mv| {
                            scope.spawn(move || (mv.clone(), self.edges(src, mv, cancel)))
                        })
                        .collect();
                    handles.into_iter().map(|h| h.join().expect("fetch thread")).collect()
                });
            for (mv, reqs) in results {
                let reqs = reqs?;
                debug!(module = %mv, count = reqs.len(), "loaded requirements");
                for req in reqs.iter() {
                    self.consider(req, &mut chosen, &mut visited, &mut frontier);
                }
            }
        }

        let mut versions = BTreeMap::new();
        for (path, selected) in &chosen {
            if let SelectedVersion::Concrete(v) = selected {
                let mv = ModuleVersion::new(path.clone(), v.clone())
                    .expect("selection preserves the major invariant");
                versions.insert(path.clone(), mv);
            }
        }
        Ok(Selected {
            main: self.main.clone(),
            versions,
            default_majors: self.default_majors.clone(),
        })
    }

    /// Fold one requirement edge into the running selection.
    fn consider(
        &self,
        req: &ModuleVersion,
        chosen: &mut BTreeMap<ModulePath, SelectedVersion>,
        visited: &mut HashSet<ModuleVersion>,
        frontier: &mut Vec<ModuleVersion>,
    ) {
        if self.excluded.contains(req.path()) {
            return;
        }
        let path = req.path().clone();
        let candidate = SelectedVersion::Concrete(req.version().clone());
        match chosen.get(&path) {
            Some(existing) if *existing >= candidate => {}
            _ => {
                chosen.insert(path, candidate);
            }
        }
        if visited.insert(req.clone()) {
            frontier.push(req.clone());
        }
    }
}

/// Which module an import path resolves into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleForImport<'a> {
    /// The import lives in the main module itself.
    Main(&'a ModulePath),
    /// The import lives in a selected dependency.
    Dependency(&'a ModuleVersion),
    /// A version-less import path matching several selected majors with no
    /// default entry to choose between them.
    Ambiguous { base: String, majors: Vec<u32> },
}

/// The closed selection: for every module path in the transitive closure,
/// the one version chosen for it.
#[derive(Debug, Clone)]
pub struct Selected {
    main: Option<ModulePath>,
    versions: BTreeMap<ModulePath, ModuleVersion>,
    default_majors: BTreeMap<String, u32>,
}

impl Selected {
    pub fn main(&self) -> Option<&ModulePath> {
        self.main.as_ref()
    }

    /// All selected versions, sorted by module path.
    pub fn versions(&self) -> impl Iterator<Item = &ModuleVersion> {
        self.versions.values()
    }

    /// The version selected for a fully-qualified module path.
    pub fn version_for(&self, path: &ModulePath) -> Option<&ModuleVersion> {
        self.versions.get(path)
    }

    /// Resolve an import's base path to its containing module: walk the
    /// path's prefixes from longest to shortest until one names a selected
    /// module with the matching major.
    ///
    /// A version-less import resolves through the default-majors table, or
    /// to the single selected major of its base path when exactly one
    /// exists; several selected majors without a default entry are
    /// ambiguous.
    pub fn module_for_import(
        &self,
        base_path: &str,
        major: Option<u32>,
    ) -> Option<ModuleForImport<'_>> {
        for prefix in prefixes(base_path) {
            if let Some(main) = &self.main {
                if main.base_path() == prefix
                    && (major.is_none() || major == main.major())
                {
                    return Some(ModuleForImport::Main(main));
                }
            }
            let candidate_major = match major.or_else(|| self.default_majors.get(prefix).copied())
            {
                Some(m) => Some(m),
                None => {
                    let majors = self.selected_majors(prefix);
                    match majors.len() {
                        0 => None,
                        1 => Some(majors[0]),
                        _ => {
                            return Some(ModuleForImport::Ambiguous {
                                base: prefix.to_string(),
                                majors,
                            })
                        }
                    }
                }
            };
            if let Some(m) = candidate_major {
                let Ok(parsed) = ModulePath::parse(prefix) else {
                    continue;
                };
                if let Some(mv) = self.versions.get(&parsed.with_major(m)) {
                    return Some(ModuleForImport::Dependency(mv));
                }
            }
        }
        None
    }

    /// The majors selected for one base path, ascending.
    fn selected_majors(&self, base: &str) -> Vec<u32> {
        self.versions
            .keys()
            .filter(|p| p.base_path() == base)
            .filter_map(ModulePath::major)
            .collect()
    }
}

/// The whole-element prefixes of a path, longest first.
fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    let mut ends: Vec<usize> = path
        .match_indices('/')
        .map(|(i, _)| i)
        .collect();
    ends.push(path.len());
    ends.into_iter().rev().map(move |i| &path[..i])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A scripted requirement source over a fixed graph.
    struct Fixed {
        edges: HashMap<String, Vec<(String, String)>>,
    }

    impl Fixed {
        fn new(entries: &[(&str, &str, &[(&str, &str)])]) -> Fixed {
            let mut edges = HashMap::new();
            for (path, version, reqs) in entries {
                edges.insert(
                    format!("{path} {version}"),
                    reqs.iter()
                        .map(|(p, v)| (p.to_string(), v.to_string()))
                        .collect(),
                );
            }
            Fixed { edges }
        }
    }

    impl RequirementSource for Fixed {
        fn requirements_of(
            &self,
            mv: &ModuleVersion,
            _cancel: &CancelToken,
        ) -> Result<Vec<ModuleVersion>> {
            let key = format!("{} {}", mv.path(), mv.version());
            let edges = self.edges.get(&key).cloned().unwrap_or_default();
            Ok(edges
                .iter()
                .map(|(p, v)| ModuleVersion::parse(p, v).expect("test graph entry"))
                .collect())
        }
    }

    fn mv(path: &str, version: &str) -> ModuleVersion {
        ModuleVersion::parse(path, version).unwrap()
    }

    fn requirements(roots: &[(&str, &str)]) -> Requirements {
        Requirements::new(
            Some(ModulePath::parse("main.example/m@v0").unwrap()),
            roots.iter().map(|(p, v)| mv(p, v)).collect(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn selects_maximum_across_paths() {
        // a requires c v1.1.0; b requires c v1.3.0; direct requirement says
        // c v1.0.0. The maximum wins.
        let src = Fixed::new(&[
            ("a.com/a@v0", "v0.1.0", &[("c.com/c@v1", "v1.1.0")]),
            ("b.com/b@v0", "v0.1.0", &[("c.com/c@v1", "v1.3.0")]),
            ("c.com/c@v1", "v1.0.0", &[]),
            ("c.com/c@v1", "v1.1.0", &[]),
            ("c.com/c@v1", "v1.3.0", &[]),
        ]);
        let reqs = requirements(&[
            ("a.com/a@v0", "v0.1.0"),
            ("b.com/b@v0", "v0.1.0"),
            ("c.com/c@v1", "v1.0.0"),
        ]);
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();
        assert_eq!(
            selected
                .version_for(&ModulePath::parse("c.com/c@v1").unwrap())
                .unwrap()
                .version()
                .as_str(),
            "v1.3.0"
        );
    }

    #[test]
    fn transitive_closure_is_walked() {
        let src = Fixed::new(&[
            ("a.com/a@v0", "v0.1.0", &[("b.com/b@v0", "v0.2.0")]),
            ("b.com/b@v0", "v0.2.0", &[("c.com/c@v0", "v0.3.0")]),
            ("c.com/c@v0", "v0.3.0", &[]),
        ]);
        let reqs = requirements(&[("a.com/a@v0", "v0.1.0")]);
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();
        let got: Vec<String> = selected.versions().map(|m| m.to_string()).collect();
        assert_eq!(
            got,
            vec!["a.com/a@v0.1.0", "b.com/b@v0.2.0", "c.com/c@v0.3.0"]
        );
    }

    #[test]
    fn selection_is_deterministic() {
        let src = Fixed::new(&[
            ("a.com/a@v0", "v0.1.0", &[("c.com/c@v1", "v1.1.0")]),
            ("b.com/b@v0", "v0.1.0", &[("c.com/c@v1", "v1.2.0")]),
            ("c.com/c@v1", "v1.1.0", &[]),
            ("c.com/c@v1", "v1.2.0", &[]),
        ]);
        let reqs = requirements(&[("a.com/a@v0", "v0.1.0"), ("b.com/b@v0", "v0.1.0")]);
        let first = reqs.select(&src, &CancelToken::new()).unwrap();
        for _ in 0..10 {
            let again = reqs.select(&src, &CancelToken::new()).unwrap();
            let a: Vec<String> = first.versions().map(|m| m.to_string()).collect();
            let b: Vec<String> = again.versions().map(|m| m.to_string()).collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn main_module_beats_any_required_version() {
        // A dependency requiring the main module at a concrete version must
        // not displace the unversioned main module.
        let src = Fixed::new(&[(
            "a.com/a@v0",
            "v0.1.0",
            &[("main.example/m@v0", "v0.9.9")],
        )]);
        let reqs = requirements(&[("a.com/a@v0", "v0.1.0")]);
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();
        assert!(selected
            .version_for(&ModulePath::parse("main.example/m@v0").unwrap())
            .is_none());
        assert_eq!(
            selected.main().unwrap().to_string(),
            "main.example/m@v0"
        );
    }

    #[test]
    fn cancelled_selection_reports_cancelled() {
        let src = Fixed::new(&[("a.com/a@v0", "v0.1.0", &[])]);
        let reqs = requirements(&[("a.com/a@v0", "v0.1.0")]);
        let cancelled = CancelToken::new();
        cancelled.cancel();
        assert!(matches!(
            reqs.select(&src, &cancelled),
            Err(ResolveError::Cancelled)
        ));
        // The same graph selects fine with a live token.
        reqs.select(&src, &CancelToken::new()).unwrap();
    }

    #[test]
    fn excluded_modules_drop_from_closure() {
        let src = Fixed::new(&[
            ("a.com/a@v0", "v0.1.0", &[("b.com/b@v0", "v0.2.0")]),
            ("b.com/b@v0", "v0.2.0", &[("c.com/c@v0", "v0.3.0")]),
        ]);
        let reqs = requirements(&[("a.com/a@v0", "v0.1.0")])
            .with_excluded([ModulePath::parse("b.com/b@v0").unwrap()]);
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();
        assert!(selected
            .version_for(&ModulePath::parse("b.com/b@v0").unwrap())
            .is_none());
        // b's own requirements were never pulled in.
        assert!(selected
            .version_for(&ModulePath::parse("c.com/c@v0").unwrap())
            .is_none());
    }

    #[test]
    fn distinct_majors_select_independently() {
        let src = Fixed::new(&[
            ("a.com/a@v0", "v0.1.0", &[("c.com/c@v1", "v1.1.0")]),
            ("b.com/b@v0", "v0.1.0", &[("c.com/c@v2", "v2.0.0")]),
            ("c.com/c@v1", "v1.1.0", &[]),
            ("c.com/c@v2", "v2.0.0", &[]),
        ]);
        let reqs = requirements(&[("a.com/a@v0", "v0.1.0"), ("b.com/b@v0", "v0.1.0")]);
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();
        assert!(selected
            .version_for(&ModulePath::parse("c.com/c@v1").unwrap())
            .is_some());
        assert!(selected
            .version_for(&ModulePath::parse("c.com/c@v2").unwrap())
            .is_some());
    }

    #[test]
    fn import_resolution_longest_prefix() {
        let src = Fixed::new(&[
            ("foo.com/bar@v1", "v1.0.0", &[]),
            ("foo.com/bar/nested@v1", "v1.2.0", &[]),
        ]);
        let reqs = requirements(&[
            ("foo.com/bar@v1", "v1.0.0"),
            ("foo.com/bar/nested@v1", "v1.2.0"),
        ]);
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();

        match selected.module_for_import("foo.com/bar/nested/pkg", Some(1)) {
            Some(ModuleForImport::Dependency(mv)) => {
                assert_eq!(mv.to_string(), "foo.com/bar/nested@v1.2.0");
            }
            other => panic!("unexpected resolution {other:?}"),
        }
        match selected.module_for_import("foo.com/bar/other", Some(1)) {
            Some(ModuleForImport::Dependency(mv)) => {
                assert_eq!(mv.to_string(), "foo.com/bar@v1.0.0");
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn versionless_import_uses_default_major() {
        let src = Fixed::new(&[
            ("foo.com/bar@v1", "v1.0.0", &[]),
            ("foo.com/bar@v2", "v2.0.0", &[]),
        ]);
        let mut defaults = BTreeMap::new();
        defaults.insert("foo.com/bar".to_string(), 2);
        let reqs = Requirements::new(
            Some(ModulePath::parse("main.example/m@v0").unwrap()),
            vec![
                mv("foo.com/bar@v1", "v1.0.0"),
                mv("foo.com/bar@v2", "v2.0.0"),
            ],
            defaults,
        );
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();

        match selected.module_for_import("foo.com/bar/pkg", None) {
            Some(ModuleForImport::Dependency(mv)) => {
                assert_eq!(mv.to_string(), "foo.com/bar@v2.0.0");
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn versionless_import_single_major_resolves() {
        let src = Fixed::new(&[("foo.com/bar@v2", "v2.0.0", &[])]);
        let reqs = requirements(&[("foo.com/bar@v2", "v2.0.0")]);
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();
        match selected.module_for_import("foo.com/bar/pkg", None) {
            Some(ModuleForImport::Dependency(mv)) => {
                assert_eq!(mv.to_string(), "foo.com/bar@v2.0.0");
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn versionless_import_two_majors_is_ambiguous() {
        let src = Fixed::new(&[
            ("foo.com/bar@v1", "v1.0.0", &[]),
            ("foo.com/bar@v2", "v2.0.0", &[]),
        ]);
        let reqs = requirements(&[
            ("foo.com/bar@v1", "v1.0.0"),
            ("foo.com/bar@v2", "v2.0.0"),
        ]);
        let selected = reqs.select(&src, &CancelToken::new()).unwrap();
        match selected.module_for_import("foo.com/bar/pkg", None) {
            Some(ModuleForImport::Ambiguous { base, majors }) => {
                assert_eq!(base, "foo.com/bar");
                assert_eq!(majors, vec![1, 2]);
            }
            other => panic!("unexpected resolution {other:?}"),
        }
        // An explicit major stays unambiguous.
        assert!(matches!(
            selected.module_for_import("foo.com/bar/pkg", Some(1)),
            Some(ModuleForImport::Dependency(_))
        ));
    }

    #[test]
    fn main_module_prefix_resolves_to_main() {
        let reqs = requirements(&[]);
        let selected = reqs.select(&Fixed::new(&[]), &CancelToken::new()).unwrap();
        match selected.module_for_import("main.example/m/sub/pkg", None) {
            Some(ModuleForImport::Main(path)) => {
                assert_eq!(path.to_string(), "main.example/m@v0");
            }
            other => panic!("unexpected resolution {other:?}"),
        }
        assert!(selected.module_for_import("other.example/x", None).is_none());
    }
}
