//! The module-aware registry client.
//!
//! Layers the module protocol over [`OciStore`]: a module version is an OCI
//! manifest whose config media type is the module artifact marker and whose
//! two layers are (zip archive, raw module file). The repository name comes
//! from the resolver's location for the module path; the tag is the
//! canonical version.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::Arc;

use cuemod_module::{ModulePath, ModuleVersion, Version};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{RegistryError, Result};
use crate::http::HttpStore;
use crate::oci::{
    digest_of, Descriptor, OciManifest, OciStore, MODULE_ARTIFACT_TYPE, MODULE_FILE_MEDIA_TYPE,
    ZIP_MEDIA_TYPE,
};
use crate::resolver::{PathEncoding, RegistryLocation, Resolver};

/// How many per-host backends to keep alive for connection reuse.
const STORE_CACHE_SIZE: usize = 16;

type StoreFactory = Box<dyn Fn(&RegistryLocation) -> Result<Arc<dyn OciStore>> + Send + Sync>;

/// A registry client multiplexing over per-host backends.
pub struct Client {
    resolver: Resolver,
    stores: Mutex<LruCache<String, Arc<dyn OciStore>>>,
    factory: StoreFactory,
}

impl Client {
    /// A client whose backends speak HTTP per the resolver's locations.
    pub fn new(resolver: Resolver) -> Client {
        Self::with_store_factory(
            resolver,
            Box::new(|loc| Ok(Arc::new(HttpStore::new(loc)?) as Arc<dyn OciStore>)),
        )
    }

    /// A client with a custom backend factory.
    pub fn with_store_factory(resolver: Resolver, factory: StoreFactory) -> Client {
        Client {
            resolver,
            stores: Mutex::new(LruCache::new(
                NonZeroUsize::new(STORE_CACHE_SIZE).expect("nonzero cache size"),
            )),
            factory,
        }
    }

    /// A client routing every host to one fixed store. Used with
    /// [`crate::DirStore`] for local registries and in tests.
    pub fn with_store(resolver: Resolver, store: Arc<dyn OciStore>) -> Client {
        Self::with_store_factory(resolver, Box::new(move |_| Ok(store.clone())))
    }

    fn store_for(&self, location: &RegistryLocation) -> Result<Arc<dyn OciStore>> {
        let key = format!(
            "{}+{}",
            location.host,
            if location.insecure { "insecure" } else { "secure" }
        );
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let store = (self.factory)(location)?;
        stores.put(key, store.clone());
        Ok(store)
    }

    fn locate(&self, path: &ModulePath) -> Result<Located> {
        let location = self.resolver.resolve(path.base_path())?.clone();
        let store = self.store_for(&location)?;
        let prefix = location.repository_prefix.as_str();
        let (repo, tag_prefix) = match location.path_encoding {
            PathEncoding::Path => (join_repo(prefix, path.base_path()), String::new()),
            PathEncoding::HashAsRepo => {
                (join_repo(prefix, &path_hash(path.base_path())), String::new())
            }
            PathEncoding::HashAsTag => {
                if prefix.is_empty() {
                    return Err(RegistryError::Config {
                        message: "hashAsTag encoding requires a repository prefix".to_string(),
                    });
                }
                (prefix.to_string(), format!("{}-", path_hash(path.base_path())))
            }
        };
        Ok(Located {
            store,
            repo,
            tag_prefix,
        })
    }

    /// Fetch a handle for one module version.
    ///
    /// Returns the [`RegistryError::NotFound`] sentinel when the tag is
    /// unknown.
    pub fn get_module(&self, mv: &ModuleVersion, cancel: &CancelToken) -> Result<ModuleHandle> {
        check_cancel(cancel)?;
        let located = self.locate(mv.path())?;
        let tag = located.tag(mv.version());
        let manifest = located.store.manifest(&located.repo, &tag)?;
        check_cancel(cancel)?;
        check_module_manifest(&located.repo, &tag, &manifest)?;
        debug!(module = %mv, repo = %located.repo, "resolved module");
        Ok(ModuleHandle {
            store: located.store,
            repo: located.repo,
            manifest,
            cancel: cancel.clone(),
        })
    }

    /// Validate and publish a module version from its zip archive bytes.
    ///
    /// The archive is checked before anything is pushed; the version
    /// becomes visible only when the final tag push succeeds. Cancellation
    /// is checked before every push, so a cancelled publish never tags.
    pub fn put_module(&self, mv: &ModuleVersion, zip: &[u8], cancel: &CancelToken) -> Result<()> {
        check_cancel(cancel)?;
        let contents = cuemod_archive::check_zip(Cursor::new(zip), mv)?;
        if !contents.has_root_license {
            debug!(module = %mv, "publishing module without a root LICENSE file");
        }

        let located = self.locate(mv.path())?;
        check_cancel(cancel)?;
        let zip_desc = located
            .store
            .push_blob(&located.repo, ZIP_MEDIA_TYPE, zip)?;
        check_cancel(cancel)?;
        let mod_desc =
            located
                .store
                .push_blob(&located.repo, MODULE_FILE_MEDIA_TYPE, &contents.manifest)?;
        check_cancel(cancel)?;
        let config = located
            .store
            .push_blob(&located.repo, MODULE_ARTIFACT_TYPE, b"{}")?;
        let manifest = OciManifest::new(config, vec![zip_desc, mod_desc]);
        let tag = located.tag(mv.version());
        check_cancel(cancel)?;
        located.store.push_manifest(&located.repo, &tag, &manifest)?;
        debug!(module = %mv, repo = %located.repo, tag, "published module");
        Ok(())
    }

    /// All published versions of a module whose major matches the path's
    /// major suffix, sorted by semver. An unqualified path lists every
    /// version.
    pub fn module_versions(
        &self,
        path: &ModulePath,
        cancel: &CancelToken,
    ) -> Result<Vec<Version>> {
        check_cancel(cancel)?;
        let located = self.locate(path)?;
        let tags = located.store.tags(&located.repo)?;
        let mut versions = Vec::new();
        for tag in &tags {
            let Some(candidate) = located.version_of_tag(tag) else {
                continue;
            };
            let Ok(version) = Version::parse(candidate) else {
                continue;
            };
            if let Some(major) = path.major() {
                if version.major() != major {
                    continue;
                }
            }
            versions.push(version);
        }
        versions.sort();
        Ok(versions)
    }

    /// Delete a published version's tag.
    pub fn delete_module(&self, mv: &ModuleVersion) -> Result<()> {
        let located = self.locate(mv.path())?;
        let tag = located.tag(mv.version());
        located.store.delete_tag(&located.repo, &tag)
    }
}

struct Located {
    store: Arc<dyn OciStore>,
    repo: String,
    /// Non-empty only for the hash-as-tag encoding.
    tag_prefix: String,
}

impl Located {
    fn tag(&self, version: &Version) -> String {
        format!("{}{}", self.tag_prefix, version.as_str())
    }

    fn version_of_tag<'a>(&self, tag: &'a str) -> Option<&'a str> {
        if self.tag_prefix.is_empty() {
            Some(tag)
        } else {
            tag.strip_prefix(self.tag_prefix.as_str())
        }
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RegistryError::Cancelled);
    }
    Ok(())
}

fn join_repo(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}

fn path_hash(base_path: &str) -> String {
    digest_of(base_path.as_bytes())
        .trim_start_matches("sha256:")
        .to_string()
}

fn check_module_manifest(repo: &str, tag: &str, manifest: &OciManifest) -> Result<()> {
    let bad = |message: String| RegistryError::BadManifest {
        repo: repo.to_string(),
        tag: tag.to_string(),
        message,
    };
    if manifest.schema_version != 2 {
        return Err(bad(format!(
            "unsupported manifest schema version {}",
            manifest.schema_version
        )));
    }
    if manifest.config.media_type != MODULE_ARTIFACT_TYPE {
        return Err(bad(format!(
            "not a module artifact (config media type {:?})",
            manifest.config.media_type
        )));
    }
    if manifest.layers.len() != 2 {
        return Err(bad(format!(
            "expected 2 layers, found {}",
            manifest.layers.len()
        )));
    }
    if manifest.layers[0].media_type != ZIP_MEDIA_TYPE {
        return Err(bad(format!(
            "layer 0 has media type {:?}, want {ZIP_MEDIA_TYPE:?}",
            manifest.layers[0].media_type
        )));
    }
    if manifest.layers[1].media_type != MODULE_FILE_MEDIA_TYPE {
        return Err(bad(format!(
            "layer 1 has media type {:?}, want {MODULE_FILE_MEDIA_TYPE:?}",
            manifest.layers[1].media_type
        )));
    }
    Ok(())
}

/// A fetched module version: its manifest plus lazy access to both layers.
///
/// Layer fetches observe the cancellation token the handle was resolved
/// with.
impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("repo", &self.repo)
            .field("manifest", &self.manifest)
            .finish()
    }
}

pub struct ModuleHandle {
    store: Arc<dyn OciStore>,
    repo: String,
    manifest: OciManifest,
    cancel: CancelToken,
}

impl ModuleHandle {
    /// The raw `cue.mod/module.cue` bytes (layer 1).
    pub fn module_file(&self) -> Result<Vec<u8>> {
        self.fetch_layer(&self.manifest.layers[1])
    }

    /// The zip archive bytes (layer 0).
    pub fn zip(&self) -> Result<Vec<u8>> {
        self.fetch_layer(&self.manifest.layers[0])
    }

    pub fn manifest(&self) -> &OciManifest {
        &self.manifest
    }

    fn fetch_layer(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        check_cancel(&self.cancel)?;
        let data = self.store.blob(&self.repo, &desc.digest)?;
        check_cancel(&self.cancel)?;
        let actual = digest_of(&data);
        if actual != desc.digest {
            return Err(RegistryError::DigestMismatch {
                expected: desc.digest.clone(),
                actual,
            });
        }
        Ok(data)
    }
}
