//! A filesystem-backed OCI store for development and testing.
//!
//! Layout:
//! ```text
//! <root>/
//!   <repository...>/
//!     blobs/<hex>            — blob content, named by its sha256
//!     manifests/<tag>        — manifest JSON
//! ```

use std::path::{Path, PathBuf};

use crate::error::{RegistryError, Result};
use crate::oci::{digest_of, Descriptor, OciManifest, OciStore, OCI_MANIFEST_MEDIA_TYPE};

/// A local filesystem registry store.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo_dir(&self, repo: &str) -> PathBuf {
        self.root.join(repo)
    }

    fn not_found(repo: &str, what: impl Into<String>) -> RegistryError {
        RegistryError::NotFound {
            repo: repo.to_string(),
            what: what.into(),
        }
    }
}

impl OciStore for DirStore {
    fn push_blob(&self, repo: &str, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let digest = digest_of(data);
        let hex = digest.trim_start_matches("sha256:");
        let dir = self.repo_dir(repo).join("blobs");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(hex);
        if !path.is_file() {
            std::fs::write(&path, data)?;
        }
        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest,
            size: data.len() as u64,
        })
    }

    fn blob(&self, repo: &str, digest: &str) -> Result<Vec<u8>> {
        let hex = digest.trim_start_matches("sha256:");
        let path = self.repo_dir(repo).join("blobs").join(hex);
        if !path.is_file() {
            return Err(Self::not_found(repo, format!("blob {digest}")));
        }
        let data = std::fs::read(&path)?;
        let actual = digest_of(&data);
        if actual != digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }
        Ok(data)
    }

    fn push_manifest(&self, repo: &str, tag: &str, manifest: &OciManifest) -> Result<Descriptor> {
        let data = serde_json::to_vec(manifest)?;
        let dir = self.repo_dir(repo).join("manifests");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(tag), &data)?;
        Ok(Descriptor {
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            digest: digest_of(&data),
            size: data.len() as u64,
        })
    }

    fn resolve_tag(&self, repo: &str, tag: &str) -> Result<Descriptor> {
        let path = self.repo_dir(repo).join("manifests").join(tag);
        if !path.is_file() {
            return Err(Self::not_found(repo, format!("tag {tag:?}")));
        }
        let data = std::fs::read(&path)?;
        Ok(Descriptor {
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            digest: digest_of(&data),
            size: data.len() as u64,
        })
    }

    fn manifest(&self, repo: &str, tag: &str) -> Result<OciManifest> {
        let path = self.repo_dir(repo).join("manifests").join(tag);
        if !path.is_file() {
            return Err(Self::not_found(repo, format!("tag {tag:?}")));
        }
        let data = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn tags(&self, repo: &str) -> Result<Vec<String>> {
        let dir = self.repo_dir(repo).join("manifests");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut tags = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                tags.push(name.to_string());
            }
        }
        tags.sort();
        Ok(tags)
    }

    fn delete_tag(&self, repo: &str, tag: &str) -> Result<()> {
        let path = self.repo_dir(repo).join("manifests").join(tag);
        if !path.is_file() {
            return Err(Self::not_found(repo, format!("tag {tag:?}")));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }
}
