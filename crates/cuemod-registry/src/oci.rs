//! OCI wire types and the backend store trait.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Config media type marking an OCI manifest as a CUE module artifact.
pub const MODULE_ARTIFACT_TYPE: &str = "application/vnd.cue.module.v1+json";

/// Media type of the layer holding the raw `cue.mod/module.cue` bytes.
pub const MODULE_FILE_MEDIA_TYPE: &str = "application/vnd.cue.modulefile.v1";

/// Media type of the layer holding the module's zip archive.
pub const ZIP_MEDIA_TYPE: &str = "application/zip";

/// Media type of the OCI image manifest itself.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// A content descriptor: media type, digest, and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    /// `sha256:<hex>`.
    pub digest: String,
    pub size: u64,
}

/// An OCI image manifest, schema version 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl OciManifest {
    /// A new schema-2 manifest with the given config and layers.
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        OciManifest {
            schema_version: 2,
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            config,
            layers,
        }
    }
}

/// Compute the canonical `sha256:<hex>` digest of a byte slice.
pub fn digest_of(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut hex = String::with_capacity(7 + out.len() * 2);
    hex.push_str("sha256:");
    for b in out {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}

/// An OCI-style content-addressed store.
///
/// Implementations provide blob and manifest storage against different
/// backends; the module-aware [`crate::Client`] layers the module protocol
/// on top.
pub trait OciStore: Send + Sync {
    /// Push a blob, returning its descriptor. Pushing an already-present
    /// blob is a no-op.
    fn push_blob(&self, repo: &str, media_type: &str, data: &[u8]) -> Result<Descriptor>;

    /// Fetch a blob by digest.
    fn blob(&self, repo: &str, digest: &str) -> Result<Vec<u8>>;

    /// Push a manifest and tag it.
    fn push_manifest(&self, repo: &str, tag: &str, manifest: &OciManifest) -> Result<Descriptor>;

    /// Resolve a tag to the descriptor of its manifest.
    fn resolve_tag(&self, repo: &str, tag: &str) -> Result<Descriptor>;

    /// Fetch the manifest a tag points at.
    fn manifest(&self, repo: &str, tag: &str) -> Result<OciManifest>;

    /// List all tags in a repository, in lexical order. An unknown
    /// repository yields an empty list.
    fn tags(&self, repo: &str) -> Result<Vec<String>>;

    /// Delete a tag.
    fn delete_tag(&self, repo: &str, tag: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_value() {
        assert_eq!(
            digest_of(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn manifest_serialises_camel_case() {
        let m = OciManifest::new(
            Descriptor {
                media_type: MODULE_ARTIFACT_TYPE.to_string(),
                digest: digest_of(b"{}"),
                size: 2,
            },
            vec![],
        );
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"schemaVersion\":2"));
        assert!(json.contains("\"mediaType\""));
        let back: OciManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
