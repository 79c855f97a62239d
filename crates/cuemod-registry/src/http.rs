//! HTTP backend speaking the OCI distribution API.
//!
//! Blocking I/O over `ureq`; concurrency comes from the loader's worker
//! pool. Authentication schemes are out of scope: requests carry no
//! credentials.

use std::io::Read;

use tracing::debug;
use url::Url;

use crate::error::{RegistryError, Result};
use crate::oci::{digest_of, Descriptor, OciManifest, OciStore, OCI_MANIFEST_MEDIA_TYPE};
use crate::resolver::RegistryLocation;

/// An OCI registry reached over HTTP(S).
pub struct HttpStore {
    base: Url,
    host: String,
}

impl HttpStore {
    /// Create a store for the given registry location. The URL scheme
    /// follows the location's security setting.
    pub fn new(location: &RegistryLocation) -> Result<Self> {
        let scheme = if location.insecure { "http" } else { "https" };
        let base = Url::parse(&format!("{scheme}://{}/", location.host)).map_err(|e| {
            RegistryError::Config {
                message: format!("invalid registry host {:?}: {e}", location.host),
            }
        })?;
        Ok(HttpStore {
            base,
            host: location.host.clone(),
        })
    }

    fn url(&self, repo: &str, suffix: &str) -> Result<Url> {
        self.base
            .join(&format!("v2/{repo}/{suffix}"))
            .map_err(|e| RegistryError::Transport {
                message: format!("building URL for {repo}/{suffix}: {e}"),
            })
    }

    fn not_found(&self, repo: &str, what: impl Into<String>) -> RegistryError {
        RegistryError::NotFound {
            repo: repo.to_string(),
            what: what.into(),
        }
    }

    fn transport(&self, context: &str, err: ureq::Error) -> RegistryError {
        RegistryError::Transport {
            message: format!("{context} ({}): {err}", self.host),
        }
    }
}

fn read_body(resp: ureq::http::Response<ureq::Body>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut buf)
        .map_err(|e| RegistryError::Transport {
            message: format!("reading response body: {e}"),
        })?;
    Ok(buf)
}

fn is_status(err: &ureq::Error, code: u16) -> bool {
    matches!(err, ureq::Error::StatusCode(c) if *c == code)
}

impl OciStore for HttpStore {
    fn push_blob(&self, repo: &str, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let digest = digest_of(data);
        let desc = Descriptor {
            media_type: media_type.to_string(),
            digest: digest.clone(),
            size: data.len() as u64,
        };

        // An already-present blob need not be uploaded again.
        let head = self.url(repo, &format!("blobs/{digest}"))?;
        match ureq::head(head.as_str()).call() {
            Ok(_) => {
                debug!(repo, %digest, "blob already present");
                return Ok(desc);
            }
            Err(err) if is_status(&err, 404) => {}
            Err(err) => return Err(self.transport("checking blob", err)),
        }

        let start = self.url(repo, "blobs/uploads/")?;
        let resp = ureq::post(start.as_str())
            .send_empty()
            .map_err(|err| self.transport("starting blob upload", err))?;
        let location = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::Transport {
                message: "blob upload response missing Location header".to_string(),
            })?;
        let mut upload = self
            .base
            .join(location)
            .map_err(|e| RegistryError::Transport {
                message: format!("bad upload location {location:?}: {e}"),
            })?;
        upload
            .query_pairs_mut()
            .append_pair("digest", &digest);

        ureq::put(upload.as_str())
            .header("content-type", "application/octet-stream")
            .send(data)
            .map_err(|err| self.transport("uploading blob", err))?;
        debug!(repo, %digest, size = data.len(), "pushed blob");
        Ok(desc)
    }

    fn blob(&self, repo: &str, digest: &str) -> Result<Vec<u8>> {
        let url = self.url(repo, &format!("blobs/{digest}"))?;
        let resp = match ureq::get(url.as_str()).call() {
            Ok(resp) => resp,
            Err(err) if is_status(&err, 404) => {
                return Err(self.not_found(repo, format!("blob {digest}")))
            }
            Err(err) => return Err(self.transport("fetching blob", err)),
        };
        let data = read_body(resp)?;
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
        let url = self.url(repo, &format!("manifests/{tag}"))?;
        ureq::put(url.as_str())
            .header("content-type", OCI_MANIFEST_MEDIA_TYPE)
            .send(&data[..])
            .map_err(|err| self.transport("pushing manifest", err))?;
        debug!(repo, tag, "pushed manifest");
        Ok(Descriptor {
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            digest: digest_of(&data),
            size: data.len() as u64,
        })
    }

    fn resolve_tag(&self, repo: &str, tag: &str) -> Result<Descriptor> {
        let url = self.url(repo, &format!("manifests/{tag}"))?;
        let resp = match ureq::head(url.as_str())
            .header("accept", OCI_MANIFEST_MEDIA_TYPE)
            .call()
        {
            Ok(resp) => resp,
            Err(err) if is_status(&err, 404) => {
                return Err(self.not_found(repo, format!("tag {tag:?}")))
            }
            Err(err) => return Err(self.transport("resolving tag", err)),
        };
        let headers = resp.headers();
        let digest = headers
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let size = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        match (digest, size) {
            (Some(digest), Some(size)) => Ok(Descriptor {
                media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
                digest,
                size,
            }),
            _ => {
                // Registries that omit the digest header get a full fetch.
                let data = match ureq::get(url.as_str())
                    .header("accept", OCI_MANIFEST_MEDIA_TYPE)
                    .call()
                {
                    Ok(resp) => read_body(resp)?,
                    Err(err) if is_status(&err, 404) => {
                        return Err(self.not_found(repo, format!("tag {tag:?}")))
                    }
                    Err(err) => return Err(self.transport("resolving tag", err)),
                };
                Ok(Descriptor {
                    media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
                    digest: digest_of(&data),
                    size: data.len() as u64,
                })
            }
        }
    }

    fn manifest(&self, repo: &str, tag: &str) -> Result<OciManifest> {
        let url = self.url(repo, &format!("manifests/{tag}"))?;
        let resp = match ureq::get(url.as_str())
            .header("accept", OCI_MANIFEST_MEDIA_TYPE)
            .call()
        {
            Ok(resp) => resp,
            Err(err) if is_status(&err, 404) => {
                return Err(self.not_found(repo, format!("tag {tag:?}")))
            }
            Err(err) => return Err(self.transport("fetching manifest", err)),
        };
        let data = read_body(resp)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn tags(&self, repo: &str) -> Result<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct TagList {
            #[serde(default)]
            tags: Vec<String>,
        }
        let url = self.url(repo, "tags/list")?;
        let resp = match ureq::get(url.as_str()).call() {
            Ok(resp) => resp,
            Err(err) if is_status(&err, 404) => return Ok(Vec::new()),
            Err(err) => return Err(self.transport("listing tags", err)),
        };
        let data = read_body(resp)?;
        let list: TagList = serde_json::from_slice(&data)?;
        let mut tags = list.tags;
        tags.sort();
        Ok(tags)
    }

    fn delete_tag(&self, repo: &str, tag: &str) -> Result<()> {
        let url = self.url(repo, &format!("manifests/{tag}"))?;
        match ureq::delete(url.as_str()).call() {
            Ok(_) => Ok(()),
            Err(err) if is_status(&err, 404) => {
                Err(self.not_found(repo, format!("tag {tag:?}")))
            }
            Err(err) => Err(self.transport("deleting tag", err)),
        }
    }
}
