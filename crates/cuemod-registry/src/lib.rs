//! Registry client for CUE modules.
//!
//! Modules are stored in OCI-style content-addressed registries: a module
//! version is an OCI manifest whose config media type marks it as a module
//! artifact and whose two layers are the zip archive and the raw
//! `cue.mod/module.cue`. A resolver maps module-path prefixes to concrete
//! registry locations; the client multiplexes over per-host backends.

pub mod cancel;
pub mod client;
pub mod config;
pub mod dir;
pub mod error;
pub mod http;
pub mod oci;
pub mod resolver;

pub use cancel::CancelToken;
pub use client::{Client, ModuleHandle};
pub use config::parse_registry_config;
pub use dir::DirStore;
pub use error::{RegistryError, Result};
pub use http::HttpStore;
pub use oci::{
    digest_of, Descriptor, OciManifest, OciStore, MODULE_ARTIFACT_TYPE, MODULE_FILE_MEDIA_TYPE,
    OCI_MANIFEST_MEDIA_TYPE, ZIP_MEDIA_TYPE,
};
pub use resolver::{PathEncoding, RegistryLocation, Resolver};
