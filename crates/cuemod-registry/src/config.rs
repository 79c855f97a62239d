//! Structured registry configuration.
//!
//! The richer alternative to the flat routing string is itself written in
//! data-mode configuration syntax and parsed by a hand-written validator —
//! never by evaluating the full language:
//!
//! ```text
//! defaultRegistry: {
//!     registry: "registry.example/offset"
//! }
//! moduleRegistries: {
//!     "foo.com": {
//!         registry: "internal.example+insecure"
//!         pathEncoding: "hashAsRepo"
//!     }
//!     "private.com": "none"
//! }
//! ```
//!
//! `pathEncoding` selects how module paths become repository names and
//! tags; once a registry has published modules under one encoding, changing
//! it orphans them, so the choice is compatibility-critical.

use std::collections::HashMap;

use cuemod_parse::{parse_data, Value};

use crate::error::{RegistryError, Result};
use crate::resolver::{parse_target, PathEncoding, Resolver, Target};

/// Parse the structured configuration form into a resolver.
pub fn parse_registry_config(data: &[u8]) -> Result<Resolver> {
    let root = parse_data(data).map_err(|e| RegistryError::Config {
        message: e.to_string(),
    })?;

    let mut security = HashMap::new();
    let mut rules = Vec::new();
    let mut catch_all = None;

    for (name, value) in root.as_struct().unwrap_or(&[]) {
        match name.as_str() {
            "defaultRegistry" => {
                catch_all = Some(parse_entry("defaultRegistry", value, &mut security)?);
            }
            "moduleRegistries" => {
                let entries =
                    value.as_struct().ok_or_else(|| RegistryError::Config {
                        message: format!(
                            "moduleRegistries: must be a struct, found {}",
                            value.kind()
                        ),
                    })?;
                for (prefix, entry) in entries {
                    if prefix.is_empty() {
                        return Err(RegistryError::Config {
                            message: "moduleRegistries: empty module prefix".to_string(),
                        });
                    }
                    let field = format!("moduleRegistries.{prefix:?}");
                    let target = parse_entry(&field, entry, &mut security)?;
                    rules.push((prefix.clone(), target));
                }
            }
            other => {
                return Err(RegistryError::Config {
                    message: format!("unknown field {other:?}"),
                })
            }
        }
    }

    let catch_all = catch_all.ok_or_else(|| RegistryError::Config {
        message: "defaultRegistry is required".to_string(),
    })?;
    Ok(Resolver::from_rules(rules, catch_all))
}

fn parse_entry(
    field: &str,
    value: &Value,
    security: &mut HashMap<String, bool>,
) -> Result<Target> {
    // A bare string is shorthand for `{ registry: ... }`.
    if let Some(s) = value.as_str() {
        return parse_target(s, security);
    }
    let fields = value.as_struct().ok_or_else(|| RegistryError::Config {
        message: format!("{field}: must be a struct or string, found {}", value.kind()),
    })?;

    let mut reference = None;
    let mut encoding = PathEncoding::Path;
    for (name, v) in fields {
        match name.as_str() {
            "registry" => {
                reference = Some(v.as_str().ok_or_else(|| RegistryError::Config {
                    message: format!("{field}.registry: must be a string"),
                })?);
            }
            "pathEncoding" => {
                let s = v.as_str().ok_or_else(|| RegistryError::Config {
                    message: format!("{field}.pathEncoding: must be a string"),
                })?;
                encoding = match s {
                    "path" => PathEncoding::Path,
                    "hashAsRepo" => PathEncoding::HashAsRepo,
                    "hashAsTag" => PathEncoding::HashAsTag,
                    other => {
                        return Err(RegistryError::Config {
                            message: format!(
                                "{field}.pathEncoding: unknown encoding {other:?}"
                            ),
                        })
                    }
                };
            }
            other => {
                return Err(RegistryError::Config {
                    message: format!("{field}.{other}: unknown field"),
                })
            }
        }
    }

    let reference = reference.ok_or_else(|| RegistryError::Config {
        message: format!("{field}.registry: field is required"),
    })?;
    let target = parse_target(reference, security)?;
    Ok(match target {
        Target::Registry(mut loc) => {
            loc.path_encoding = encoding;
            Target::Registry(loc)
        }
        Target::None => Target::None,
    })
}
