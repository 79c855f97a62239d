//! `cue.mod/module.cue` manifest parsing.
//!
//! Three modes cover the three places manifests come from:
//!
//! - **Strict**: published archives. Every `deps` key carries an explicit
//!   major suffix and the `module` field carries only the major suffix.
//! - **NonStrict**: the main module. Majors may be omitted (inferred from
//!   the dependency's version string) and non-canonical semvers are
//!   canonicalised at load time; the file on disk is never rewritten.
//! - **Legacy**: archives published before the schema existed. Only the
//!   `module` field is read.
//!
//! Validation errors carry the dotted field path of the offending key.

use std::collections::BTreeMap;

use cuemod_parse::{parse_data, Value};

use crate::error::{ModuleError, Result};
use crate::path::ModulePath;
use crate::version::{ModuleVersion, Version};

/// How strictly to interpret a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Strict,
    NonStrict,
    Legacy,
}

/// A single dependency entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dep {
    /// The selected version. Its major always matches the dep key's suffix.
    pub version: Version,
    /// Whether this major is the default for version-less import paths.
    pub default: bool,
}

/// The `source` field of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    kind: String,
}

impl Source {
    /// One of `git` or `self`.
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// A parsed `cue.mod/module.cue`.
#[derive(Debug, Clone)]
pub struct Manifest {
    module: Option<ModulePath>,
    language_version: Option<Version>,
    deps: BTreeMap<ModulePath, Dep>,
    default_majors: BTreeMap<String, u32>,
    source: Option<Source>,
    custom: BTreeMap<String, Value>,
    warnings: Vec<String>,
}

impl Manifest {
    /// Parse manifest bytes under the given mode.
    pub fn parse(data: &[u8], mode: ParseMode) -> Result<Manifest> {
        let root = parse_data(data)?;
        let fields = root.as_struct().unwrap_or(&[]);

        let mut m = Manifest {
            module: None,
            language_version: None,
            deps: BTreeMap::new(),
            default_majors: BTreeMap::new(),
            source: None,
            custom: BTreeMap::new(),
            warnings: Vec::new(),
        };

        if mode == ParseMode::Legacy {
            if let Some(v) = root.field("module") {
                let s = v.as_str().ok_or_else(|| ModuleError::ManifestField {
                    field: "module".to_string(),
                    message: format!("must be a string, found {}", v.kind()),
                })?;
                if !s.is_empty() {
                    m.module = Some(ModulePath::parse(s)?);
                }
            }
            return Ok(m);
        }

        for (name, value) in fields {
            match name.as_str() {
                "module" => m.parse_module_field(value, mode)?,
                "language" => m.parse_language_field(value, mode)?,
                "deps" => m.parse_deps_field(value, mode)?,
                "source" => m.parse_source_field(value, mode)?,
                "custom" => m.parse_custom_field(value)?,
                other => {
                    if mode == ParseMode::Strict {
                        return Err(ModuleError::ManifestField {
                            field: other.to_string(),
                            message: "unknown field".to_string(),
                        });
                    }
                    m.warnings.push(format!("unknown field {other:?} ignored"));
                }
            }
        }

        if mode == ParseMode::Strict && m.module.is_none() {
            return Err(ModuleError::ManifestField {
                field: "module".to_string(),
                message: "field is required".to_string(),
            });
        }
        Ok(m)
    }

    fn parse_module_field(&mut self, value: &Value, mode: ParseMode) -> Result<()> {
        let s = value.as_str().ok_or_else(|| ModuleError::ManifestField {
            field: "module".to_string(),
            message: format!("must be a string, found {}", value.kind()),
        })?;
        if s.is_empty() {
            if mode == ParseMode::Strict {
                return Err(ModuleError::ManifestField {
                    field: "module".to_string(),
                    message: "empty module path".to_string(),
                });
            }
            // Permitted for the main module only; the path stays unset.
            return Ok(());
        }
        let path = match mode {
            ParseMode::Strict => ModulePath::parse_qualified(s)?,
            _ => {
                let p = ModulePath::parse(s)?;
                match p.major() {
                    Some(_) => p,
                    // A missing suffix on the main module means v0.
                    None => p.with_major(0),
                }
            }
        };
        self.module = Some(path);
        Ok(())
    }

    fn parse_language_field(&mut self, value: &Value, mode: ParseMode) -> Result<()> {
        let fields = value.as_struct().ok_or_else(|| ModuleError::ManifestField {
            field: "language".to_string(),
            message: format!("must be a struct, found {}", value.kind()),
        })?;
        for (name, v) in fields {
            match name.as_str() {
                "version" => {
                    let s = v.as_str().ok_or_else(|| ModuleError::ManifestField {
                        field: "language.version".to_string(),
                        message: format!("must be a string, found {}", v.kind()),
                    })?;
                    let version = parse_version(s, "language.version", mode)?;
                    self.language_version = Some(version);
                }
                other => self.unknown_field(&format!("language.{other}"), mode)?,
            }
        }
        Ok(())
    }

    fn parse_deps_field(&mut self, value: &Value, mode: ParseMode) -> Result<()> {
        let entries = value.as_struct().ok_or_else(|| ModuleError::ManifestField {
            field: "deps".to_string(),
            message: format!("must be a struct, found {}", value.kind()),
        })?;
        for (key, entry) in entries {
            let field = format!("deps.{key:?}");
            let path = ModulePath::parse(key).map_err(|e| ModuleError::ManifestField {
                field: field.clone(),
                message: e.to_string(),
            })?;
            if mode == ParseMode::Strict && path.major().is_none() {
                return Err(ModuleError::ManifestField {
                    field,
                    message: "missing major version suffix".to_string(),
                });
            }
            let dep_fields =
                entry.as_struct().ok_or_else(|| ModuleError::ManifestField {
                    field: field.clone(),
                    message: format!("must be a struct, found {}", entry.kind()),
                })?;
            let mut version = None;
            let mut default = false;
            for (name, v) in dep_fields {
                match name.as_str() {
                    "v" => {
                        let s = v.as_str().ok_or_else(|| ModuleError::ManifestField {
                            field: format!("{field}.v"),
                            message: format!("must be a string, found {}", v.kind()),
                        })?;
                        version = Some(parse_version(s, &format!("{field}.v"), mode)?);
                    }
                    "default" => {
                        default =
                            v.as_bool().ok_or_else(|| ModuleError::ManifestField {
                                field: format!("{field}.default"),
                                message: format!("must be a bool, found {}", v.kind()),
                            })?;
                    }
                    other => self.unknown_field(&format!("{field}.{other}"), mode)?,
                }
            }
            let version = version.ok_or_else(|| ModuleError::ManifestField {
                field: format!("{field}.v"),
                message: "field is required".to_string(),
            })?;
            let path = match path.major() {
                Some(major) => {
                    if major != version.major() {
                        return Err(ModuleError::ManifestField {
                            field: format!("{field}.v"),
                            message: format!(
                                "version {version} does not match major version suffix"
                            ),
                        });
                    }
                    path
                }
                // Non-strict keys may omit the major; infer it from the
                // version string.
                None => path.with_major(version.major()),
            };
            if default {
                let base = path.base_path().to_string();
                let major = path.major().unwrap_or(0);
                if let Some(&existing) = self.default_majors.get(&base) {
                    if existing != major {
                        return Err(ModuleError::DefaultMajorConflict {
                            base,
                            first: format!("v{existing}"),
                            second: format!("v{major}"),
                        });
                    }
                }
                self.default_majors.insert(base, major);
            }
            self.deps.insert(path, Dep { version, default });
        }
        Ok(())
    }

    fn parse_source_field(&mut self, value: &Value, mode: ParseMode) -> Result<()> {
        let fields = value.as_struct().ok_or_else(|| ModuleError::ManifestField {
            field: "source".to_string(),
            message: format!("must be a struct, found {}", value.kind()),
        })?;
        for (name, v) in fields {
            match name.as_str() {
                "kind" => {
                    let kind = v.as_str().ok_or_else(|| ModuleError::ManifestField {
                        field: "source.kind".to_string(),
                        message: format!("must be a string, found {}", v.kind()),
                    })?;
                    if kind != "git" && kind != "self" {
                        return Err(ModuleError::ManifestField {
                            field: "source.kind".to_string(),
                            message: format!("unknown source kind {kind:?}"),
                        });
                    }
                    self.source = Some(Source {
                        kind: kind.to_string(),
                    });
                }
                other => self.unknown_field(&format!("source.{other}"), mode)?,
            }
        }
        Ok(())
    }

    fn parse_custom_field(&mut self, value: &Value) -> Result<()> {
        let fields = value.as_struct().ok_or_else(|| ModuleError::ManifestField {
            field: "custom".to_string(),
            message: format!("must be a struct, found {}", value.kind()),
        })?;
        for (ns, v) in fields {
            self.custom.insert(ns.clone(), v.clone());
        }
        Ok(())
    }

    fn unknown_field(&mut self, field: &str, mode: ParseMode) -> Result<()> {
        if mode == ParseMode::Strict {
            return Err(ModuleError::ManifestField {
                field: field.to_string(),
                message: "unknown field".to_string(),
            });
        }
        self.warnings.push(format!("unknown field {field:?} ignored"));
        Ok(())
    }

    /// The declared module path. `None` only for a main module parsed in
    /// non-strict or legacy mode.
    pub fn module(&self) -> Option<&ModulePath> {
        self.module.as_ref()
    }

    pub fn language_version(&self) -> Option<&Version> {
        self.language_version.as_ref()
    }

    /// Direct dependencies, keyed by fully-qualified module path.
    pub fn deps(&self) -> &BTreeMap<ModulePath, Dep> {
        &self.deps
    }

    /// Base path → the single major version marked `default: true`.
    pub fn default_majors(&self) -> &BTreeMap<String, u32> {
        &self.default_majors
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn custom(&self) -> &BTreeMap<String, Value> {
        &self.custom
    }

    /// Warnings recorded during a non-strict parse.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// The sorted direct requirement set derived from `deps`.
    pub fn direct_requirements(&self) -> Vec<ModuleVersion> {
        self.deps
            .iter()
            .map(|(path, dep)| {
                ModuleVersion::new(path.clone(), dep.version.clone())
                    .expect("dep major checked at parse time")
            })
            .collect()
    }
}

fn parse_version(s: &str, field: &str, mode: ParseMode) -> Result<Version> {
    let parsed = match mode {
        ParseMode::Strict => Version::parse(s),
        _ => Version::parse_lax(s),
    };
    parsed.map_err(|e| ModuleError::ManifestField {
        field: field.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &[u8] = br#"
module: "example.com/m@v0"
language: {
	version: "v0.9.0"
}
deps: {
	"foo.com/bar@v1": {
		v: "v1.2.3"
	}
	"baz.org/qux@v0": {
		v: "v0.4.0"
		default: true
	}
}
source: {
	kind: "git"
}
"#;

    #[test]
    fn parse_full_manifest() {
        let m = Manifest::parse(FULL, ParseMode::Strict).unwrap();
        assert_eq!(m.module().unwrap().to_string(), "example.com/m@v0");
        assert_eq!(m.language_version().unwrap().as_str(), "v0.9.0");
        assert_eq!(m.deps().len(), 2);
        assert_eq!(m.source().unwrap().kind(), "git");
        assert_eq!(m.default_majors().get("baz.org/qux"), Some(&0));
        assert!(m.warnings().is_empty());
    }

    #[test]
    fn direct_requirements_sorted() {
        let m = Manifest::parse(FULL, ParseMode::Strict).unwrap();
        let reqs = m.direct_requirements();
        assert_eq!(reqs[0].to_string(), "baz.org/qux@v0.4.0");
        assert_eq!(reqs[1].to_string(), "foo.com/bar@v1.2.3");
    }

    #[test]
    fn strict_requires_dep_major() {
        let src = br#"
module: "example.com/m@v0"
deps: {
	"foo.com/bar": {
		v: "v1.2.3"
	}
}
"#;
        let err = Manifest::parse(src, ParseMode::Strict).unwrap_err();
        assert!(matches!(err, ModuleError::ManifestField { ref field, .. }
            if field.contains("foo.com/bar")));

        let m = Manifest::parse(src, ParseMode::NonStrict).unwrap();
        let (path, _) = m.deps().iter().next().unwrap();
        assert_eq!(path.to_string(), "foo.com/bar@v1");
    }

    #[test]
    fn dep_version_major_must_match_key() {
        let src = br#"
module: "example.com/m@v0"
deps: {
	"foo.com/bar@v1": {
		v: "v2.0.0"
	}
}
"#;
        let err = Manifest::parse(src, ParseMode::Strict).unwrap_err();
        assert!(matches!(err, ModuleError::ManifestField { ref field, .. }
            if field.ends_with(".v")));
    }

    #[test]
    fn strict_module_field_rejects_minor() {
        let src = b"module: \"example.com/m@v1.2\"\n";
        assert!(Manifest::parse(src, ParseMode::Strict).is_err());
    }

    #[test]
    fn empty_module_path_by_mode() {
        let src = b"module: \"\"\n";
        assert!(Manifest::parse(src, ParseMode::Strict).is_err());
        let m = Manifest::parse(src, ParseMode::NonStrict).unwrap();
        assert!(m.module().is_none());
        let m = Manifest::parse(src, ParseMode::Legacy).unwrap();
        assert!(m.module().is_none());
    }

    #[test]
    fn missing_module_field() {
        assert!(Manifest::parse(b"", ParseMode::Strict).is_err());
        assert!(Manifest::parse(b"", ParseMode::NonStrict).unwrap().module().is_none());
    }

    #[test]
    fn non_strict_infers_v0_for_main_module() {
        let m = Manifest::parse(b"module: \"example.com/m\"\n", ParseMode::NonStrict).unwrap();
        assert_eq!(m.module().unwrap().to_string(), "example.com/m@v0");
    }

    #[test]
    fn non_strict_canonicalises_versions() {
        let src = br#"
module: "example.com/m@v0"
deps: {
	"foo.com/bar@v1": {
		v: "v1.2"
	}
}
"#;
        assert!(Manifest::parse(src, ParseMode::Strict).is_err());
        let m = Manifest::parse(src, ParseMode::NonStrict).unwrap();
        let dep = m.deps().values().next().unwrap();
        assert_eq!(dep.version.as_str(), "v1.2.0");
    }

    #[test]
    fn unknown_top_field_by_mode() {
        let src = b"module: \"example.com/m@v0\"\nmystery: 1\n";
        assert!(Manifest::parse(src, ParseMode::Strict).is_err());
        let m = Manifest::parse(src, ParseMode::NonStrict).unwrap();
        assert_eq!(m.warnings().len(), 1);
        assert!(m.warnings()[0].contains("mystery"));
    }

    #[test]
    fn default_major_conflict_rejected() {
        let src = br#"
module: "example.com/m@v0"
deps: {
	"foo.com/bar@v1": {
		v: "v1.2.3"
		default: true
	}
	"foo.com/bar@v2": {
		v: "v2.0.0"
		default: true
	}
}
"#;
        let err = Manifest::parse(src, ParseMode::NonStrict).unwrap_err();
        assert!(matches!(err, ModuleError::DefaultMajorConflict { .. }));
    }

    #[test]
    fn two_majors_without_defaults_coexist() {
        let src = br#"
module: "example.com/m@v0"
deps: {
	"foo.com/bar@v1": {
		v: "v1.2.3"
	}
	"foo.com/bar@v2": {
		v: "v2.0.0"
		default: true
	}
}
"#;
        let m = Manifest::parse(src, ParseMode::NonStrict).unwrap();
        assert_eq!(m.deps().len(), 2);
        assert_eq!(m.default_majors().get("foo.com/bar"), Some(&2));
    }

    #[test]
    fn source_kind_validated() {
        let bad = b"module: \"example.com/m@v0\"\nsource: {kind: \"svn\"}\n";
        assert!(Manifest::parse(bad, ParseMode::NonStrict).is_err());
        let good = b"module: \"example.com/m@v0\"\nsource: {kind: \"self\"}\n";
        let m = Manifest::parse(good, ParseMode::NonStrict).unwrap();
        assert_eq!(m.source().unwrap().kind(), "self");
    }

    #[test]
    fn legacy_reads_only_module() {
        let src = b"module: \"example.com/m@v0\"\nanything: {goes: \"here\"}\n";
        let m = Manifest::parse(src, ParseMode::Legacy).unwrap();
        assert_eq!(m.module().unwrap().to_string(), "example.com/m@v0");
        assert!(m.deps().is_empty());
    }

    #[test]
    fn custom_namespaces_preserved() {
        let src = br#"
module: "example.com/m@v0"
custom: {
	"example.com": {
		setting: true
	}
}
"#;
        let m = Manifest::parse(src, ParseMode::NonStrict).unwrap();
        assert!(m.custom().contains_key("example.com"));
    }

    #[test]
    fn dep_missing_version_field() {
        let src = b"module: \"a.com/m@v0\"\ndeps: {\"b.com/x@v0\": {default: true}}\n";
        let err = Manifest::parse(src, ParseMode::NonStrict).unwrap_err();
        assert!(matches!(err, ModuleError::ManifestField { ref field, .. }
            if field.ends_with(".v")));
    }
}
