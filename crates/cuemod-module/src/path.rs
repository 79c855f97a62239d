//! Module and import paths.
//!
//! Path elements use the restricted character class `[A-Za-z0-9._~-]`. The
//! first element names a registry host, so it must contain a dot and may
//! not lead with `-`. Paths are case-escaped for on-disk and on-wire use:
//! each capital letter encodes as `!` followed by its lowercase form.

use std::fmt;
use std::str::FromStr;

use crate::error::{ModuleError, Result};

/// A module path, optionally qualified with an `@vN` major-version suffix.
///
/// `example.com/foo@v1` has base path `example.com/foo` and major `1`. The
/// fully-qualified form always carries the suffix; the unqualified form is
/// permitted where a major is implied elsewhere (legacy manifests, default
/// majors).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath {
    base: String,
    major: Option<u32>,
}

impl ModulePath {
    /// Parse a module path, accepting an optional major suffix.
    pub fn parse(s: &str) -> Result<Self> {
        let (base, major) = match s.rsplit_once('@') {
            Some((base, suffix)) => (base, Some(parse_major_suffix(s, suffix)?)),
            None => (s, None),
        };
        check_base_path(base)?;
        Ok(ModulePath {
            base: base.to_string(),
            major,
        })
    }

    /// Parse a module path, requiring the major suffix.
    pub fn parse_qualified(s: &str) -> Result<Self> {
        let p = Self::parse(s)?;
        if p.major.is_none() {
            return Err(ModuleError::InvalidPath {
                path: s.to_string(),
                reason: "missing major version suffix".to_string(),
            });
        }
        Ok(p)
    }

    /// The path without its major suffix.
    pub fn base_path(&self) -> &str {
        &self.base
    }

    /// The major version, if the path carries one.
    pub fn major(&self) -> Option<u32> {
        self.major
    }

    /// The same base path with the given major.
    pub fn with_major(&self, major: u32) -> Self {
        ModulePath {
            base: self.base.clone(),
            major: Some(major),
        }
    }

    /// The case-escaped rendering used for directory and repository names.
    pub fn escaped(&self) -> String {
        let mut out = escape_path(&self.base);
        if let Some(m) = self.major {
            out.push_str("@v");
            out.push_str(&m.to_string());
        }
        out
    }

    /// Whether `self` is a whole-path-element prefix of `path`.
    ///
    /// `foo.com/bar` is a prefix of `foo.com/bar/baz` but not of
    /// `foo.com/barbaz`.
    pub fn is_prefix_of(&self, path: &str) -> bool {
        path == self.base
            || (path.starts_with(&self.base)
                && path.as_bytes().get(self.base.len()) == Some(&b'/'))
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.major {
            Some(m) => write!(f, "{}@v{}", self.base, m),
            None => write!(f, "{}", self.base),
        }
    }
}

impl FromStr for ModulePath {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        ModulePath::parse(s)
    }
}

/// A package import path: a base path, an optional major, and a package
/// qualifier.
///
/// The qualifier names the package within the directory the path points at.
/// When the import string carries no explicit `:qualifier`, the qualifier
/// defaults to the final path element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportPath {
    base: String,
    major: Option<u32>,
    qualifier: String,
    explicit_qualifier: bool,
}

impl ImportPath {
    /// Parse an import path of the form `base[@vN][:qualifier]`.
    pub fn parse(s: &str) -> Result<Self> {
        let (rest, qualifier) = match s.rsplit_once(':') {
            Some((rest, q)) => (rest, Some(q)),
            None => (s, None),
        };
        let (base, major) = match rest.rsplit_once('@') {
            Some((base, suffix)) => (base, Some(parse_major_suffix(s, suffix)?)),
            None => (rest, None),
        };
        if base.is_empty() {
            return Err(ModuleError::InvalidPath {
                path: s.to_string(),
                reason: "empty path".to_string(),
            });
        }
        for element in base.split('/') {
            check_path_element(element).map_err(|reason| ModuleError::InvalidPath {
                path: s.to_string(),
                reason,
            })?;
        }
        let (qualifier, explicit) = match qualifier {
            Some(q) => {
                check_qualifier(s, q)?;
                (q.to_string(), true)
            }
            None => {
                let last = base.rsplit('/').next().unwrap_or(base);
                (last.to_string(), false)
            }
        };
        Ok(ImportPath {
            base: base.to_string(),
            major,
            qualifier,
            explicit_qualifier: explicit,
        })
    }

    /// The path without major suffix or qualifier.
    pub fn base_path(&self) -> &str {
        &self.base
    }

    pub fn major(&self) -> Option<u32> {
        self.major
    }

    /// The package qualifier (explicit or derived).
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Whether the qualifier was written explicitly in the import string.
    pub fn has_explicit_qualifier(&self) -> bool {
        self.explicit_qualifier
    }

    /// A copy of this path carrying the given major version.
    pub fn with_major(&self, major: u32) -> Self {
        let mut out = self.clone();
        out.major = Some(major);
        out
    }

    /// A package whose first path element contains no dot cannot live in any
    /// registry; the loader classifies it as belonging to the language's
    /// standard library.
    pub fn is_stdlib_like(&self) -> bool {
        match self.base.split('/').next() {
            Some(first) => !first.contains('.'),
            None => true,
        }
    }

    /// The canonical rendering: explicit major (when known) and explicit
    /// qualifier. This is the form the loader keys its package cache by.
    pub fn canonical(&self) -> String {
        let mut out = self.base.clone();
        if let Some(m) = self.major {
            out.push_str("@v");
            out.push_str(&m.to_string());
        }
        out.push(':');
        out.push_str(&self.qualifier);
        out
    }
}

impl fmt::Display for ImportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if let Some(m) = self.major {
            write!(f, "@v{m}")?;
        }
        if self.explicit_qualifier {
            write!(f, ":{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for ImportPath {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        ImportPath::parse(s)
    }
}

fn parse_major_suffix(whole: &str, suffix: &str) -> Result<u32> {
    let digits = suffix
        .strip_prefix('v')
        .ok_or_else(|| ModuleError::InvalidPath {
            path: whole.to_string(),
            reason: format!("major version suffix {suffix:?} must have the form vN"),
        })?;
    if digits.is_empty() || digits.chars().any(|c| !c.is_ascii_digit()) {
        return Err(ModuleError::InvalidPath {
            path: whole.to_string(),
            reason: format!("major version suffix {suffix:?} must have the form vN"),
        });
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(ModuleError::InvalidPath {
            path: whole.to_string(),
            reason: "major version suffix has leading zero".to_string(),
        });
    }
    digits.parse().map_err(|_| ModuleError::InvalidPath {
        path: whole.to_string(),
        reason: "major version suffix out of range".to_string(),
    })
}

fn check_base_path(base: &str) -> Result<()> {
    if base.is_empty() {
        return Err(ModuleError::InvalidPath {
            path: base.to_string(),
            reason: "empty path".to_string(),
        });
    }
    let mut elements = base.split('/');
    let first = elements.next().unwrap_or_default();
    check_path_element(first).map_err(|reason| ModuleError::InvalidPath {
        path: base.to_string(),
        reason,
    })?;
    if !first.contains('.') {
        return Err(ModuleError::InvalidPath {
            path: base.to_string(),
            reason: "first path element must contain a dot".to_string(),
        });
    }
    if first.starts_with('-') {
        return Err(ModuleError::InvalidPath {
            path: base.to_string(),
            reason: "first path element must not begin with '-'".to_string(),
        });
    }
    for element in elements {
        check_path_element(element).map_err(|reason| ModuleError::InvalidPath {
            path: base.to_string(),
            reason,
        })?;
    }
    Ok(())
}

/// Check a single path element against the module path character class.
pub fn check_path_element(element: &str) -> std::result::Result<(), String> {
    if element.is_empty() {
        return Err("empty path element".to_string());
    }
    for ch in element.chars() {
        let ok = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '~' | '-');
        if !ok {
            return Err(format!("invalid character {ch:?} in path element"));
        }
    }
    if element == "." || element == ".." {
        return Err(format!("path element {element:?} is not allowed"));
    }
    Ok(())
}

fn check_qualifier(whole: &str, q: &str) -> Result<()> {
    let mut chars = q.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        return Err(ModuleError::InvalidPath {
            path: whole.to_string(),
            reason: format!("invalid package qualifier {q:?}"),
        });
    }
    Ok(())
}

/// Case-escape a path: each capital letter becomes `!` followed by its
/// lowercase form. Case-insensitive filesystems and registries then cannot
/// collide two module paths that differ only in case.
pub fn escape_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        if ch.is_ascii_uppercase() {
            out.push('!');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Invert [`escape_path`].
pub fn unescape_path(escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(ch) = chars.next() {
        if ch == '!' {
            match chars.next() {
                Some(c) if c.is_ascii_lowercase() => out.push(c.to_ascii_uppercase()),
                _ => {
                    return Err(ModuleError::InvalidPath {
                        path: escaped.to_string(),
                        reason: "'!' must be followed by a lowercase letter".to_string(),
                    })
                }
            }
        } else if ch.is_ascii_uppercase() {
            return Err(ModuleError::InvalidPath {
                path: escaped.to_string(),
                reason: "escaped path contains an uppercase letter".to_string(),
            });
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}
