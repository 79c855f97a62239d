//! Canonical semantic versions and (path, version) module identities.
//!
//! Versions render as `vMAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`, with a
//! leading `v`. The `semver` crate does the parsing and ordering work
//! underneath; this wrapper enforces the leading `v` and the canonical
//! rendering.

use std::fmt;
use std::str::FromStr;

use crate::error::{ModuleError, Result};
use crate::path::ModulePath;

/// A canonical semantic version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    raw: String,
    sem: semver::Version,
}

impl Version {
    /// Parse a canonical version. The input must round-trip: `v1.2` or
    /// `1.2.3` are rejected here; use [`Version::parse_lax`] to accept and
    /// canonicalise them.
    pub fn parse(s: &str) -> Result<Self> {
        let v = Self::parse_lax(s)?;
        if v.raw != s {
            return Err(ModuleError::InvalidVersion {
                version: s.to_string(),
                reason: format!("not in canonical form (canonical is {})", v.raw),
            });
        }
        Ok(v)
    }

    /// Parse a possibly non-canonical version, canonicalising it: a missing
    /// minor or patch component becomes zero. The leading `v` is required
    /// in both modes.
    pub fn parse_lax(s: &str) -> Result<Self> {
        let body = s.strip_prefix('v').ok_or_else(|| ModuleError::InvalidVersion {
            version: s.to_string(),
            reason: "missing leading 'v'".to_string(),
        })?;
        let sem = match semver::Version::parse(body) {
            Ok(sem) => sem,
            Err(_) => {
                // Tolerate a missing minor or patch component, as in "v1"
                // or "v1.2-alpha".
                let (core, tail) = split_core(body);
                let dots = core.bytes().filter(|&b| b == b'.').count();
                let padded = match dots {
                    0 => format!("{core}.0.0{tail}"),
                    1 => format!("{core}.0{tail}"),
                    _ => {
                        return Err(ModuleError::InvalidVersion {
                            version: s.to_string(),
                            reason: "malformed semantic version".to_string(),
                        })
                    }
                };
                semver::Version::parse(&padded).map_err(|e| ModuleError::InvalidVersion {
                    version: s.to_string(),
                    reason: e.to_string(),
                })?
            }
        };
        Ok(Version {
            raw: format!("v{sem}"),
            sem,
        })
    }

    pub fn major(&self) -> u32 {
        self.sem.major as u32
    }

    /// Whether this is a prerelease version.
    pub fn is_prerelease(&self) -> bool {
        !self.sem.pre.is_empty()
    }

    /// The canonical string, including the leading `v`.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn semver(&self) -> &semver::Version {
        &self.sem
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sem.cmp(&other.sem)
    }
}

/// Split a semver body into its dotted core and the `-pre`/`+build` tail.
fn split_core(body: &str) -> (&str, &str) {
    match body.find(|c| c == '-' || c == '+') {
        Some(i) => body.split_at(i),
        None => (body, ""),
    }
}

/// A (path, version) pair identifying one module instance.
///
/// Invariant: when the path carries a major suffix, it equals the version's
/// major number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleVersion {
    path: ModulePath,
    version: Version,
}

impl ModuleVersion {
    pub fn new(path: ModulePath, version: Version) -> Result<Self> {
        if let Some(major) = path.major() {
            if major != version.major() {
                return Err(ModuleError::MismatchedMajor {
                    path: path.to_string(),
                    version: version.to_string(),
                });
            }
        }
        Ok(ModuleVersion { path, version })
    }

    /// Parse from `path@vN` and `vX.Y.Z` strings.
    pub fn parse(path: &str, version: &str) -> Result<Self> {
        Self::new(ModulePath::parse(path)?, Version::parse(version)?)
    }

    pub fn path(&self) -> &ModulePath {
        &self.path
    }

    pub fn base_path(&self) -> &str {
        self.path.base_path()
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Directory-name form: `<escaped base path>@<version>`.
    pub fn escaped_dir(&self) -> String {
        format!(
            "{}@{}",
            crate::path::escape_path(self.path.base_path()),
            self.version
        )
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path.base_path(), self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_versions_parse() {
        for s in ["v0.0.1", "v1.2.3", "v2.0.0-alpha.1", "v1.0.0+build.5"] {
            let v = Version::parse(s).unwrap();
            assert_eq!(v.as_str(), s);
        }
    }

    #[test]
    fn non_canonical_rejected_strictly() {
        for s in ["1.2.3", "v1.2", "v1", "v01.0.0", ""] {
            assert!(Version::parse(s).is_err(), "{s:?} should be rejected");
        }
    }

    #[test]
    fn lax_parse_canonicalises() {
        assert_eq!(Version::parse_lax("v1.2").unwrap().as_str(), "v1.2.0");
        assert_eq!(Version::parse_lax("v1").unwrap().as_str(), "v1.0.0");
        assert_eq!(
            Version::parse_lax("v1-alpha").unwrap().as_str(),
            "v1.0.0-alpha"
        );
    }

    #[test]
    fn lax_parse_requires_v() {
        assert!(Version::parse_lax("1.2.3").is_err());
    }

    #[test]
    fn ordering_follows_semver() {
        let a = Version::parse("v1.2.3").unwrap();
        let b = Version::parse("v1.10.0").unwrap();
        let pre = Version::parse("v2.0.0-alpha").unwrap();
        let rel = Version::parse("v2.0.0").unwrap();
        assert!(a < b);
        assert!(pre < rel);
    }

    #[test]
    fn module_version_major_must_match() {
        assert!(ModuleVersion::parse("example.com/m@v1", "v1.0.0").is_ok());
        assert!(ModuleVersion::parse("example.com/m@v1", "v2.0.0").is_err());
    }

    #[test]
    fn unqualified_path_takes_any_major() {
        assert!(ModuleVersion::parse("example.com/m", "v3.0.0").is_ok());
    }

    #[test]
    fn display_and_escaped_dir() {
        let mv = ModuleVersion::parse("example.com/Big@v1", "v1.2.3").unwrap();
        assert_eq!(mv.to_string(), "example.com/Big@v1.2.3");
        assert_eq!(mv.escaped_dir(), "example.com/!big@v1.2.3");
    }

    #[test]
    fn prerelease_flag() {
        assert!(Version::parse("v1.0.0-rc.1").unwrap().is_prerelease());
        assert!(!Version::parse("v1.0.0").unwrap().is_prerelease());
    }
}
