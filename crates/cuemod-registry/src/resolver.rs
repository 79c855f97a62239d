//! Registry routing: mapping module-path prefixes to registry locations.
//!
//! Configured by a comma-separated list whose elements are either a
//! catch-all `registry` or a `modulePrefix=registry` rule, where
//! `registry := host[:port][/repoPrefix][+secure|+insecure]` or the literal
//! `none`. Prefix matching is longest-whole-path-element: `foo.com` routes
//! `foo.com/bar` but not `foo.com.other`.

use std::collections::HashMap;

use crate::error::{RegistryError, Result};

/// How module paths are encoded into repository names and tags.
///
/// The flat DSL always uses `Path`; the structured configuration may choose
/// a hash-based encoding, which is compatibility-critical once chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathEncoding {
    /// Repository is the unencoded prefix plus the module path.
    #[default]
    Path,
    /// Repository is the prefix plus the sha256 of the module path.
    HashAsRepo,
    /// Repository is the prefix alone; the hash and version form the tag.
    HashAsTag,
}

/// A concrete registry location a module path resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLocation {
    /// Host, with an optional `:port` suffix.
    pub host: String,
    /// Repository prefix inside the registry; may be empty.
    pub repository_prefix: String,
    /// Whether to talk plain HTTP.
    pub insecure: bool,
    /// Module-path encoding policy.
    pub path_encoding: PathEncoding,
}

impl RegistryLocation {
    /// The host without its port.
    pub fn host_name(&self) -> &str {
        match self.host.rfind(':') {
            // `[::1]:5000` keeps the bracketed form intact.
            Some(i) if !self.host[i..].contains(']') => &self.host[..i],
            _ => &self.host,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Registry(RegistryLocation),
    /// The literal `none`: imports under this prefix are an error.
    None,
}

/// A parsed routing configuration.
#[derive(Debug, Clone)]
pub struct Resolver {
    /// Prefix rules, in no particular order; matching picks the longest.
    rules: Vec<(String, Target)>,
    catch_all: Target,
}

impl Resolver {
    /// Parse the flat routing DSL. `default` supplies the catch-all when
    /// the string itself has none.
    pub fn parse(s: &str, default: Option<&str>) -> Result<Resolver> {
        let mut rules: Vec<(String, Target)> = Vec::new();
        let mut catch_all = None;
        let mut security: HashMap<String, bool> = HashMap::new();

        for element in s.split(',') {
            let element = element.trim();
            if element.is_empty() {
                return Err(config("empty element in registry configuration"));
            }
            match element.split_once('=') {
                Some((prefix, reference)) => {
                    if prefix.is_empty() {
                        return Err(config("empty module prefix"));
                    }
                    if reference.is_empty() {
                        return Err(config(format!("empty registry for prefix {prefix:?}")));
                    }
                    if rules.iter().any(|(p, _)| p == prefix) {
                        return Err(config(format!("duplicate prefix {prefix:?}")));
                    }
                    let target = parse_target(reference, &mut security)?;
                    rules.push((prefix.to_string(), target));
                }
                None => {
                    if catch_all.is_some() {
                        return Err(config("more than one catch-all registry"));
                    }
                    catch_all = Some(parse_target(element, &mut security)?);
                }
            }
        }

        let catch_all = match catch_all {
            Some(t) => t,
            None => match default {
                Some(d) => parse_target(d, &mut security)?,
                None => return Err(config("no catch-all registry configured")),
            },
        };
        Ok(Resolver { rules, catch_all })
    }

    /// A resolver with one catch-all location and no prefix rules.
    pub fn single(location: RegistryLocation) -> Resolver {
        Resolver {
            rules: Vec::new(),
            catch_all: Target::Registry(location),
        }
    }

    pub(crate) fn from_rules(rules: Vec<(String, Target)>, catch_all: Target) -> Resolver {
        Resolver { rules, catch_all }
    }

    /// Resolve a module base path (no major suffix) to its registry
    /// location.
    pub fn resolve(&self, module_path: &str) -> Result<&RegistryLocation> {
        let mut best: Option<(&str, &Target)> = None;
        for (prefix, target) in &self.rules {
            if !prefix_matches(prefix, module_path) {
                continue;
            }
            if best.map_or(true, |(b, _)| prefix.len() > b.len()) {
                best = Some((prefix, target));
            }
        }
        let (prefix, target) = match best {
            Some((p, t)) => (p, t),
            None => ("", &self.catch_all),
        };
        match target {
            Target::Registry(loc) => Ok(loc),
            Target::None => Err(RegistryError::DisabledPrefix {
                prefix: prefix.to_string(),
                path: module_path.to_string(),
            }),
        }
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

fn config(message: impl Into<String>) -> RegistryError {
    RegistryError::Config {
        message: message.into(),
    }
}

pub(crate) fn parse_target(
    reference: &str,
    security: &mut HashMap<String, bool>,
) -> Result<Target> {
    if reference == "none" {
        return Ok(Target::None);
    }
    let (reference, explicit_security) = if let Some(r) = reference.strip_suffix("+secure") {
        (r, Some(true))
    } else if let Some(r) = reference.strip_suffix("+insecure") {
        (r, Some(false))
    } else {
        (reference, None)
    };
    if reference.is_empty() {
        return Err(config("empty registry reference"));
    }
    if reference.contains('@') {
        return Err(config(format!(
            "registry reference {reference:?} carries a digest"
        )));
    }
    let (host, repo) = match reference.split_once('/') {
        Some((host, repo)) => (host, repo),
        None => (reference, ""),
    };
    if repo.contains(':') {
        return Err(config(format!(
            "registry reference {reference:?} carries a tag"
        )));
    }
    check_host(host)?;

    let host_name = match host.rfind(':') {
        Some(i) if !host[i..].contains(']') => &host[..i],
        _ => host,
    };
    let default_insecure = matches!(host_name, "localhost" | "127.0.0.1" | "[::1]");
    let secure = explicit_security.unwrap_or(!default_insecure);

    if let Some(&prev) = security.get(host) {
        if prev != secure {
            return Err(config(format!(
                "host {host:?} used both secure and insecure"
            )));
        }
    }
    security.insert(host.to_string(), secure);

    Ok(Target::Registry(RegistryLocation {
        host: host.to_string(),
        repository_prefix: repo.to_string(),
        insecure: !secure,
        path_encoding: PathEncoding::Path,
    }))
}

fn check_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(config("empty registry host"));
    }
    let (name, port) = if let Some(rest) = host.strip_prefix('[') {
        // Bracketed IPv6 literal, optionally with a port.
        match rest.split_once(']') {
            Some((addr, tail)) => {
                if addr.is_empty() {
                    return Err(config(format!("invalid host {host:?}")));
                }
                let port = match tail.strip_prefix(':') {
                    Some(p) => Some(p),
                    None if tail.is_empty() => None,
                    None => return Err(config(format!("invalid host {host:?}"))),
                };
                (String::from("::"), port)
            }
            None => return Err(config(format!("invalid host {host:?}"))),
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) => (name.to_string(), Some(port)),
            None => (host.to_string(), None),
        }
    };
    if let Some(port) = port {
        if port.is_empty() || port.bytes().any(|b| !b.is_ascii_digit()) {
            return Err(config(format!("invalid port in host {host:?}")));
        }
    }
    if name != "::"
        && !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return Err(config(format!("invalid host {host:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_and_catch_all() {
        let r = Resolver::parse("example.com=r.example/offset,fallback.example", Some("none"))
            .unwrap();

        let loc = r.resolve("example.com/foo").unwrap();
        assert_eq!(loc.host, "r.example");
        assert_eq!(loc.repository_prefix, "offset");

        let loc = r.resolve("other.com/x").unwrap();
        assert_eq!(loc.host, "fallback.example");
        assert_eq!(loc.repository_prefix, "");

        let loc = r.resolve("").unwrap();
        assert_eq!(loc.host, "fallback.example");
    }

    #[test]
    fn default_supplies_catch_all() {
        let r = Resolver::parse("example.com=r.example", Some("none")).unwrap();
        let err = r.resolve("other.com/x").unwrap_err();
        assert!(matches!(err, RegistryError::DisabledPrefix { .. }));
    }

    #[test]
    fn none_prefix_disables_imports() {
        let r = Resolver::parse("private.com=none,registry.example", None).unwrap();
        let err = r.resolve("private.com/secret").unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DisabledPrefix { ref prefix, .. } if prefix == "private.com"
        ));
        assert!(r.resolve("public.com/x").is_ok());
    }

    #[test]
    fn longest_prefix_wins() {
        let r = Resolver::parse(
            "foo.com=short.example,foo.com/bar=long.example,fallback.example",
            None,
        )
        .unwrap();
        assert_eq!(r.resolve("foo.com/bar/baz").unwrap().host, "long.example");
        assert_eq!(r.resolve("foo.com/other").unwrap().host, "short.example");
    }

    #[test]
    fn whole_element_matching() {
        let r = Resolver::parse("foo.com=match.example,fallback.example", None).unwrap();
        assert_eq!(r.resolve("foo.com").unwrap().host, "match.example");
        assert_eq!(r.resolve("foo.com/x").unwrap().host, "match.example");
        assert_eq!(r.resolve("foo.com.other").unwrap().host, "fallback.example");
    }

    #[test]
    fn security_defaults() {
        let r = Resolver::parse(
            "a.com=localhost:5000,b.com=127.0.0.1,c.com=[::1]:70,registry.example",
            None,
        )
        .unwrap();
        assert!(r.resolve("a.com/x").unwrap().insecure);
        assert!(r.resolve("b.com/x").unwrap().insecure);
        assert!(r.resolve("c.com/x").unwrap().insecure);
        assert!(!r.resolve("d.com/x").unwrap().insecure);
    }

    #[test]
    fn explicit_security_overrides() {
        let r = Resolver::parse("a.com=localhost:5000+secure,reg.example+insecure", None)
            .unwrap();
        assert!(!r.resolve("a.com/x").unwrap().insecure);
        assert!(r.resolve("b.com/x").unwrap().insecure);
    }

    #[test]
    fn conflicting_security_rejected() {
        let err = Resolver::parse(
            "a.com=reg.example+insecure,b.com=reg.example+secure,fallback.example",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::Config { .. }));
    }

    #[test]
    fn malformed_configurations() {
        for s in [
            "",
            "a.com=",
            "=reg.example",
            "a.com=reg.example,,fallback.example",
            "one.example,two.example",
            "a.com=reg.example,a.com=other.example,fallback.example",
            "a.com=reg.example/repo:tag,fallback.example",
            "a.com=reg.example/repo@sha256:deadbeef,fallback.example",
            "a.com=bad host,fallback.example",
        ] {
            assert!(Resolver::parse(s, None).is_err(), "{s:?} should fail");
        }
    }

    #[test]
    fn missing_catch_all_without_default() {
        assert!(Resolver::parse("a.com=reg.example", None).is_err());
    }

    #[test]
    fn ports_parse() {
        let r = Resolver::parse("reg.example:8443/prefix", None).unwrap();
        let loc = r.resolve("any.com/x").unwrap();
        assert_eq!(loc.host, "reg.example:8443");
        assert_eq!(loc.host_name(), "reg.example");
        assert_eq!(loc.repository_prefix, "prefix");
    }
}
