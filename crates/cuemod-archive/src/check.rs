//! The shared archive validator.
//!
//! All three archive operations run the rules here. `check_files` is the
//! publication-side entry point: it partitions a candidate list into the
//! entries an archive will contain, the entries deliberately left out, and
//! the entries that can never be archived, so that
//! `valid ⊎ omitted ⊎ invalid = input`.

use std::collections::BTreeMap;

use cuemod_module::check_path_element;

use crate::file::{FileKind, FileMeta};
use crate::{ArchiveError, Result, MAX_LICENSE, MAX_MOD_FILE, MAX_ZIP_FILE};

/// The path of the manifest entry at the archive root.
pub const MANIFEST_PATH: &str = "cue.mod/module.cue";

/// Why an entry was left out of publication rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmitReason {
    /// Below a nested `cue.mod/` directory: the file belongs to a submodule
    /// and is published with that submodule, not this one.
    NestedSubmodule,
    /// Below the root `cue.mod/vendor/` directory.
    Vendored,
}

impl std::fmt::Display for OmitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OmitReason::NestedSubmodule => write!(f, "nested submodule"),
            OmitReason::Vendored => write!(f, "vendored"),
        }
    }
}

/// The partitioned result of [`check_files`].
#[derive(Debug, Default)]
pub struct CheckedFiles {
    /// Paths an archive of this list will contain, in input order.
    pub valid: Vec<String>,
    /// Paths deliberately excluded from publication.
    pub omitted: Vec<(String, OmitReason)>,
    /// Paths that can never be archived, with the rejection.
    pub invalid: Vec<(String, ArchiveError)>,
    /// A whole-list problem: missing manifest or total size over the limit.
    pub err: Option<ArchiveError>,
}

impl CheckedFiles {
    /// `Ok` iff an archive can be created from this list: no whole-list
    /// error and no invalid entry.
    pub fn ok(&self) -> Result<()> {
        if let Some(err) = &self.err {
            return Err(clone_err(err));
        }
        if let Some((_, err)) = self.invalid.first() {
            return Err(clone_err(err));
        }
        Ok(())
    }
}

// ArchiveError holds io errors and is not Clone; the validator only ever
// stores the clonable variants.
fn clone_err(err: &ArchiveError) -> ArchiveError {
    match err {
        ArchiveError::FileTooLarge { path, size, limit } => ArchiveError::FileTooLarge {
            path: path.clone(),
            size: *size,
            limit: *limit,
        },
        ArchiveError::PathInvalid { path, reason } => ArchiveError::PathInvalid {
            path: path.clone(),
            reason: reason.clone(),
        },
        ArchiveError::DuplicatePath { path } => ArchiveError::DuplicatePath {
            path: path.clone(),
        },
        ArchiveError::TotalTooLarge { size, limit } => ArchiveError::TotalTooLarge {
            size: *size,
            limit: *limit,
        },
        ArchiveError::NestedSubmodule { path } => ArchiveError::NestedSubmodule {
            path: path.clone(),
        },
        ArchiveError::NonRegular { path } => ArchiveError::NonRegular { path: path.clone() },
        ArchiveError::MissingManifest => ArchiveError::MissingManifest,
        other => ArchiveError::PathInvalid {
            path: String::new(),
            reason: other.to_string(),
        },
    }
}

/// Validate a candidate file list without building the zip.
pub fn check_files(files: &[FileMeta]) -> CheckedFiles {
    let mut cf = CheckedFiles::default();
    let mut folded: BTreeMap<String, String> = BTreeMap::new();
    let mut total: u64 = 0;
    let mut have_manifest = false;

    for f in files {
        if let Err(err) = check_entry_path(&f.path) {
            cf.invalid.push((f.path.clone(), err));
            continue;
        }
        match f.kind {
            FileKind::Regular => {}
            FileKind::Dir => {
                // Directory entries are implied by their contents.
                cf.invalid.push((
                    f.path.clone(),
                    ArchiveError::NonRegular {
                        path: f.path.clone(),
                    },
                ));
                continue;
            }
            FileKind::Symlink | FileKind::Other => {
                cf.invalid.push((
                    f.path.clone(),
                    ArchiveError::NonRegular {
                        path: f.path.clone(),
                    },
                ));
                continue;
            }
        }
        if let Some(reason) = omit_reason(&f.path) {
            cf.omitted.push((f.path.clone(), reason));
            continue;
        }
        let folded_path = f.path.to_lowercase();
        if let Some(first) = folded.get(&folded_path) {
            cf.invalid.push((
                f.path.clone(),
                ArchiveError::DuplicatePath {
                    path: first.clone(),
                },
            ));
            continue;
        }
        folded.insert(folded_path, f.path.clone());

        if let Some(limit) = entry_size_limit(&f.path) {
            if f.size > limit {
                cf.invalid.push((
                    f.path.clone(),
                    ArchiveError::FileTooLarge {
                        path: f.path.clone(),
                        size: f.size,
                        limit,
                    },
                ));
                continue;
            }
        }
        if f.path == MANIFEST_PATH {
            have_manifest = true;
        }
        total += f.size;
        cf.valid.push(f.path.clone());
    }

    if !have_manifest {
        cf.err = Some(ArchiveError::MissingManifest);
    } else if total > MAX_ZIP_FILE {
        cf.err = Some(ArchiveError::TotalTooLarge {
            size: total,
            limit: MAX_ZIP_FILE,
        });
    }
    cf
}

/// Per-entry uncompressed size limit, if any applies.
pub fn entry_size_limit(path: &str) -> Option<u64> {
    if path == MANIFEST_PATH {
        Some(MAX_MOD_FILE)
    } else if path == "LICENSE" {
        Some(MAX_LICENSE)
    } else {
        None
    }
}

/// Why a path is excluded from publication, if it is.
pub fn omit_reason(path: &str) -> Option<OmitReason> {
    if path.starts_with("cue.mod/vendor/") {
        return Some(OmitReason::Vendored);
    }
    if nested_submodule(path) {
        return Some(OmitReason::NestedSubmodule);
    }
    None
}

/// Whether the path lies under a `cue.mod/` directory other than the root
/// one.
pub fn nested_submodule(path: &str) -> bool {
    let mut depth = 0;
    for element in path.split('/') {
        if element == "cue.mod" && depth > 0 {
            return true;
        }
        depth += 1;
    }
    false
}

/// Windows device names that cannot appear as a path element.
const RESERVED_NAMES: &[&str] = &["CON", "PRN", "AUX", "NUL"];

/// Validate one module-root-relative entry path.
pub fn check_entry_path(path: &str) -> std::result::Result<(), ArchiveError> {
    let fail = |reason: String| ArchiveError::PathInvalid {
        path: path.to_string(),
        reason,
    };
    if path.is_empty() {
        return Err(fail("empty path".to_string()));
    }
    if path.starts_with('/') {
        return Err(fail("path must be relative".to_string()));
    }
    if path.ends_with('/') {
        return Err(fail("path must not end with '/'".to_string()));
    }
    for element in path.split('/') {
        if element.is_empty() {
            return Err(fail("empty path element".to_string()));
        }
        if element == "." || element == ".." {
            return Err(fail(format!("path element {element:?} is not allowed")));
        }
        check_path_element(element).map_err(fail)?;
        check_windows_element(element).map_err(fail)?;
    }
    Ok(())
}

fn check_windows_element(element: &str) -> std::result::Result<(), String> {
    if element.ends_with('.') {
        return Err("path element must not end with '.'".to_string());
    }
    // Device names are reserved even with an extension: CON.cue is CON.
    let stem = element.split('.').next().unwrap_or(element);
    let upper = stem.to_ascii_uppercase();
    if RESERVED_NAMES.contains(&upper.as_str()) {
        return Err(format!("path element {element:?} is a reserved name"));
    }
    if upper.len() == 4
        && (upper.starts_with("COM") || upper.starts_with("LPT"))
        && upper.as_bytes()[3].is_ascii_digit()
        && upper.as_bytes()[3] != b'0'
    {
        return Err(format!("path element {element:?} is a reserved name"));
    }
    // Short-name impersonation: "MODULE~1.cue" can alias another entry.
    if let Some(i) = stem.rfind('~') {
        let digits = &stem[i + 1..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!(
                "path element {element:?} looks like a Windows short name"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str, size: u64) -> FileMeta {
        FileMeta {
            path: path.to_string(),
            size,
            kind: FileKind::Regular,
        }
    }

    fn manifest() -> FileMeta {
        meta(MANIFEST_PATH, 32)
    }

    #[test]
    fn partition_is_total() {
        let files = vec![
            manifest(),
            meta("x.cue", 10),
            meta("pkg/cue.mod/module.cue", 10),
            meta("cue.mod/vendor/other.cue", 10),
            meta("bad//path.cue", 10),
        ];
        let cf = check_files(&files);
        assert_eq!(
            cf.valid.len() + cf.omitted.len() + cf.invalid.len(),
            files.len()
        );
        assert_eq!(cf.valid, vec![MANIFEST_PATH.to_string(), "x.cue".to_string()]);
        assert!(cf.err.is_none());
        cf.ok().unwrap();
    }

    #[test]
    fn nested_submodule_omitted() {
        let cf = check_files(&[manifest(), meta("pkg/cue.mod/module.cue", 5)]);
        assert_eq!(cf.omitted.len(), 1);
        assert_eq!(cf.omitted[0].1, OmitReason::NestedSubmodule);
    }

    #[test]
    fn vendored_files_omitted() {
        let cf = check_files(&[manifest(), meta("cue.mod/vendor/a/b.cue", 5)]);
        assert_eq!(cf.omitted.len(), 1);
        assert_eq!(cf.omitted[0].1, OmitReason::Vendored);
    }

    #[test]
    fn root_cue_mod_files_are_valid() {
        let cf = check_files(&[manifest(), meta("cue.mod/pkg/extra.cue", 5)]);
        assert_eq!(cf.valid.len(), 2);
    }

    #[test]
    fn missing_manifest_is_whole_list_error() {
        let cf = check_files(&[meta("x.cue", 10)]);
        assert!(matches!(cf.err, Some(ArchiveError::MissingManifest)));
        assert!(cf.ok().is_err());
    }

    #[test]
    fn case_fold_duplicates_invalid() {
        let cf = check_files(&[manifest(), meta("a/File.cue", 1), meta("a/file.cue", 1)]);
        assert_eq!(cf.invalid.len(), 1);
        assert!(matches!(cf.invalid[0].1, ArchiveError::DuplicatePath { .. }));
    }

    #[test]
    fn non_regular_files_invalid() {
        let mut link = meta("link.cue", 0);
        link.kind = FileKind::Symlink;
        let cf = check_files(&[manifest(), link]);
        assert!(matches!(cf.invalid[0].1, ArchiveError::NonRegular { .. }));
    }

    #[test]
    fn manifest_size_boundary() {
        let cf = check_files(&[meta(MANIFEST_PATH, MAX_MOD_FILE)]);
        assert!(cf.valid.contains(&MANIFEST_PATH.to_string()));

        let cf = check_files(&[meta(MANIFEST_PATH, MAX_MOD_FILE + 1)]);
        assert!(matches!(cf.invalid[0].1, ArchiveError::FileTooLarge { .. }));
        // The oversized manifest no longer counts as present.
        assert!(matches!(cf.err, Some(ArchiveError::MissingManifest)));
    }

    #[test]
    fn license_size_boundary() {
        let cf = check_files(&[manifest(), meta("LICENSE", MAX_LICENSE)]);
        assert!(cf.err.is_none());
        let cf = check_files(&[manifest(), meta("LICENSE", MAX_LICENSE + 1)]);
        assert_eq!(cf.invalid.len(), 1);
    }

    #[test]
    fn nested_license_has_no_limit() {
        let cf = check_files(&[manifest(), meta("sub/LICENSE", MAX_LICENSE + 1)]);
        assert!(cf.invalid.is_empty());
    }

    #[test]
    fn total_size_boundary() {
        let cf = check_files(&[manifest(), meta("big.cue", MAX_ZIP_FILE - 32)]);
        assert!(cf.err.is_none());
        let cf = check_files(&[manifest(), meta("big.cue", MAX_ZIP_FILE - 31)]);
        assert!(matches!(cf.err, Some(ArchiveError::TotalTooLarge { .. })));
    }

    #[test]
    fn bad_paths_rejected() {
        for path in [
            "/abs.cue",
            "a//b.cue",
            "a/../b.cue",
            "./a.cue",
            "a/b.cue/",
            "sp ace.cue",
            "trailingdot./x.cue",
            "CON",
            "con.cue",
            "COM3",
            "lpt7.cue",
            "FILE~1.cue",
        ] {
            let err = check_entry_path(path).unwrap_err();
            assert!(
                matches!(err, ArchiveError::PathInvalid { .. }),
                "{path}: {err}"
            );
        }
    }

    #[test]
    fn reasonable_paths_accepted() {
        for path in [
            "x.cue",
            "a/b/c.cue",
            "cue.mod/module.cue",
            "COM0.cue",
            "common.cue",
            "tilde~x.cue",
            "UPPER.cue",
        ] {
            check_entry_path(path).unwrap_or_else(|e| panic!("{path}: {e}"));
        }
    }
}
