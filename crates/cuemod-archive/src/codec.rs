//! Zip creation, validation, and extraction.
//!
//! Archives are canonical: entries sorted by path under the single root
//! prefix `<escapedPath>@<version>/`, modes normalised to `0644` for files
//! and `0755` for directories, timestamps zeroed. Extraction validates
//! before writing anything; callers hand it a fresh directory and rename it
//! into place so a failed extraction leaves no partial artifact behind.

use std::collections::BTreeSet;
use std::io::{Read, Seek, Write};
use std::path::Path;

use cuemod_module::{Manifest, ModulePath, ModuleVersion, ParseMode};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::check::{
    check_entry_path, check_files, entry_size_limit, nested_submodule, MANIFEST_PATH,
};
use crate::file::FileSource;
use crate::{ArchiveError, Result, MAX_ZIP_FILE};

/// The validated table of contents of an archive.
#[derive(Debug)]
pub struct ZipContents {
    /// Module-root-relative file paths, in archive order.
    pub files: Vec<String>,
    /// The raw bytes of `cue.mod/module.cue`.
    pub manifest: Vec<u8>,
    /// Total declared uncompressed size.
    pub total_size: u64,
    /// Whether a `LICENSE` file sits at the module root. Publication does
    /// not require one; callers surface the observation.
    pub has_root_license: bool,
}

/// Write a canonical archive for `mv` from the given file source.
pub fn create<W: Write + Seek>(w: W, mv: &ModuleVersion, src: &dyn FileSource) -> Result<()> {
    let files = src.files()?;
    let cf = check_files(&files);
    cf.ok()?;

    // The manifest must declare the module this archive is for.
    let mut manifest_bytes = Vec::new();
    src.open(MANIFEST_PATH)?.read_to_end(&mut manifest_bytes)?;
    check_manifest(&manifest_bytes, mv)?;

    let prefix = format!("{}/", mv.escaped_dir());
    let mut paths = cf.valid.clone();
    paths.sort();

    let dir_options = SimpleFileOptions::default()
        .unix_permissions(0o755)
        .last_modified_time(zip::DateTime::default());
    let file_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
        .last_modified_time(zip::DateTime::default());

    let mut zw = ZipWriter::new(w);
    let mut dirs_written = BTreeSet::new();
    for path in &paths {
        // Parent directory entries, outermost first.
        let mut dir = String::new();
        for element in path.split('/').rev().skip(1).collect::<Vec<_>>().iter().rev() {
            dir.push_str(element);
            dir.push('/');
            if dirs_written.insert(dir.clone()) {
                zw.add_directory(format!("{prefix}{dir}"), dir_options)?;
            }
        }

        let meta = files
            .iter()
            .find(|f| &f.path == path)
            .expect("valid paths come from the input list");
        zw.start_file(format!("{prefix}{path}"), file_options)?;
        let mut reader = src.open(path)?;
        let written = std::io::copy(&mut reader, &mut zw)?;
        if written != meta.size {
            return Err(ArchiveError::SizeMismatch {
                path: path.clone(),
                declared: meta.size,
                actual: written,
            });
        }
    }
    zw.finish()?;
    Ok(())
}

/// Validate an archive without extracting it.
pub fn check_zip<R: Read + Seek>(r: R, mv: &ModuleVersion) -> Result<ZipContents> {
    let mut archive = ZipArchive::new(r)?;
    check_archive(&mut archive, mv)
}

/// Validate and extract an archive into `dest`.
///
/// `dest` should be a fresh directory the caller renames into place; on any
/// error the extraction aborts and `dest` is left for the caller to remove.
pub fn unzip<R: Read + Seek>(dest: &Path, r: R, mv: &ModuleVersion) -> Result<()> {
    let mut archive = ZipArchive::new(r)?;
    let contents = check_archive(&mut archive, mv)?;
    let prefix = format!("{}/", mv.escaped_dir());

    std::fs::create_dir_all(dest)?;
    for path in &contents.files {
        let out_path = dest.join(path);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut entry = archive.by_name(&format!("{prefix}{path}"))?;
        let declared = entry.size();
        let mut out = std::fs::File::create(&out_path)?;
        let written = std::io::copy(&mut entry, &mut out)?;
        if written != declared {
            return Err(ArchiveError::SizeMismatch {
                path: path.clone(),
                declared,
                actual: written,
            });
        }
    }
    Ok(())
}

fn check_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    mv: &ModuleVersion,
) -> Result<ZipContents> {
    let prefix = format!("{}/", mv.escaped_dir());
    let mut files = Vec::new();
    let mut folded = BTreeSet::new();
    let mut total: u64 = 0;
    let mut manifest_index = None;

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let name = entry.name().to_string();
        let rel = name
            .strip_prefix(&prefix)
            .ok_or_else(|| ArchiveError::BadPrefix {
                prefix: prefix.clone(),
                path: name.clone(),
            })?;
        if rel.is_empty() {
            // The root directory entry itself.
            continue;
        }

        if let Some(dir) = rel.strip_suffix('/') {
            if dir.is_empty() {
                continue;
            }
            check_entry_path(dir)?;
            continue;
        }
        check_entry_path(rel)?;
        if nested_submodule(rel) {
            return Err(ArchiveError::NestedSubmodule {
                path: rel.to_string(),
            });
        }
        if is_symlink(entry.unix_mode()) {
            return Err(ArchiveError::NonRegular {
                path: rel.to_string(),
            });
        }
        if !folded.insert(rel.to_lowercase()) {
            return Err(ArchiveError::DuplicatePath {
                path: rel.to_string(),
            });
        }
        if let Some(limit) = entry_size_limit(rel) {
            if entry.size() > limit {
                return Err(ArchiveError::FileTooLarge {
                    path: rel.to_string(),
                    size: entry.size(),
                    limit,
                });
            }
        }
        total += entry.size();
        if total > MAX_ZIP_FILE {
            return Err(ArchiveError::TotalTooLarge {
                size: total,
                limit: MAX_ZIP_FILE,
            });
        }
        if rel == MANIFEST_PATH {
            manifest_index = Some(i);
        }
        files.push(rel.to_string());
    }

    let manifest_index = manifest_index.ok_or(ArchiveError::MissingManifest)?;
    let mut manifest = Vec::new();
    archive
        .by_index(manifest_index)?
        .read_to_end(&mut manifest)?;
    check_manifest(&manifest, mv)?;

    let has_root_license = files.iter().any(|f| f == "LICENSE");
    Ok(ZipContents {
        files,
        manifest,
        total_size: total,
        has_root_license,
    })
}

fn is_symlink(unix_mode: Option<u32>) -> bool {
    matches!(unix_mode, Some(mode) if mode & 0o170000 == 0o120000)
}

/// Check that manifest bytes declare exactly the module an archive claims
/// to hold.
fn check_manifest(data: &[u8], mv: &ModuleVersion) -> Result<()> {
    let expected = match mv.path().major() {
        Some(_) => mv.path().clone(),
        None => mv.path().with_major(mv.version().major()),
    };

    // Compare the raw declared string first so a mismatched module field is
    // reported as a mismatch even when the declared path would not itself
    // validate.
    let declared = cuemod_parse::parse_data(data)
        .map_err(cuemod_module::ModuleError::from)?
        .field("module")
        .and_then(|v| v.as_str().map(str::to_string));
    match declared {
        None => return Err(ArchiveError::MissingManifest),
        Some(declared) => {
            if declared != expected.to_string() {
                return Err(ArchiveError::ManifestMismatch {
                    declared,
                    expected: expected.to_string(),
                });
            }
        }
    }

    // Then hold the whole file to the manifest grammar; archives published
    // before the schema existed still parse in legacy mode.
    match Manifest::parse(data, ParseMode::Strict) {
        Ok(_) => Ok(()),
        Err(strict_err) => match Manifest::parse(data, ParseMode::Legacy) {
            Ok(m) if m.module().map(ModulePath::to_string) == Some(expected.to_string()) => {
                Ok(())
            }
            _ => Err(strict_err.into()),
        },
    }
}
