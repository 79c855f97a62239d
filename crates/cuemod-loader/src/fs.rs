//! Filesystem abstraction for source enumeration.
//!
//! The loader reads directories and file prefixes through this trait so
//! hosts can substitute virtual or overlay filesystems. The optional
//! `cached_imports` capability lets a host that already holds a full parse
//! of a file serve the import prefix without re-reading it.

use std::io;
use std::path::Path;

use cuemod_parse::SourceFilePrefix;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_file: bool,
}

/// Read access to module source trees.
pub trait SourceFs: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Entries of a directory, sorted by name. A missing directory reads
    /// as empty.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Optional capability: a host-cached parse of the file's import
    /// prefix. `None` makes the loader read and minimally parse the file
    /// itself.
    fn cached_imports(&self, path: &Path) -> Option<cuemod_parse::Result<SourceFilePrefix>> {
        let _ = path;
        None
    }
}

/// The host operating system's filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl SourceFs for OsFs {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let read = match std::fs::read_dir(path) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut entries = Vec::new();
        for entry in read {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_file = entry.file_type()?.is_file();
            entries.push(DirEntry { name, is_file });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_dir_sorted_and_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.cue"), b"package p\n").unwrap();
        std::fs::write(dir.path().join("a.cue"), b"package p\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let entries = OsFs.list_dir(dir.path()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.cue", "b.cue", "sub"]);
        assert!(entries[0].is_file);
        assert!(!entries[2].is_file);

        assert!(OsFs.list_dir(&dir.path().join("missing")).unwrap().is_empty());
    }
}
