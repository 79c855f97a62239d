//! Abstract file sources feeding the archive writer.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// The kind of a candidate archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Dir,
    Symlink,
    Other,
}

/// Metadata for one candidate entry, with a module-root-relative
/// forward-slash path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub path: String,
    pub size: u64,
    pub kind: FileKind,
}

/// A source of files to archive.
pub trait FileSource {
    /// Enumerate all candidate entries.
    fn files(&self) -> io::Result<Vec<FileMeta>>;

    /// Open one entry for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>>;
}

/// A file source over an on-disk directory tree.
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirSource { root: root.into() }
    }
}

impl FileSource for DirSource {
    fn files(&self) -> io::Result<Vec<FileMeta>> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::other)?;
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(io::Error::other)?;
            let path = slash_path(rel);
            let ft = entry.file_type();
            let kind = if ft.is_file() {
                FileKind::Regular
            } else if ft.is_dir() {
                // Directories are implied by their contents.
                continue;
            } else if ft.is_symlink() {
                FileKind::Symlink
            } else {
                FileKind::Other
            };
            let size = if kind == FileKind::Regular {
                entry.metadata().map_err(io::Error::other)?.len()
            } else {
                0
            };
            out.push(FileMeta { path, size, kind });
        }
        Ok(out)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        let full = self.root.join(path);
        Ok(Box::new(File::open(full)?))
    }
}

/// An in-memory file source, used by tests and by publish pipelines that
/// assemble module contents without touching disk.
#[derive(Debug, Default, Clone)]
pub struct MemSource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file; replaces any previous entry at the same path.
    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> &mut Self {
        self.files.insert(path.into(), data.into());
        self
    }
}

impl FileSource for MemSource {
    fn files(&self) -> io::Result<Vec<FileMeta>> {
        Ok(self
            .files
            .iter()
            .map(|(path, data)| FileMeta {
                path: path.clone(),
                size: data.len() as u64,
                kind: FileKind::Regular,
            })
            .collect())
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        match self.files.get(path) {
            Some(data) => Ok(Box::new(io::Cursor::new(data.as_slice()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }
}

fn slash_path(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
