use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

/// One listed file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    /// Birth time where the platform records it.
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

impl DirEntry {
    pub fn file(name: impl Into<String>, parent: &Path) -> Self {
        let name = name.into();
        Self {
            path: parent.join(&name),
            name,
            is_dir: false,
            created: None,
            modified: None,
        }
    }

    pub fn dir(name: impl Into<String>, parent: &Path) -> Self {
        Self {
            is_dir: true,
            ..Self::file(name, parent)
        }
    }

    /// Entry for an existing path, following symlinks.
    pub fn from_path(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path)?;
        let name = path
            .file_name()
            .map(OsStr::to_string_lossy)
            .unwrap_or_else(|| path.to_string_lossy())
            .into_owned();
        Ok(Self {
            name,
            is_dir: metadata.is_dir(),
            created: metadata.created().ok(),
            modified: metadata.modified().ok(),
            path,
        })
    }

    /// Timestamp used by the creation-time sort orders.
    pub fn created_or_modified(&self) -> Option<SystemTime> {
        self.created.or(self.modified)
    }

    /// Identity of an entry within one directory across listings.
    pub fn key(&self) -> (&str, bool) {
        (&self.name, self.is_dir)
    }
}

/// Source of directory listings.
///
/// An error means the directory could not be read; the engine shows it as a
/// status child instead of failing.
pub trait ListingProvider: Send + Sync {
    fn list_children_once(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

/// Listing backed by the local filesystem. Entries that are neither files nor
/// directories, or whose metadata cannot be read, are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsListing;

impl ListingProvider for FsListing {
    fn list_children_once(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for item in fs::read_dir(path)? {
            let item = item?;
            let child = item.path();
            match DirEntry::from_path(&child) {
                Ok(entry) if entry.is_dir || child.is_file() => entries.push(entry),
                Ok(_) => debug!(path = %child.display(), "skipping special file"),
                Err(e) => debug!(path = %child.display(), "skipping unreadable entry: {e}"),
            }
        }
        Ok(entries)
    }
}
