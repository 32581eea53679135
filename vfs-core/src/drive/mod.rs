//! Drive abstractions - the per-letter filesystem primitives.
//!
//! This module provides the layered drive architecture:
//! - `Drive`: low-level primitive interface on driver-relative paths
//! - `Driver`: the `Drive` implementation over any [`Backend`](crate::backend::Backend)
//! - `DescriptorTable`: per-driver handle allocation

mod descriptor;
mod driver;

pub use descriptor::{DescriptorTable, OpenFile};
pub use driver::Driver;

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::backend::StorageUsage;
use crate::error::{VfsError, VfsResult};

/// Integer token for an open file, scoped to one driver.
pub type Handle = u32;

bitflags! {
    /// How a handle was opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const APPEND = 1 << 2;
        const CREATE = 1 << 3;
        const TRUNCATE = 1 << 4;
    }
}

impl OpenMode {
    /// Whether writes through this handle are allowed.
    pub fn writable(self) -> bool {
        self.intersects(OpenMode::WRITE | OpenMode::APPEND)
    }
}

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata record for one path, persisted alongside (not inside) content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub kind: EntryKind,
    /// Content length in characters; always 0 for directories.
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
    /// Child names, directories only.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub children: BTreeSet<String>,
}

impl Metadata {
    fn new(kind: EntryKind, now: u64) -> Self {
        Self {
            kind,
            size: 0,
            created: now,
            modified: now,
            accessed: now,
            children: BTreeSet::new(),
        }
    }

    pub fn file(now: u64) -> Self {
        Self::new(EntryKind::File, now)
    }

    pub fn directory(now: u64) -> Self {
        Self::new(EntryKind::Directory, now)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Record an access. Timestamps never move backwards.
    pub fn touch_accessed(&mut self, now: u64) {
        self.accessed = self.accessed.max(now);
    }

    /// Record a modification (which is also an access).
    pub fn touch_modified(&mut self, now: u64) {
        self.modified = self.modified.max(now);
        self.touch_accessed(now);
    }
}

/// A directory entry returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Name of the entry (not full path).
    pub name: String,
    pub kind: EntryKind,
}

/// Capacity of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSize {
    /// The backend has no inherent capacity.
    Unbounded,
    Limited { used: u64, quota: u64 },
}

impl From<Option<StorageUsage>> for DriveSize {
    fn from(usage: Option<StorageUsage>) -> Self {
        match usage {
            Some(StorageUsage { used, quota }) => DriveSize::Limited { used, quota },
            None => DriveSize::Unbounded,
        }
    }
}

/// Primitive operations of a single drive, on driver-relative paths.
///
/// Paths passed here are already normalized (see [`crate::path::normalize`]).
pub trait Drive: Send {
    /// Resolve `path` and allocate a handle for it.
    fn open(&mut self, path: &str, mode: OpenMode) -> VfsResult<Handle>;

    /// Persist the entry's access time and release the handle.
    fn close(&mut self, handle: Handle) -> VfsResult<()>;

    /// Read from the cursor, at most `len` characters (to the end if `None`).
    ///
    /// An empty string at end of content is EOF, not an error. Reading a
    /// directory yields its child names joined with `,`.
    fn read(&mut self, handle: Handle, len: Option<usize>) -> VfsResult<String>;

    /// Splice `data` into the content at the cursor. Returns characters written.
    fn write(&mut self, handle: Handle, data: &str) -> VfsResult<usize>;

    /// Move the cursor.
    fn seek(&mut self, handle: Handle, pos: usize) -> VfsResult<()>;

    /// Current metadata of an open handle's entry.
    fn stat(&mut self, handle: Handle) -> VfsResult<Metadata>;

    /// Current metadata of a path.
    fn stat_path(&self, path: &str) -> VfsResult<Metadata>;

    fn mkdir(&mut self, path: &str) -> VfsResult<()>;

    /// Create an empty file. An existing file at `path` is left as is.
    fn create(&mut self, path: &str) -> VfsResult<()>;

    /// Remove a file.
    fn delete(&mut self, path: &str) -> VfsResult<()>;

    /// Remove an empty directory.
    fn rmdir(&mut self, path: &str) -> VfsResult<()>;

    /// List the directory an open handle refers to.
    fn readdir(&mut self, handle: Handle) -> VfsResult<Vec<DirEntry>>;

    /// List a directory by path.
    fn readdir_path(&self, path: &str) -> VfsResult<Vec<DirEntry>>;

    /// Move an entry within this drive.
    fn rename(&mut self, old: &str, _new: &str) -> VfsResult<()> {
        Err(VfsError::Unsupported(format!("rename {}", old)))
    }

    fn drive_size(&self) -> DriveSize;

    /// Number of currently open handles.
    fn open_handles(&self) -> usize;
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_writable() {
        assert!(OpenMode::WRITE.writable());
        assert!((OpenMode::READ | OpenMode::APPEND).writable());
        assert!(!(OpenMode::READ | OpenMode::CREATE).writable());
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut meta = Metadata::file(100);
        meta.touch_modified(50);
        assert_eq!(meta.modified, 100);
        meta.touch_modified(200);
        assert_eq!(meta.modified, 200);
        assert_eq!(meta.accessed, 200);
        assert_eq!(meta.created, 100);
    }

    #[test]
    fn test_metadata_json_omits_empty_children() {
        let json = serde_json::to_string(&Metadata::file(1)).unwrap();
        assert!(!json.contains("children"));

        let mut dir = Metadata::directory(1);
        dir.children.insert("a.txt".to_string());
        let back: Metadata = serde_json::from_str(&serde_json::to_string(&dir).unwrap()).unwrap();
        assert_eq!(back, dir);
    }

    #[test]
    fn test_drive_size_from_usage() {
        assert_eq!(DriveSize::from(None), DriveSize::Unbounded);
        assert_eq!(
            DriveSize::from(Some(StorageUsage { used: 1, quota: 2 })),
            DriveSize::Limited { used: 1, quota: 2 }
        );
    }
}
