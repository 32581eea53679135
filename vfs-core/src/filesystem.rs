//! Unified filesystem façade over all registered drives.
//!
//! Every operation takes a qualified path (`A:/docs/a.txt`), routes it to
//! its drive and runs a short sequence of drive primitives while holding
//! that drive's lock. Handles opened along the way are owned by a guard
//! that closes them on every exit path.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::drive::{DirEntry, Drive, DriveSize, Driver, EntryKind, Handle, Metadata, OpenMode};
use crate::error::{ResultExt, VfsError, VfsResult};
use crate::path::{join, qualify};
use crate::registry::{Registry, SharedDrive};

/// Content returned by [`FileSystem::read_file`].
#[derive(Debug, Clone, PartialEq)]
pub enum FileContent {
    Text(String),
    /// Content that parsed as JSON.
    Json(serde_json::Value),
}

impl FileContent {
    /// Interpret raw content, recognizing JSON objects and arrays.
    pub fn decode(raw: String) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str(&raw) {
                return FileContent::Json(value);
            }
        }
        FileContent::Text(raw)
    }

    /// The content as a string, re-serializing JSON.
    pub fn into_text(self) -> String {
        match self {
            FileContent::Text(text) => text,
            FileContent::Json(value) => value.to_string(),
        }
    }
}

/// Summary of a registered drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveInfo {
    pub letter: char,
    pub size: DriveSize,
    pub open_handles: usize,
}

/// An open handle that is closed when dropped.
struct OpenHandle<'a> {
    drive: &'a mut dyn Drive,
    handle: Handle,
    open: bool,
}

impl<'a> OpenHandle<'a> {
    fn open(drive: &'a mut dyn Drive, path: &str, mode: OpenMode) -> VfsResult<Self> {
        let handle = drive.open(path, mode)?;
        Ok(Self {
            drive,
            handle,
            open: true,
        })
    }

    fn read(&mut self) -> VfsResult<String> {
        self.drive.read(self.handle, None)
    }

    fn write(&mut self, data: &str) -> VfsResult<usize> {
        self.drive.write(self.handle, data)
    }

    fn seek(&mut self, pos: usize) -> VfsResult<()> {
        self.drive.seek(self.handle, pos)
    }

    fn stat(&mut self) -> VfsResult<Metadata> {
        self.drive.stat(self.handle)
    }

    fn readdir(&mut self) -> VfsResult<Vec<DirEntry>> {
        self.drive.readdir(self.handle)
    }

    /// Close explicitly, surfacing the close error.
    fn close(mut self) -> VfsResult<()> {
        self.open = false;
        self.drive.close(self.handle)
    }
}

impl Drop for OpenHandle<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.drive.close(self.handle) {
                warn!(handle = self.handle, "failed to close handle: {}", e);
            }
        }
    }
}

/// Read a whole file through a fresh handle.
fn read_all(drive: &mut dyn Drive, path: &str) -> VfsResult<String> {
    let mut file = OpenHandle::open(drive, path, OpenMode::READ)?;
    if !file.stat()?.is_file() {
        return Err(VfsError::NotAFile(path.to_string()));
    }
    let content = file.read()?;
    file.close()?;
    Ok(content)
}

/// Create-if-absent, then write `content` through a handle opened with `mode`.
fn write_all(
    drive: &mut dyn Drive,
    path: &str,
    content: &str,
    mode: OpenMode,
    offset: Option<usize>,
) -> VfsResult<usize> {
    drive.create(path)?;
    let mut file = OpenHandle::open(drive, path, mode)?;
    if let Some(pos) = offset {
        file.seek(pos)?;
    }
    let written = file.write(content)?;
    file.close()?;
    Ok(written)
}

fn stat_via_handle(drive: &mut dyn Drive, path: &str) -> VfsResult<Metadata> {
    let mut file = OpenHandle::open(drive, path, OpenMode::READ)?;
    let meta = file.stat()?;
    file.close()?;
    Ok(meta)
}

/// The filesystem façade.
///
/// Clone is cheap (just clones the Arc); clones share the same drives.
#[derive(Clone, Default)]
pub struct FileSystem {
    registry: Arc<RwLock<Registry>>,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("drives", &self.get_drives().unwrap_or_default())
            .finish()
    }
}

impl FileSystem {
    /// Create a filesystem with no drives.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a drive under a letter. Existing letters are rejected.
    pub fn add_drive(&self, letter: char, drive: impl Drive + 'static) -> VfsResult<()> {
        let mut registry = self.registry.write().map_err(|_| VfsError::LockPoisoned)?;
        registry.add_drive(letter, Box::new(drive))?;
        debug!(letter = %letter.to_ascii_uppercase(), "added drive");
        Ok(())
    }

    /// Mount a backend through a [`Driver`] and register it.
    pub fn mount<B: Backend + 'static>(&self, letter: char, backend: B) -> VfsResult<()> {
        self.add_drive(letter, Driver::mount(backend)?)
    }

    /// Registered drive letters, in order.
    pub fn get_drives(&self) -> VfsResult<Vec<char>> {
        let registry = self.registry.read().map_err(|_| VfsError::LockPoisoned)?;
        Ok(registry.letters())
    }

    pub fn get_drive(&self, letter: char) -> VfsResult<DriveInfo> {
        let drive = self.shared(letter)?;
        let guard = drive.lock()?;
        Ok(DriveInfo {
            letter: drive.letter(),
            size: guard.drive_size(),
            open_handles: guard.open_handles(),
        })
    }

    pub fn drive_size(&self, letter: char) -> VfsResult<DriveSize> {
        Ok(self.get_drive(letter)?.size)
    }

    fn shared(&self, letter: char) -> VfsResult<SharedDrive> {
        let registry = self.registry.read().map_err(|_| VfsError::LockPoisoned)?;
        registry.get(letter)
    }

    fn resolve(&self, qualified: &str) -> VfsResult<(SharedDrive, String)> {
        let registry = self.registry.read().map_err(|_| VfsError::LockPoisoned)?;
        registry.resolve(qualified)
    }

    /// Run `f` against the drive owning `qualified`, with the drive locked.
    fn with_drive<T>(
        &self,
        qualified: &str,
        f: impl FnOnce(&mut dyn Drive, &str) -> VfsResult<T>,
    ) -> VfsResult<T> {
        let (drive, path) = self.resolve(qualified)?;
        let mut guard = drive.lock()?;
        f(&mut **guard, &path)
    }

    /// Replace a file's content, creating the file if needed.
    pub fn write_file(&self, path: &str, content: &str) -> VfsResult<usize> {
        self.with_drive(path, |drive, rel| {
            write_all(drive, rel, content, OpenMode::WRITE | OpenMode::TRUNCATE, None)
        })
        .context("writeFile", path)
    }

    /// Serialize a value as JSON and write it.
    pub fn write_json<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> VfsResult<usize> {
        let content = serde_json::to_string(value)
            .map_err(|e| VfsError::from(e).context("writeFile", path))?;
        self.write_file(path, &content)
    }

    /// Overwrite characters starting at `offset`, keeping the rest.
    pub fn write_at(&self, path: &str, offset: usize, content: &str) -> VfsResult<usize> {
        self.with_drive(path, |drive, rel| {
            write_all(drive, rel, content, OpenMode::WRITE, Some(offset))
        })
        .context("writeAt", path)
    }

    /// Add content after the current end of a file.
    pub fn append_file(&self, path: &str, content: &str) -> VfsResult<usize> {
        self.with_drive(path, |drive, rel| {
            write_all(drive, rel, content, OpenMode::APPEND, None)
        })
        .context("appendFile", path)
    }

    /// Read a file, decoding JSON content when it parses.
    pub fn read_file(&self, path: &str) -> VfsResult<FileContent> {
        self.with_drive(path, read_all)
            .map(FileContent::decode)
            .context("readFile", path)
    }

    /// Read a file's raw content.
    pub fn read_text(&self, path: &str) -> VfsResult<String> {
        self.with_drive(path, read_all).context("readText", path)
    }

    pub fn create_file(&self, path: &str) -> VfsResult<()> {
        self.with_drive(path, |drive, rel| drive.create(rel))
            .context("createFile", path)
    }

    pub fn delete_file(&self, path: &str) -> VfsResult<()> {
        self.with_drive(path, |drive, rel| drive.delete(rel))
            .context("deleteFile", path)
    }

    /// Create a directory. An existing directory at `path` is not an error.
    pub fn create_directory(&self, path: &str) -> VfsResult<()> {
        self.with_drive(path, |drive, rel| match drive.mkdir(rel) {
            Err(VfsError::AlreadyExists(_)) if drive.stat_path(rel)?.is_dir() => Ok(()),
            other => other,
        })
        .context("createDirectory", path)
    }

    /// Remove an empty directory.
    pub fn remove_directory(&self, path: &str) -> VfsResult<()> {
        self.with_drive(path, |drive, rel| drive.rmdir(rel))
            .context("removeDirectory", path)
    }

    /// List a directory, confirming each child's kind with its own stat.
    ///
    /// A child that cannot be opened or stat'ed is logged and left out.
    pub fn list_directory(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        self.with_drive(path, |drive, rel| {
            let children = {
                let mut dir = OpenHandle::open(&mut *drive, rel, OpenMode::READ)?;
                if !dir.stat()?.is_dir() {
                    return Err(VfsError::NotADirectory(rel.to_string()));
                }
                let children = dir.readdir()?;
                dir.close()?;
                children
            };

            let mut listing = Vec::with_capacity(children.len());
            for child in children {
                let child_path = join(rel, &child.name);
                match stat_via_handle(&mut *drive, &child_path) {
                    Ok(meta) => listing.push(DirEntry {
                        name: child.name,
                        kind: meta.kind,
                    }),
                    Err(e) => warn!(path = %child_path, "skipping unreadable entry: {}", e),
                }
            }
            Ok(listing)
        })
        .context("listDirectory", path)
    }

    /// Whether an entry exists at `path`.
    pub fn exists(&self, path: &str) -> VfsResult<bool> {
        self.with_drive(path, |drive, rel| {
            match OpenHandle::open(drive, rel, OpenMode::READ) {
                Ok(mut file) => {
                    let found = file.stat().is_ok();
                    file.close()?;
                    Ok(found)
                }
                Err(VfsError::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .context("exists", path)
    }

    pub fn stat(&self, path: &str) -> VfsResult<Metadata> {
        self.with_drive(path, |drive, rel| drive.stat_path(rel))
            .context("stat", path)
    }

    /// Move a file or directory, within a drive or across drives.
    ///
    /// Same-drive file moves use the driver's native rename. Directories
    /// and cross-drive moves are copied entry by entry and the source is
    /// removed as it goes; an entry that fails is logged and left behind.
    pub fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        self.rename_inner(old, new)
            .context("rename", format!("{} -> {}", old, new).as_str())
    }

    fn rename_inner(&self, old: &str, new: &str) -> VfsResult<()> {
        let (src, src_path) = self.resolve(old)?;
        let (dst, dst_path) = self.resolve(new)?;

        if src.letter() == dst.letter() {
            if dst_path.starts_with(&format!("{}/", src_path)) || src_path == "/" {
                return Err(VfsError::InvalidPath(qualify(dst.letter(), &dst_path)));
            }
            let native = src.lock()?.rename(&src_path, &dst_path);
            match native {
                Err(VfsError::Unsupported(_)) => {}
                other => return other,
            }
        }

        move_tree(&src, &src_path, &dst, &dst_path)
    }
}

/// Copy-then-delete a tree using an explicit worklist.
fn move_tree(
    src: &SharedDrive,
    src_root: &str,
    dst: &SharedDrive,
    dst_root: &str,
) -> VfsResult<()> {
    if dst.lock()?.stat_path(dst_root).is_ok() {
        return Err(VfsError::AlreadyExists(qualify(dst.letter(), dst_root)));
    }
    let root_kind = src.lock()?.stat_path(src_root)?.kind;

    let mut pending = vec![(src_root.to_string(), dst_root.to_string(), root_kind)];
    let mut copied_dirs = Vec::new();

    while let Some((from, to, kind)) = pending.pop() {
        let step = match kind {
            EntryKind::File => move_file(src, &from, dst, &to),
            EntryKind::Directory => copy_dir(src, &from, dst, &to).map(|children| {
                for child in children {
                    pending.push((join(&from, &child.name), join(&to, &child.name), child.kind));
                }
                copied_dirs.push(from.clone());
            }),
        };

        if let Err(e) = step {
            if from == src_root {
                return Err(e);
            }
            warn!(
                from = %qualify(src.letter(), &from),
                to = %qualify(dst.letter(), &to),
                "skipping entry during move: {}",
                e
            );
        }
    }

    // Children were visited after their parents.
    for dir in copied_dirs.iter().rev() {
        if let Err(e) = src.lock()?.rmdir(dir) {
            warn!(path = %qualify(src.letter(), dir), "source directory left behind: {}", e);
        }
    }
    Ok(())
}

fn move_file(src: &SharedDrive, from: &str, dst: &SharedDrive, to: &str) -> VfsResult<()> {
    let content = read_all(&mut **src.lock()?, from)?;
    let written = write_all(
        &mut **dst.lock()?,
        to,
        &content,
        OpenMode::WRITE | OpenMode::TRUNCATE,
        None,
    );
    if let Err(e) = written {
        // Don't leave a truncated copy at the destination.
        if let Err(undo) = dst.lock()?.delete(to) {
            if !undo.is_not_found() {
                warn!(path = %qualify(dst.letter(), to), "failed to remove partial copy: {}", undo);
            }
        }
        return Err(e);
    }
    src.lock()?.delete(from)
}

fn copy_dir(
    src: &SharedDrive,
    from: &str,
    dst: &SharedDrive,
    to: &str,
) -> VfsResult<Vec<DirEntry>> {
    {
        let mut target = dst.lock()?;
        match target.mkdir(to) {
            Err(VfsError::AlreadyExists(_)) if target.stat_path(to)?.is_dir() => {}
            other => other?,
        }
    }
    src.lock()?.readdir_path(from)
}
