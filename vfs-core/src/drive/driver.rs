//! Drive driver - the directory tree and descriptor table over a backend.
//!
//! The driver keeps every metadata record in memory and mirrors it into
//! the backend: `meta:<path>` holds the JSON record, `data:<path>` holds
//! file content. Every structural change updates the entry and its
//! parent's child listing before returning.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{
    now_millis, DescriptorTable, DirEntry, Drive, DriveSize, Handle, Metadata, OpenFile, OpenMode,
};
use crate::backend::Backend;
use crate::error::{VfsError, VfsResult};
use crate::path::{file_name, join, parent, ROOT};

const META_PREFIX: &str = "meta:";
const DATA_PREFIX: &str = "data:";

fn meta_key(path: &str) -> String {
    format!("{}{}", META_PREFIX, path)
}

fn data_key(path: &str) -> String {
    format!("{}{}", DATA_PREFIX, path)
}

/// Byte index of the `chars`-th character, or the end of `s`.
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

/// Replace the characters of `content` starting at `at` with `data`.
///
/// Content past the overwritten range is kept. An offset beyond the end
/// appends.
fn splice(content: &str, at: usize, data: &str) -> String {
    let start = byte_offset(content, at);
    let end = byte_offset(content, at + data.chars().count());
    let mut out = String::with_capacity(start + data.len() + content.len() - end);
    out.push_str(&content[..start]);
    out.push_str(data);
    out.push_str(&content[end..]);
    out
}

/// [`Drive`] implementation over a key-value [`Backend`].
pub struct Driver<B: Backend> {
    backend: B,
    entries: HashMap<String, Metadata>,
    descriptors: DescriptorTable,
}

impl<B: Backend> Driver<B> {
    /// Attach to a backend, loading any tree already persisted in it.
    ///
    /// Records are discovered by walking child listings from root. A
    /// listed child without a record is logged and dropped from the tree.
    pub fn mount(backend: B) -> VfsResult<Self> {
        let mut driver = Self {
            backend,
            entries: HashMap::new(),
            descriptors: DescriptorTable::new(),
        };

        let root = match driver.load_record(ROOT)? {
            Some(meta) if meta.is_dir() => meta,
            found => {
                if found.is_some() {
                    warn!("root record is not a directory, recreating it");
                }
                let meta = Metadata::directory(now_millis());
                driver.persist_meta(ROOT, &meta)?;
                meta
            }
        };

        let mut pending = vec![(ROOT.to_string(), root)];
        while let Some((path, mut meta)) = pending.pop() {
            meta.children.retain(|name| {
                let child = join(&path, name);
                match driver.load_record(&child) {
                    Ok(Some(child_meta)) => {
                        pending.push((child, child_meta));
                        true
                    }
                    Ok(None) => {
                        warn!(path = %child, "listed entry has no metadata, skipping");
                        false
                    }
                    Err(e) => {
                        warn!(path = %child, "failed to load metadata: {}", e);
                        false
                    }
                }
            });
            driver.entries.insert(path, meta);
        }

        if let Some(keys) = driver.backend.keys_with_prefix(META_PREFIX) {
            let orphans = keys
                .iter()
                .filter(|key| !driver.entries.contains_key(&key[META_PREFIX.len()..]))
                .count();
            if orphans > 0 {
                warn!(orphans, "metadata records not reachable from root");
            }
        }

        debug!(entries = driver.entries.len(), "mounted drive");
        Ok(driver)
    }

    /// Get the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Detach from the backend, dropping all open handles.
    pub fn into_backend(self) -> B {
        self.backend
    }

    fn load_record(&self, path: &str) -> VfsResult<Option<Metadata>> {
        let key = meta_key(path);
        match self.backend.get(&key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| VfsError::io_failure(key, format!("corrupt metadata: {}", e))),
            None => Ok(None),
        }
    }

    fn persist_meta(&mut self, path: &str, meta: &Metadata) -> VfsResult<()> {
        let json = serde_json::to_string(meta)?;
        self.backend.put(&meta_key(path), &json)
    }

    fn load_content(&self, path: &str) -> VfsResult<String> {
        Ok(self.backend.get(&data_key(path))?.unwrap_or_default())
    }

    fn entry(&self, path: &str) -> VfsResult<&Metadata> {
        self.entries
            .get(path)
            .ok_or_else(|| VfsError::NotFound(path.to_string()))
    }

    /// The directory that would hold `path`.
    fn parent_dir(&self, path: &str) -> VfsResult<Metadata> {
        let dir = parent(path);
        match self.entries.get(dir) {
            Some(meta) if meta.is_dir() => Ok(meta.clone()),
            Some(_) => Err(VfsError::NotADirectory(dir.to_string())),
            None => Err(VfsError::ParentNotFound(path.to_string())),
        }
    }

    /// Insert a new entry and list it in its parent, persisting both.
    fn link(&mut self, path: &str, meta: Metadata) -> VfsResult<()> {
        let mut dir = self.parent_dir(path)?;
        dir.children.insert(file_name(path).to_string());
        dir.touch_modified(now_millis());

        self.persist_meta(path, &meta)?;
        if let Err(e) = self.persist_meta(parent(path), &dir) {
            if let Err(undo) = self.backend.delete(&meta_key(path)) {
                warn!(path, "rollback of new entry failed: {}", undo);
            }
            return Err(e);
        }

        self.entries.insert(path.to_string(), meta);
        self.entries.insert(parent(path).to_string(), dir);
        Ok(())
    }

    /// Remove an entry, its content and its name in the parent listing.
    fn unlink(&mut self, path: &str) -> VfsResult<()> {
        let mut dir = self.parent_dir(path)?;
        dir.children.remove(file_name(path));
        dir.touch_modified(now_millis());

        // Drop the listing first so a failure below leaves only an
        // unreachable record behind.
        self.persist_meta(parent(path), &dir)?;
        self.entries.insert(parent(path).to_string(), dir);
        self.entries.remove(path);

        let content = self.backend.delete(&data_key(path));
        let record = self.backend.delete(&meta_key(path));
        content.and(record)
    }

    fn open_file(&self, handle: Handle) -> VfsResult<OpenFile> {
        self.descriptors.get(handle).cloned()
    }

    /// Store a refreshed record and the handle's view of it.
    fn refresh(&mut self, handle: Handle, path: &str, meta: Metadata) -> VfsResult<Metadata> {
        self.entries.insert(path.to_string(), meta.clone());
        self.descriptors.get_mut(handle)?.snapshot = meta.clone();
        Ok(meta)
    }
}

impl<B: Backend> Drive for Driver<B> {
    fn open(&mut self, path: &str, mode: OpenMode) -> VfsResult<Handle> {
        let snapshot = match self.entries.get(path).cloned() {
            Some(mut meta) => {
                if mode.contains(OpenMode::TRUNCATE) && meta.is_file() {
                    let previous = meta.clone();
                    meta.size = 0;
                    meta.touch_modified(now_millis());
                    self.persist_meta(path, &meta)?;
                    if let Err(e) = self.backend.delete(&data_key(path)) {
                        if let Err(undo) = self.persist_meta(path, &previous) {
                            warn!(path, "rollback of truncated record failed: {}", undo);
                        }
                        return Err(e);
                    }
                    self.entries.insert(path.to_string(), meta.clone());
                }
                meta
            }
            None if mode.contains(OpenMode::CREATE) => {
                let meta = Metadata::file(now_millis());
                self.link(path, meta.clone())?;
                meta
            }
            None => return Err(VfsError::NotFound(path.to_string())),
        };

        let handle = self.descriptors.allocate(OpenFile {
            path: path.to_string(),
            mode,
            cursor: 0,
            snapshot,
        });
        debug!(handle, path, ?mode, "opened");
        Ok(handle)
    }

    fn close(&mut self, handle: Handle) -> VfsResult<()> {
        let file = self.descriptors.release(handle)?;
        debug!(handle, path = %file.path, "closed");

        // The entry may have been renamed away under another handle.
        let Some(meta) = self.entries.get_mut(&file.path) else {
            return Ok(());
        };
        meta.touch_accessed(now_millis());
        let meta = meta.clone();
        self.persist_meta(&file.path, &meta)
    }

    fn read(&mut self, handle: Handle, len: Option<usize>) -> VfsResult<String> {
        let file = self.open_file(handle)?;
        let mut meta = self.entry(&file.path)?.clone();

        let content = if meta.is_dir() {
            meta.children
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(",")
        } else {
            self.load_content(&file.path)?
        };

        let chunk: String = content
            .chars()
            .skip(file.cursor)
            .take(len.unwrap_or(usize::MAX))
            .collect();

        meta.touch_accessed(now_millis());
        self.refresh(handle, &file.path, meta)?;
        self.descriptors.get_mut(handle)?.cursor += chunk.chars().count();
        Ok(chunk)
    }

    fn write(&mut self, handle: Handle, data: &str) -> VfsResult<usize> {
        let file = self.open_file(handle)?;
        if !file.mode.writable() {
            return Err(VfsError::ModeDenied(handle));
        }
        let mut meta = self.entry(&file.path)?.clone();
        if !meta.is_file() {
            return Err(VfsError::NotAFile(file.path));
        }

        let key = data_key(&file.path);
        let previous = self.backend.get(&key)?;
        let content = previous.clone().unwrap_or_default();
        let at = if file.mode.contains(OpenMode::APPEND) {
            content.chars().count()
        } else {
            file.cursor
        };
        let updated = splice(&content, at, data);
        let written = data.chars().count();

        meta.size = updated.chars().count() as u64;
        meta.touch_modified(now_millis());
        self.backend.put(&key, &updated)?;
        if let Err(e) = self.persist_meta(&file.path, &meta) {
            let undo = match &previous {
                Some(old) => self.backend.put(&key, old),
                None => self.backend.delete(&key),
            };
            if let Err(undo) = undo {
                warn!(path = %file.path, "rollback of written content failed: {}", undo);
            }
            return Err(e);
        }

        self.refresh(handle, &file.path, meta)?;
        self.descriptors.get_mut(handle)?.cursor = at.min(content.chars().count()) + written;
        Ok(written)
    }

    fn seek(&mut self, handle: Handle, pos: usize) -> VfsResult<()> {
        self.descriptors.get_mut(handle)?.cursor = pos;
        Ok(())
    }

    fn stat(&mut self, handle: Handle) -> VfsResult<Metadata> {
        let file = self.open_file(handle)?;
        let meta = self.entry(&file.path)?.clone();
        self.descriptors.get_mut(handle)?.snapshot = meta.clone();
        Ok(meta)
    }

    fn stat_path(&self, path: &str) -> VfsResult<Metadata> {
        self.entry(path).cloned()
    }

    fn mkdir(&mut self, path: &str) -> VfsResult<()> {
        if self.entries.contains_key(path) {
            return Err(VfsError::AlreadyExists(path.to_string()));
        }
        self.link(path, Metadata::directory(now_millis()))?;
        debug!(path, "created directory");
        Ok(())
    }

    fn create(&mut self, path: &str) -> VfsResult<()> {
        match self.entries.get(path) {
            Some(meta) if meta.is_file() => Ok(()),
            Some(_) => Err(VfsError::AlreadyExists(path.to_string())),
            None => {
                self.link(path, Metadata::file(now_millis()))?;
                debug!(path, "created file");
                Ok(())
            }
        }
    }

    fn delete(&mut self, path: &str) -> VfsResult<()> {
        if !self.entry(path)?.is_file() {
            return Err(VfsError::NotAFile(path.to_string()));
        }
        debug!(path, "deleting file");
        let result = self.unlink(path);
        // Open handles survive a failed unlink.
        if !self.entries.contains_key(path) {
            let stale = self.descriptors.invalidate_path(path);
            debug!(path, invalidated = stale.len(), "deleted file");
        }
        result
    }

    fn rmdir(&mut self, path: &str) -> VfsResult<()> {
        if path == ROOT {
            return Err(VfsError::InvalidPath(path.to_string()));
        }
        let meta = self.entry(path)?;
        if !meta.is_dir() {
            return Err(VfsError::NotADirectory(path.to_string()));
        }
        if !meta.children.is_empty() {
            return Err(VfsError::NotEmpty(path.to_string()));
        }
        debug!(path, "removing directory");
        let result = self.unlink(path);
        if !self.entries.contains_key(path) {
            self.descriptors.invalidate_path(path);
        }
        result
    }

    fn readdir(&mut self, handle: Handle) -> VfsResult<Vec<DirEntry>> {
        let file = self.open_file(handle)?;
        self.readdir_path(&file.path)
    }

    fn readdir_path(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let meta = self.entry(path)?;
        if !meta.is_dir() {
            return Err(VfsError::NotADirectory(path.to_string()));
        }

        let mut listing = Vec::with_capacity(meta.children.len());
        for name in &meta.children {
            match self.entries.get(&join(path, name)) {
                Some(child) => listing.push(DirEntry {
                    name: name.clone(),
                    kind: child.kind,
                }),
                None => warn!(path, name = %name, "listed entry has no metadata, skipping"),
            }
        }
        Ok(listing)
    }

    fn rename(&mut self, old: &str, new: &str) -> VfsResult<()> {
        let meta = self.entry(old)?.clone();
        if meta.is_dir() {
            return Err(VfsError::Unsupported(format!("rename directory {}", old)));
        }
        if old == new {
            return Ok(());
        }
        if self.entries.contains_key(new) {
            return Err(VfsError::AlreadyExists(new.to_string()));
        }
        self.parent_dir(new)?;

        let content = self.load_content(old)?;
        self.backend.put(&data_key(new), &content)?;
        if let Err(e) = self.link(new, meta) {
            if let Err(undo) = self.backend.delete(&data_key(new)) {
                warn!(path = new, "rollback of copied content failed: {}", undo);
            }
            return Err(e);
        }

        let unlinked = self.unlink(old);
        if self.entries.contains_key(old) {
            // The old listing could not be updated; take the new entry back out.
            if let Err(undo) = self.unlink(new) {
                warn!(path = new, "rollback of renamed entry failed: {}", undo);
            }
            return unlinked;
        }
        self.descriptors.rename_path(old, new);
        unlinked?;
        debug!(old, new, "renamed");
        Ok(())
    }

    fn drive_size(&self) -> DriveSize {
        self.backend.usage().into()
    }

    fn open_handles(&self) -> usize {
        self.descriptors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BlobCacheBackend, FaultyBackend, MemoryBackend};
    use crate::drive::EntryKind;

    fn driver() -> Driver<MemoryBackend> {
        Driver::mount(MemoryBackend::new()).unwrap()
    }

    fn write_file(d: &mut impl Drive, path: &str, content: &str) {
        let h = d
            .open(path, OpenMode::WRITE | OpenMode::CREATE | OpenMode::TRUNCATE)
            .unwrap();
        d.write(h, content).unwrap();
        d.close(h).unwrap();
    }

    fn read_file(d: &mut impl Drive, path: &str) -> String {
        let h = d.open(path, OpenMode::READ).unwrap();
        let content = d.read(h, None).unwrap();
        d.close(h).unwrap();
        content
    }

    #[test]
    fn test_splice() {
        assert_eq!(splice("hello", 0, "HI"), "HIllo");
        assert_eq!(splice("hello", 3, "LOOO"), "helLOOO");
        assert_eq!(splice("hello", 9, "!"), "hello!");
        assert_eq!(splice("héllo", 1, "e"), "hello");
    }

    #[test]
    fn test_mount_creates_root() {
        let d = driver();
        let root = d.stat_path("/").unwrap();
        assert!(root.is_dir());
        assert!(d.backend().get("meta:/").unwrap().is_some());
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut d = driver();
        write_file(&mut d, "/a.txt", "hello world");
        assert_eq!(read_file(&mut d, "/a.txt"), "hello world");
        assert_eq!(d.stat_path("/a.txt").unwrap().size, 11);
    }

    #[test]
    fn test_splice_write_preserves_suffix() {
        let mut d = driver();
        write_file(&mut d, "/x.txt", "hello");

        let h = d.open("/x.txt", OpenMode::WRITE).unwrap();
        assert_eq!(d.write(h, "HI").unwrap(), 2);
        d.close(h).unwrap();

        assert_eq!(read_file(&mut d, "/x.txt"), "HIllo");
    }

    #[test]
    fn test_sequential_writes_advance_cursor() {
        let mut d = driver();
        let h = d.open("/s.txt", OpenMode::WRITE | OpenMode::CREATE).unwrap();
        d.write(h, "ab").unwrap();
        d.write(h, "cd").unwrap();
        d.seek(h, 1).unwrap();
        d.write(h, "X").unwrap();
        d.close(h).unwrap();
        assert_eq!(read_file(&mut d, "/s.txt"), "aXcd");
    }

    #[test]
    fn test_append_ignores_cursor() {
        let mut d = driver();
        write_file(&mut d, "/log.txt", "one");

        let h = d.open("/log.txt", OpenMode::APPEND).unwrap();
        d.seek(h, 0).unwrap();
        d.write(h, ",two").unwrap();
        d.seek(h, 1).unwrap();
        d.write(h, ",three").unwrap();
        d.close(h).unwrap();

        assert_eq!(read_file(&mut d, "/log.txt"), "one,two,three");
    }

    #[test]
    fn test_truncate_clears_content() {
        let mut d = driver();
        write_file(&mut d, "/t.txt", "long content");
        write_file(&mut d, "/t.txt", "short");
        assert_eq!(read_file(&mut d, "/t.txt"), "short");
        assert_eq!(d.stat_path("/t.txt").unwrap().size, 5);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let mut d = driver();
        write_file(&mut d, "/r.txt", "abcdef");

        let h = d.open("/r.txt", OpenMode::READ).unwrap();
        assert_eq!(d.read(h, Some(4)).unwrap(), "abcd");
        assert_eq!(d.read(h, Some(4)).unwrap(), "ef");
        assert_eq!(d.read(h, Some(4)).unwrap(), "");
        d.close(h).unwrap();
    }

    #[test]
    fn test_read_directory_joins_children() {
        let mut d = driver();
        d.mkdir("/docs").unwrap();
        d.create("/docs/a.txt").unwrap();
        d.create("/docs/b.txt").unwrap();

        let h = d.open("/docs", OpenMode::READ).unwrap();
        let content = d.read(h, None).unwrap();
        d.close(h).unwrap();

        let mut names: Vec<&str> = content.split(',').collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_write_requires_write_mode() {
        let mut d = driver();
        d.create("/ro.txt").unwrap();
        let h = d.open("/ro.txt", OpenMode::READ).unwrap();
        assert!(matches!(d.write(h, "x"), Err(VfsError::ModeDenied(_))));
        d.close(h).unwrap();
    }

    #[test]
    fn test_write_to_directory_fails() {
        let mut d = driver();
        d.mkdir("/dir").unwrap();
        let h = d.open("/dir", OpenMode::WRITE).unwrap();
        assert!(matches!(d.write(h, "x"), Err(VfsError::NotAFile(_))));
        d.close(h).unwrap();
    }

    #[test]
    fn test_open_missing_without_create() {
        let mut d = driver();
        assert!(matches!(
            d.open("/nope", OpenMode::READ),
            Err(VfsError::NotFound(_))
        ));
        assert_eq!(d.open_handles(), 0);
    }

    #[test]
    fn test_open_create_registers_in_parent() {
        let mut d = driver();
        let h = d.open("/new.txt", OpenMode::WRITE | OpenMode::CREATE).unwrap();
        d.close(h).unwrap();

        let listing = d.readdir_path("/").unwrap();
        assert_eq!(
            listing,
            vec![DirEntry {
                name: "new.txt".into(),
                kind: EntryKind::File
            }]
        );
    }

    #[test]
    fn test_create_with_missing_parent_fails() {
        let mut d = driver();
        assert!(matches!(
            d.create("/missing/a.txt"),
            Err(VfsError::ParentNotFound(_))
        ));
        assert!(d.stat_path("/missing/a.txt").is_err());
        assert!(d.backend().get("meta:/missing/a.txt").unwrap().is_none());
    }

    #[test]
    fn test_create_under_file_fails() {
        let mut d = driver();
        d.create("/f").unwrap();
        assert!(matches!(
            d.create("/f/g"),
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_create_is_idempotent_for_files() {
        let mut d = driver();
        write_file(&mut d, "/keep.txt", "data");
        d.create("/keep.txt").unwrap();
        assert_eq!(read_file(&mut d, "/keep.txt"), "data");

        d.mkdir("/dir").unwrap();
        assert!(matches!(d.create("/dir"), Err(VfsError::AlreadyExists(_))));
    }

    #[test]
    fn test_mkdir_existing_fails() {
        let mut d = driver();
        d.mkdir("/a").unwrap();
        assert!(matches!(d.mkdir("/a"), Err(VfsError::AlreadyExists(_))));
        assert!(matches!(d.mkdir("/"), Err(VfsError::AlreadyExists(_))));
        assert_eq!(d.stat_path("/").unwrap().children.len(), 1);
    }

    #[test]
    fn test_delete_removes_entry_and_content() {
        let mut d = driver();
        d.mkdir("/docs").unwrap();
        write_file(&mut d, "/docs/a.txt", "hi");

        d.delete("/docs/a.txt").unwrap();

        assert!(d.readdir_path("/docs").unwrap().is_empty());
        assert!(matches!(
            d.stat_path("/docs/a.txt"),
            Err(VfsError::NotFound(_))
        ));
        assert!(d.backend().get("data:/docs/a.txt").unwrap().is_none());
        assert!(d.backend().get("meta:/docs/a.txt").unwrap().is_none());
    }

    #[test]
    fn test_delete_missing_leaves_state_unchanged() {
        let mut d = driver();
        d.create("/a.txt").unwrap();
        let before = d.backend().len();

        assert!(matches!(
            d.delete("/missing.txt"),
            Err(VfsError::NotFound(_))
        ));
        assert_eq!(d.backend().len(), before);
        assert_eq!(d.readdir_path("/").unwrap().len(), 1);
    }

    #[test]
    fn test_delete_directory_is_rejected() {
        let mut d = driver();
        d.mkdir("/dir").unwrap();
        assert!(matches!(d.delete("/dir"), Err(VfsError::NotAFile(_))));
    }

    #[test]
    fn test_delete_invalidates_open_handles() {
        let mut d = driver();
        write_file(&mut d, "/a.txt", "hi");
        let h = d.open("/a.txt", OpenMode::READ | OpenMode::WRITE).unwrap();

        d.delete("/a.txt").unwrap();

        assert!(matches!(d.read(h, None), Err(VfsError::InvalidHandle(_))));
        assert!(matches!(d.write(h, "x"), Err(VfsError::InvalidHandle(_))));
        assert!(matches!(d.close(h), Err(VfsError::InvalidHandle(_))));
        assert_eq!(d.open_handles(), 0);
    }

    #[test]
    fn test_use_after_close_fails() {
        let mut d = driver();
        d.create("/a.txt").unwrap();
        let h = d.open("/a.txt", OpenMode::READ).unwrap();
        d.close(h).unwrap();

        assert!(matches!(d.stat(h), Err(VfsError::InvalidHandle(_))));
        assert!(matches!(d.close(h), Err(VfsError::InvalidHandle(_))));
    }

    #[test]
    fn test_handles_are_recycled() {
        let mut d = driver();
        d.create("/a").unwrap();
        let h1 = d.open("/a", OpenMode::READ).unwrap();
        let h2 = d.open("/a", OpenMode::READ).unwrap();
        assert_ne!(h1, h2);

        d.close(h1).unwrap();
        let h3 = d.open("/a", OpenMode::READ).unwrap();
        assert_eq!(h3, h1);
        assert_eq!(d.open_handles(), 2);
    }

    #[test]
    fn test_rmdir() {
        let mut d = driver();
        d.mkdir("/dir").unwrap();
        d.create("/dir/f").unwrap();

        assert!(matches!(d.rmdir("/dir"), Err(VfsError::NotEmpty(_))));
        d.delete("/dir/f").unwrap();
        d.rmdir("/dir").unwrap();

        assert!(d.readdir_path("/").unwrap().is_empty());
        assert!(matches!(d.rmdir("/"), Err(VfsError::InvalidPath(_))));
    }

    #[test]
    fn test_readdir_through_handle() {
        let mut d = driver();
        d.mkdir("/docs").unwrap();
        d.mkdir("/docs/sub").unwrap();
        d.create("/docs/a.txt").unwrap();

        let h = d.open("/docs", OpenMode::READ).unwrap();
        let mut listing = d.readdir(h).unwrap();
        d.close(h).unwrap();
        listing.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(listing[0].name, "a.txt");
        assert_eq!(listing[0].kind, EntryKind::File);
        assert_eq!(listing[1].name, "sub");
        assert_eq!(listing[1].kind, EntryKind::Directory);
    }

    #[test]
    fn test_readdir_of_file_fails() {
        let d = {
            let mut d = driver();
            d.create("/f").unwrap();
            d
        };
        assert!(matches!(
            d.readdir_path("/f"),
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_stat_does_not_touch_accessed() {
        let mut d = driver();
        d.create("/a").unwrap();
        let before = d.stat_path("/a").unwrap();
        let h = d.open("/a", OpenMode::READ).unwrap();
        let snap = d.stat(h).unwrap();
        assert_eq!(snap.accessed, before.accessed);
        d.close(h).unwrap();
    }

    #[test]
    fn test_timestamps_ordered() {
        let mut d = driver();
        write_file(&mut d, "/a", "x");
        let meta = d.stat_path("/a").unwrap();
        assert!(meta.modified >= meta.created);
        assert!(meta.accessed >= meta.created);
    }

    #[test]
    fn test_rename_file() {
        let mut d = driver();
        d.mkdir("/dst").unwrap();
        write_file(&mut d, "/a.txt", "payload");
        let h = d.open("/a.txt", OpenMode::READ).unwrap();

        d.rename("/a.txt", "/dst/b.txt").unwrap();

        assert!(d.stat_path("/a.txt").is_err());
        assert_eq!(read_file(&mut d, "/dst/b.txt"), "payload");
        // Handles follow the entry
        assert_eq!(d.read(h, None).unwrap(), "payload");
        d.close(h).unwrap();

        let root: Vec<String> = d.readdir_path("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(root, vec!["dst".to_string()]);
    }

    #[test]
    fn test_rename_rejects_directories_and_collisions() {
        let mut d = driver();
        d.mkdir("/dir").unwrap();
        d.create("/a").unwrap();
        d.create("/b").unwrap();

        assert!(matches!(
            d.rename("/dir", "/dir2"),
            Err(VfsError::Unsupported(_))
        ));
        assert!(matches!(
            d.rename("/a", "/b"),
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(matches!(
            d.rename("/a", "/nowhere/a"),
            Err(VfsError::ParentNotFound(_))
        ));
    }

    #[test]
    fn test_remount_restores_tree() {
        let mut d = driver();
        d.mkdir("/docs").unwrap();
        write_file(&mut d, "/docs/a.txt", "persisted");

        let mut d = Driver::mount(d.into_backend()).unwrap();
        assert!(d.stat_path("/docs").unwrap().is_dir());
        assert_eq!(read_file(&mut d, "/docs/a.txt"), "persisted");
    }

    #[test]
    fn test_mount_skips_listed_entries_without_metadata() {
        let mut backend = MemoryBackend::new();
        let mut root = Metadata::directory(1);
        root.children.insert("ghost".to_string());
        root.children.insert("real".to_string());
        backend
            .put("meta:/", &serde_json::to_string(&root).unwrap())
            .unwrap();
        backend
            .put("meta:/real", &serde_json::to_string(&Metadata::file(1)).unwrap())
            .unwrap();

        let d = Driver::mount(backend).unwrap();
        let listing = d.readdir_path("/").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "real");
    }

    #[test]
    fn test_mount_ignores_unlisted_records() {
        let mut backend: Box<dyn Backend> = Box::new(MemoryBackend::new());
        backend
            .put("meta:/orphan", &serde_json::to_string(&Metadata::file(1)).unwrap())
            .unwrap();

        let d = Driver::mount(backend).unwrap();
        assert!(d.stat_path("/orphan").is_err());
        assert!(d.readdir_path("/").unwrap().is_empty());
    }

    #[test]
    fn test_parent_write_failure_rolls_back_entry() {
        let (backend, faults) = FaultyBackend::new(MemoryBackend::new());
        let mut d = Driver::mount(backend).unwrap();

        faults.fail_put_key("meta:/");
        let err = d.mkdir("/dir").unwrap_err();
        assert!(matches!(err, VfsError::IoFailure { .. }));

        faults.clear();
        assert!(d.stat_path("/dir").is_err());
        assert!(d.backend().get("meta:/dir").unwrap().is_none());
        assert!(d.readdir_path("/").unwrap().is_empty());
    }

    #[test]
    fn test_backend_failure_surfaces_on_write() {
        let (backend, faults) = FaultyBackend::new(MemoryBackend::new());
        let mut d = Driver::mount(backend).unwrap();
        d.create("/a").unwrap();

        let h = d.open("/a", OpenMode::WRITE).unwrap();
        faults.fail_puts(true);
        assert!(matches!(d.write(h, "x"), Err(VfsError::IoFailure { .. })));
        faults.clear();
        d.close(h).unwrap();

        assert_eq!(d.stat_path("/a").unwrap().size, 0);
    }

    #[test]
    fn test_failed_record_save_restores_content() {
        let (backend, faults) = FaultyBackend::new(MemoryBackend::new());
        let mut d = Driver::mount(backend).unwrap();
        write_file(&mut d, "/a", "abc");
        d.create("/empty").unwrap();

        for (path, before) in [("/a", "abc"), ("/empty", "")] {
            let h = d.open(path, OpenMode::WRITE).unwrap();
            faults.fail_put_key(&meta_key(path));
            assert!(matches!(d.write(h, "hello"), Err(VfsError::IoFailure { .. })));
            faults.clear();
            d.close(h).unwrap();

            let content = read_file(&mut d, path);
            assert_eq!(content, before);
            assert_eq!(d.stat_path(path).unwrap().size, content.chars().count() as u64);
        }
        assert!(d.backend().get("data:/empty").unwrap().is_none());
    }

    #[test]
    fn test_failed_truncate_keeps_content() {
        let (backend, faults) = FaultyBackend::new(MemoryBackend::new());
        let mut d = Driver::mount(backend).unwrap();
        write_file(&mut d, "/a", "hello");

        faults.fail_put_key("meta:/a");
        assert!(d.open("/a", OpenMode::WRITE | OpenMode::TRUNCATE).is_err());
        faults.clear();

        assert_eq!(d.open_handles(), 0);
        assert_eq!(read_file(&mut d, "/a"), "hello");
        assert_eq!(d.stat_path("/a").unwrap().size, 5);

        let d = Driver::mount(d.into_backend()).unwrap();
        assert_eq!(d.stat_path("/a").unwrap().size, 5);
    }

    #[test]
    fn test_failed_truncate_delete_restores_record() {
        let (backend, faults) = FaultyBackend::new(MemoryBackend::new());
        let mut d = Driver::mount(backend).unwrap();
        write_file(&mut d, "/a", "hello");

        faults.fail_deletes(true);
        assert!(d.open("/a", OpenMode::WRITE | OpenMode::TRUNCATE).is_err());
        faults.clear();

        assert_eq!(read_file(&mut d, "/a"), "hello");
        let d = Driver::mount(d.into_backend()).unwrap();
        assert_eq!(d.stat_path("/a").unwrap().size, 5);
    }

    #[test]
    fn test_rename_undone_when_source_listing_fails() {
        let (backend, faults) = FaultyBackend::new(MemoryBackend::new());
        let mut d = Driver::mount(backend).unwrap();
        d.mkdir("/src").unwrap();
        d.mkdir("/dst").unwrap();
        write_file(&mut d, "/src/a", "payload");
        let h = d.open("/src/a", OpenMode::READ).unwrap();

        faults.fail_put_key("meta:/src");
        assert!(matches!(
            d.rename("/src/a", "/dst/a"),
            Err(VfsError::IoFailure { .. })
        ));
        faults.clear();

        assert!(d.stat_path("/src/a").is_ok());
        assert!(d.stat_path("/dst/a").is_err());
        assert!(d.readdir_path("/dst").unwrap().is_empty());
        assert!(d.backend().get("data:/dst/a").unwrap().is_none());
        assert!(d.backend().get("meta:/dst/a").unwrap().is_none());

        // The handle still points at the source
        assert_eq!(d.read(h, None).unwrap(), "payload");
        d.close(h).unwrap();

        let mut d = Driver::mount(d.into_backend()).unwrap();
        assert_eq!(read_file(&mut d, "/src/a"), "payload");
        assert!(d.stat_path("/dst/a").is_err());
    }

    #[test]
    fn test_failed_delete_keeps_handles() {
        let (backend, faults) = FaultyBackend::new(MemoryBackend::new());
        let mut d = Driver::mount(backend).unwrap();
        write_file(&mut d, "/a", "hi");
        d.mkdir("/dir").unwrap();
        let file = d.open("/a", OpenMode::READ).unwrap();
        let dir = d.open("/dir", OpenMode::READ).unwrap();

        faults.fail_put_key("meta:/");
        assert!(d.delete("/a").is_err());
        assert!(d.rmdir("/dir").is_err());
        faults.clear();

        assert_eq!(d.readdir_path("/").unwrap().len(), 2);
        assert_eq!(d.read(file, None).unwrap(), "hi");
        assert!(d.readdir(dir).unwrap().is_empty());
        d.close(file).unwrap();
        d.close(dir).unwrap();
        assert_eq!(d.open_handles(), 0);
    }

    #[test]
    fn test_drive_size() {
        assert_eq!(driver().drive_size(), DriveSize::Unbounded);

        let d = Driver::mount(BlobCacheBackend::new(1024)).unwrap();
        match d.drive_size() {
            DriveSize::Limited { used, quota } => {
                assert!(used > 0);
                assert_eq!(quota, 1024);
            }
            DriveSize::Unbounded => panic!("expected a limited drive"),
        }
    }
}
