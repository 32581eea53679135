//! Descriptor table - handle allocation for one driver.

use std::collections::{BTreeSet, HashMap};

use super::{Handle, Metadata, OpenMode};
use crate::error::{VfsError, VfsResult};

/// State behind an open handle.
#[derive(Debug, Clone)]
pub struct OpenFile {
    /// Driver-relative path the handle was opened against.
    pub path: String,
    pub mode: OpenMode,
    /// Character offset for sequential reads and splice writes.
    pub cursor: usize,
    /// Metadata as of open or the last operation through this handle.
    pub snapshot: Metadata,
}

/// Map from small integers to open files.
///
/// Closed ids are recycled smallest-first before new ones are minted, so
/// ids stay bounded in long sessions. An id is never live twice at once.
#[derive(Debug)]
pub struct DescriptorTable {
    open: HashMap<Handle, OpenFile>,
    free: BTreeSet<Handle>,
    next: Handle,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self {
            open: HashMap::new(),
            free: BTreeSet::new(),
            next: 1,
        }
    }

    /// Register an open file and return its handle.
    pub fn allocate(&mut self, file: OpenFile) -> Handle {
        let handle = match self.free.pop_first() {
            Some(h) => h,
            None => {
                let h = self.next;
                self.next += 1;
                h
            }
        };
        self.open.insert(handle, file);
        handle
    }

    pub fn get(&self, handle: Handle) -> VfsResult<&OpenFile> {
        self.open.get(&handle).ok_or(VfsError::InvalidHandle(handle))
    }

    pub fn get_mut(&mut self, handle: Handle) -> VfsResult<&mut OpenFile> {
        self.open
            .get_mut(&handle)
            .ok_or(VfsError::InvalidHandle(handle))
    }

    /// Remove a handle, making its id available again.
    pub fn release(&mut self, handle: Handle) -> VfsResult<OpenFile> {
        let file = self
            .open
            .remove(&handle)
            .ok_or(VfsError::InvalidHandle(handle))?;
        self.free.insert(handle);
        Ok(file)
    }

    /// Release every handle open on `path`. Returns the released ids.
    pub fn invalidate_path(&mut self, path: &str) -> Vec<Handle> {
        let stale: Vec<Handle> = self
            .open
            .iter()
            .filter(|(_, f)| f.path == path)
            .map(|(h, _)| *h)
            .collect();
        for handle in &stale {
            self.open.remove(handle);
            self.free.insert(*handle);
        }
        stale
    }

    /// Repoint handles on `old` to `new` after a rename.
    pub fn rename_path(&mut self, old: &str, new: &str) {
        for file in self.open.values_mut().filter(|f| f.path == old) {
            file.path = new.to_string();
        }
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
