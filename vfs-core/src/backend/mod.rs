//! Backend adapters - the persisted get/put/delete store behind a drive.
//!
//! A backend knows nothing about paths, directories or handles. Keys are
//! opaque strings and values are strings; the drive driver decides the
//! layout and sequencing. Failures are returned, never swallowed.

mod blob_cache;
mod faulty;
mod memory;
mod transactional;

pub use blob_cache::BlobCacheBackend;
pub use faulty::{FaultyBackend, Faults};
pub use memory::MemoryBackend;
pub use transactional::{Transaction, TransactionalBackend};

use crate::error::VfsResult;

/// Space accounting reported by backends with an inherent capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    /// Bytes currently stored.
    pub used: u64,
    /// Maximum bytes the backend accepts.
    pub quota: u64,
}

/// Key-value capability set a storage technology provides to a drive.
pub trait Backend: Send + Sync {
    /// Fetch a value. `Ok(None)` means the key is absent.
    fn get(&self, key: &str) -> VfsResult<Option<String>>;

    /// Store a value, replacing any previous one.
    fn put(&mut self, key: &str, value: &str) -> VfsResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&mut self, key: &str) -> VfsResult<()>;

    /// Enumerate keys starting with `prefix`, if the store supports it.
    fn keys_with_prefix(&self, _prefix: &str) -> Option<Vec<String>> {
        None
    }

    /// Quota and usage, for stores with a fixed capacity.
    fn usage(&self) -> Option<StorageUsage> {
        None
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn get(&self, key: &str) -> VfsResult<Option<String>> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, value: &str) -> VfsResult<()> {
        (**self).put(key, value)
    }

    fn delete(&mut self, key: &str) -> VfsResult<()> {
        (**self).delete(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Option<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }

    fn usage(&self) -> Option<StorageUsage> {
        (**self).usage()
    }
}
