//! Quota-aware blob store.

use std::collections::HashMap;

use super::{Backend, StorageUsage};
use crate::error::{VfsError, VfsResult};

/// Blob store with a fixed byte quota.
///
/// Usage counts key and value bytes. A `put` that would push usage past
/// the quota fails and leaves the previous value in place.
#[derive(Debug, Clone)]
pub struct BlobCacheBackend {
    blobs: HashMap<String, String>,
    used: u64,
    quota: u64,
}

impl BlobCacheBackend {
    pub fn new(quota: u64) -> Self {
        Self {
            blobs: HashMap::new(),
            used: 0,
            quota,
        }
    }

    fn entry_size(key: &str, value: &str) -> u64 {
        (key.len() + value.len()) as u64
    }
}

impl Backend for BlobCacheBackend {
    fn get(&self, key: &str) -> VfsResult<Option<String>> {
        Ok(self.blobs.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> VfsResult<()> {
        let previous = self
            .blobs
            .get(key)
            .map(|v| Self::entry_size(key, v))
            .unwrap_or(0);
        let used = self.used - previous + Self::entry_size(key, value);
        if used > self.quota {
            return Err(VfsError::io_failure(
                key,
                format!("quota exceeded ({} of {} bytes)", used, self.quota),
            ));
        }

        self.blobs.insert(key.to_string(), value.to_string());
        self.used = used;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> VfsResult<()> {
        if let Some(value) = self.blobs.remove(key) {
            self.used -= Self::entry_size(key, &value);
        }
        Ok(())
    }

    fn usage(&self) -> Option<StorageUsage> {
        Some(StorageUsage {
            used: self.used,
            quota: self.quota,
        })
    }
}
