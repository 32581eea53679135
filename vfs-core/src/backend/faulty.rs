//! Fault-injecting backend decorator.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{Backend, StorageUsage};
use crate::error::{VfsError, VfsResult};

#[derive(Debug, Default)]
struct FaultSet {
    get: bool,
    put: bool,
    put_key: Option<String>,
    delete: bool,
}

/// Switches controlling which operations a [`FaultyBackend`] fails.
///
/// Cloning shares the switches, so a test can keep a `Faults` while the
/// backend itself is owned by a drive.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    inner: Arc<Mutex<FaultSet>>,
}

impl Faults {
    fn lock(&self) -> MutexGuard<'_, FaultSet> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_gets(&self, on: bool) {
        self.lock().get = on;
    }

    pub fn fail_puts(&self, on: bool) {
        self.lock().put = on;
    }

    /// Fail puts to exactly `key`.
    pub fn fail_put_key(&self, key: &str) {
        self.lock().put_key = Some(key.to_string());
    }

    pub fn fail_deletes(&self, on: bool) {
        self.lock().delete = on;
    }

    pub fn clear(&self) {
        *self.lock() = FaultSet::default();
    }
}

/// Wraps a backend and fails operations selected through [`Faults`].
pub struct FaultyBackend<B: Backend> {
    inner: B,
    faults: Faults,
}

impl<B: Backend> FaultyBackend<B> {
    pub fn new(inner: B) -> (Self, Faults) {
        let faults = Faults::default();
        (
            Self {
                inner,
                faults: faults.clone(),
            },
            faults,
        )
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Backend> Backend for FaultyBackend<B> {
    fn get(&self, key: &str) -> VfsResult<Option<String>> {
        if self.faults.lock().get {
            return Err(VfsError::io_failure(key, "injected get failure"));
        }
        self.inner.get(key)
    }

    fn put(&mut self, key: &str, value: &str) -> VfsResult<()> {
        let fail = {
            let faults = self.faults.lock();
            faults.put || faults.put_key.as_deref() == Some(key)
        };
        if fail {
            return Err(VfsError::io_failure(key, "injected put failure"));
        }
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &str) -> VfsResult<()> {
        if self.faults.lock().delete {
            return Err(VfsError::io_failure(key, "injected delete failure"));
        }
        self.inner.delete(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Option<Vec<String>> {
        self.inner.keys_with_prefix(prefix)
    }

    fn usage(&self) -> Option<StorageUsage> {
        self.inner.usage()
    }
}
