//! Ordered key-value store with all-or-nothing transactions.
//!
//! Drives only see the [`Backend`] surface, so each of their puts and
//! deletes commits on its own. Multi-key updates such as an entry plus its
//! parent listing are sequenced and rolled back by the driver itself.
//! [`TransactionalBackend::transaction`] is for callers that own the store
//! directly and want several keys to land together.

use std::collections::BTreeMap;

use super::Backend;
use crate::error::VfsResult;

/// Ordered store whose mutations are applied through transactions.
///
/// A transaction buffers its writes; they become visible only when the
/// closure returns `Ok`. An `Err` discards everything the closure did.
/// Single `put`/`delete` calls through [`Backend`] are one-op transactions.
#[derive(Debug, Default, Clone)]
pub struct TransactionalBackend {
    entries: BTreeMap<String, String>,
    commits: u64,
}

/// Pending writes of an open transaction.
pub struct Transaction<'a> {
    base: &'a BTreeMap<String, String>,
    pending: BTreeMap<String, Option<String>>,
}

impl Transaction<'_> {
    /// Read through pending writes, then the committed state.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.pending.get(key) {
            Some(value) => value.clone(),
            None => self.base.get(key).cloned(),
        }
    }

    pub fn put(&mut self, key: &str, value: &str) {
        self.pending.insert(key.to_string(), Some(value.to_string()));
    }

    pub fn delete(&mut self, key: &str) {
        self.pending.insert(key.to_string(), None);
    }
}

impl TransactionalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` in a transaction, committing its writes only on success.
    pub fn transaction<T, F>(&mut self, f: F) -> VfsResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> VfsResult<T>,
    {
        let (result, pending) = {
            let mut tx = Transaction {
                base: &self.entries,
                pending: BTreeMap::new(),
            };
            let result = f(&mut tx);
            (result, tx.pending)
        };

        let value = result?;
        for (key, write) in pending {
            match write {
                Some(v) => {
                    self.entries.insert(key, v);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
        self.commits += 1;
        Ok(value)
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> u64 {
        self.commits
    }
}

impl Backend for TransactionalBackend {
    fn get(&self, key: &str) -> VfsResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> VfsResult<()> {
        self.transaction(|tx| {
            tx.put(key, value);
            Ok(())
        })
    }

    fn delete(&mut self, key: &str) -> VfsResult<()> {
        self.transaction(|tx| {
            tx.delete(key);
            Ok(())
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> Option<Vec<String>> {
        Some(
            self.entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect(),
        )
    }
}
