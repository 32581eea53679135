//! Drive registry - maps drive letters to drivers and routes paths.
//!
//! Registration is append-only: a letter, once bound, keeps its drive for
//! the lifetime of the registry. Each drive sits behind its own mutex so
//! primitive operations on one drive are serialized while different drives
//! proceed independently.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::drive::Drive;
use crate::error::{VfsError, VfsResult};
use crate::path::parse_path;

/// A registered drive, shareable across threads.
#[derive(Clone)]
pub struct SharedDrive {
    letter: char,
    inner: Arc<Mutex<Box<dyn Drive>>>,
}

impl SharedDrive {
    pub fn letter(&self) -> char {
        self.letter
    }

    /// Lock the drive for a sequence of primitive operations.
    pub fn lock(&self) -> VfsResult<MutexGuard<'_, Box<dyn Drive>>> {
        self.inner.lock().map_err(|_| VfsError::LockPoisoned)
    }
}

/// Letter-to-drive table.
#[derive(Default)]
pub struct Registry {
    drives: BTreeMap<char, SharedDrive>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("drives", &self.letters())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a drive to a letter (A-Z, case-insensitive).
    pub fn add_drive(&mut self, letter: char, drive: Box<dyn Drive>) -> VfsResult<()> {
        let letter = drive_letter(letter)?;
        if self.drives.contains_key(&letter) {
            return Err(VfsError::DriveExists(letter));
        }
        self.drives.insert(
            letter,
            SharedDrive {
                letter,
                inner: Arc::new(Mutex::new(drive)),
            },
        );
        Ok(())
    }

    /// Look up a drive by letter.
    pub fn get(&self, letter: char) -> VfsResult<SharedDrive> {
        let upper = letter.to_ascii_uppercase();
        self.drives
            .get(&upper)
            .cloned()
            .ok_or(VfsError::DriveNotFound(upper))
    }

    pub fn is_mounted(&self, letter: char) -> bool {
        self.drives.contains_key(&letter.to_ascii_uppercase())
    }

    /// Registered letters in order.
    pub fn letters(&self) -> Vec<char> {
        self.drives.keys().copied().collect()
    }

    /// Route a qualified path to its drive and driver-relative path.
    pub fn resolve(&self, qualified: &str) -> VfsResult<(SharedDrive, String)> {
        let (letter, path) = parse_path(qualified)?;
        Ok((self.get(letter)?, path))
    }
}

/// Validate a drive letter and return it uppercased.
fn drive_letter(letter: char) -> VfsResult<char> {
    let upper = letter.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        Ok(upper)
    } else {
        Err(VfsError::InvalidPath(format!("{}:", letter)))
    }
}
