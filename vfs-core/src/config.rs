//! Drive configuration.
//!
//! A [`VfsConfig`] lists the drives to mount, which backend each one uses and
//! which packages to install on it. It is plain JSON so it can live in a file
//! next to the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::{BlobCacheBackend, MemoryBackend, TransactionalBackend};
use crate::error::{VfsError, VfsResult};
use crate::filesystem::FileSystem;
use crate::package::load_package_from_path;

/// Quota used for blob-cache drives that don't set one (5 MiB).
pub const DEFAULT_BLOB_QUOTA: u64 = 5 * 1024 * 1024;

/// Storage flavour behind a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Memory,
    Transactional,
    BlobCache,
}

/// One drive to mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub letter: char,
    pub backend: BackendKind,
    /// Byte quota, blob-cache drives only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<u64>,
    /// ZIP packages installed onto the drive after mounting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PathBuf>,
}

impl DriveConfig {
    pub fn new(letter: char, backend: BackendKind) -> Self {
        Self {
            letter,
            backend,
            quota: None,
            packages: Vec::new(),
        }
    }
}

/// Full filesystem configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfsConfig {
    pub drives: Vec<DriveConfig>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            drives: vec![
                DriveConfig::new('A', BackendKind::Memory),
                DriveConfig::new('B', BackendKind::Transactional),
                DriveConfig {
                    quota: Some(DEFAULT_BLOB_QUOTA),
                    ..DriveConfig::new('C', BackendKind::BlobCache)
                },
            ],
        }
    }
}

impl VfsConfig {
    pub fn from_json(json: &str) -> VfsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file.
    pub fn from_path(path: &Path) -> VfsResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The drive entry for `letter`, creating a memory drive if absent.
    pub fn drive_mut(&mut self, letter: char) -> &mut DriveConfig {
        let letter = letter.to_ascii_uppercase();
        let index = match self
            .drives
            .iter()
            .position(|d| d.letter.to_ascii_uppercase() == letter)
        {
            Some(index) => index,
            None => {
                self.drives.push(DriveConfig::new(letter, BackendKind::Memory));
                self.drives.len() - 1
            }
        };
        &mut self.drives[index]
    }

    /// Mount every drive and install its packages.
    pub fn build(&self) -> VfsResult<FileSystem> {
        let fs = FileSystem::new();
        for drive in &self.drives {
            if drive.quota.is_some() && drive.backend != BackendKind::BlobCache {
                return Err(VfsError::Unsupported(format!(
                    "quota on {:?} drive {}:",
                    drive.backend, drive.letter
                )));
            }
            match drive.backend {
                BackendKind::Memory => fs.mount(drive.letter, MemoryBackend::new())?,
                BackendKind::Transactional => {
                    fs.mount(drive.letter, TransactionalBackend::new())?
                }
                BackendKind::BlobCache => fs.mount(
                    drive.letter,
                    BlobCacheBackend::new(drive.quota.unwrap_or(DEFAULT_BLOB_QUOTA)),
                )?,
            }

            for package in &drive.packages {
                let pkg = load_package_from_path(package)?;
                let count = pkg.install(&fs, drive.letter)?;
                info!(
                    package = %pkg.manifest.name,
                    drive = %drive.letter,
                    files = count,
                    "loaded package"
                );
            }
        }
        Ok(fs)
    }
}
