//! Drive-letter virtual filesystem core.
//!
//! This crate provides a filesystem of lettered drives (`A:`, `B:`, ...),
//! each backed by a pluggable key-value store:
//! - `Backend` trait: string key-value storage (memory, transactional, blob cache)
//! - `Drive` trait / `Driver`: directory tree, metadata and file handles over a backend
//! - `Registry`: letter-to-drive routing
//! - `FileSystem`: the path-based façade callers use
//!
//! # Architecture
//!
//! Drives persist a metadata record and a content blob per path. The façade
//! composes the drive primitives (open, read/write, close) into whole-file
//! operations and moves entries within or across drives.
//!
//! ```
//! use vfs_core::{FileSystem, MemoryBackend};
//!
//! let fs = FileSystem::new();
//! fs.mount('A', MemoryBackend::new()).unwrap();
//! fs.create_directory("A:/docs").unwrap();
//! fs.write_file("A:/docs/a.txt", "hi").unwrap();
//! assert_eq!(fs.read_text("A:/docs/a.txt").unwrap(), "hi");
//! ```

pub mod backend;
pub mod config;
pub mod drive;
pub mod error;
pub mod filesystem;
pub mod package;
pub mod path;
pub mod registry;

pub use backend::{
    Backend, BlobCacheBackend, FaultyBackend, Faults, MemoryBackend, StorageUsage,
    TransactionalBackend,
};
pub use config::{BackendKind, DriveConfig, VfsConfig};
pub use drive::{DirEntry, Drive, DriveSize, Driver, EntryKind, Handle, Metadata, OpenMode};
pub use error::{VfsError, VfsResult};
pub use filesystem::{DriveInfo, FileContent, FileSystem};
pub use package::{
    load_package, load_package_from_path, load_packages, FileEntry, LoadedPackage,
    PackageManifest,
};
pub use registry::{Registry, SharedDrive};
