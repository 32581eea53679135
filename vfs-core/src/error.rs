//! Error types for the virtual filesystem.

use thiserror::Error;

/// Errors that can occur during filesystem operations.
#[derive(Error, Debug)]
pub enum VfsError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Drive not found: {0}:")]
    DriveNotFound(char),

    #[error("Drive already registered: {0}:")]
    DriveExists(char),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parent directory not found: {0}")]
    ParentNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(u32),

    #[error("Handle {0} is not open for writing")]
    ModeDenied(u32),

    #[error("I/O failure on {key}: {reason}")]
    IoFailure { key: String, reason: String },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("{op} {path}: {source}")]
    Op {
        op: &'static str,
        path: String,
        #[source]
        source: Box<VfsError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VfsError {
    /// Backend failure for a storage key.
    pub fn io_failure(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IoFailure {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Wrap this error with the high-level operation and path it came from.
    pub fn context(self, op: &'static str, path: impl Into<String>) -> Self {
        Self::Op {
            op,
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with every `Op` context layer removed.
    pub fn root(&self) -> &VfsError {
        let mut err = self;
        while let VfsError::Op { source, .. } = err {
            err = source;
        }
        err
    }

    /// True for `NotFound` and `ParentNotFound`, looking through context.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            VfsError::NotFound(_) | VfsError::ParentNotFound(_)
        )
    }
}

/// Result type for filesystem operations.
pub type VfsResult<T> = Result<T, VfsError>;

/// Attach operation context to the error side of a result.
pub(crate) trait ResultExt<T> {
    fn context(self, op: &'static str, path: &str) -> VfsResult<T>;
}

impl<T> ResultExt<T> for VfsResult<T> {
    fn context(self, op: &'static str, path: &str) -> VfsResult<T> {
        self.map_err(|e| e.context(op, path))
    }
}
