//! Drive-qualified path parsing and driver-relative path helpers.
//!
//! A qualified path looks like `A:/docs/notes.txt`. The letter is
//! case-insensitive; the remainder is normalized to a driver-relative path
//! that always starts with `/` and never ends with one (except root).

use crate::error::{VfsError, VfsResult};

/// Root of every drive.
pub const ROOT: &str = "/";

/// Split a qualified path into its drive letter and normalized remainder.
///
/// # Examples
/// ```
/// use vfs_core::path::parse_path;
/// assert_eq!(parse_path("a://docs//a.txt/").unwrap(), ('A', "/docs/a.txt".to_string()));
/// assert_eq!(parse_path("C:").unwrap(), ('C', "/".to_string()));
/// assert!(parse_path("docs/a.txt").is_err());
/// ```
pub fn parse_path(qualified: &str) -> VfsResult<(char, String)> {
    let (drive, rest) = qualified
        .split_once(':')
        .ok_or_else(|| VfsError::InvalidPath(qualified.to_string()))?;

    let letter = parse_letter(drive).ok_or_else(|| VfsError::InvalidPath(qualified.to_string()))?;
    let path = normalize(rest).map_err(|_| VfsError::InvalidPath(qualified.to_string()))?;
    Ok((letter, path))
}

/// Parse a drive designator (`"a"`, `"A"`, `"A:"`) into an uppercase letter.
pub fn parse_letter(drive: &str) -> Option<char> {
    let drive = drive.strip_suffix(':').unwrap_or(drive);
    let mut chars = drive.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

/// Normalize a driver-relative path.
///
/// Repeated slashes collapse, a single leading slash is ensured and a
/// trailing slash is stripped. `.` and `..` segments have no meaning here
/// and are rejected.
pub fn normalize(path: &str) -> VfsResult<String> {
    if path.contains('\0') {
        return Err(VfsError::InvalidPath(path.to_string()));
    }

    let mut result = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(VfsError::InvalidPath(path.to_string()));
        }
        result.push('/');
        result.push_str(segment);
    }

    if result.is_empty() {
        result.push('/');
    }
    Ok(result)
}

/// Parent of a normalized path. The parent of root is root.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(pos) => &path[..pos],
    }
}

/// Final segment of a normalized path; empty for root.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Join a normalized directory path and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Render a qualified path for display and error messages.
pub fn qualify(letter: char, path: &str) -> String {
    format!("{}:{}", letter, path)
}
