//! Backing transports: the file storage that VFS requests operate on.
//!
//! A backing transport is shared by every connection of a server, so
//! implementations are `Send + Sync` and make their own mutating operations
//! safe for concurrent use.

mod local;
mod memory;
mod readonly;

pub use local::LocalTransport;
pub use memory::MemoryTransport;
pub use readonly::ReadOnlyTransport;

use bytes::Bytes;
use smartwire_protocol::{ReadvRange, Stat, TransportError};

/// File-level storage operations addressed by relative path.
pub trait Transport: Send + Sync {
    fn has(&self, path: &str) -> Result<bool, TransportError>;

    fn get_bytes(&self, path: &str) -> Result<Bytes, TransportError>;

    /// Replaces the file atomically.
    fn put_bytes(&self, path: &str, bytes: &[u8], mode: Option<u32>)
        -> Result<(), TransportError>;

    /// Replaces the file without atomicity, optionally creating its parent.
    fn put_bytes_non_atomic(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
        create_parent_dir: bool,
        dir_mode: Option<u32>,
    ) -> Result<(), TransportError>;

    /// Appends to the file, creating it if missing. Returns the prior length.
    fn append_bytes(&self, path: &str, bytes: &[u8], mode: Option<u32>)
        -> Result<u64, TransportError>;

    fn delete(&self, path: &str) -> Result<(), TransportError>;

    fn mkdir(&self, path: &str, mode: Option<u32>) -> Result<(), TransportError>;

    fn rmdir(&self, path: &str) -> Result<(), TransportError>;

    /// Renames `from` to `to`, failing if `to` exists.
    fn rename(&self, from: &str, to: &str) -> Result<(), TransportError>;

    /// Moves `from` to `to`, replacing `to` if it exists.
    fn move_path(&self, from: &str, to: &str) -> Result<(), TransportError>;

    fn stat(&self, path: &str) -> Result<Stat, TransportError>;

    /// Reads each range in order. Ranges may overlap or repeat.
    fn readv(&self, path: &str, ranges: &[ReadvRange]) -> Result<Vec<Bytes>, TransportError> {
        let data = self.get_bytes(path)?;
        slice_ranges(path, &data, ranges)
    }

    /// Names of the entries directly inside a directory, sorted.
    fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError>;

    /// Paths of all files below a directory, relative to it, sorted.
    fn iter_files_recursive(&self, path: &str) -> Result<Vec<String>, TransportError>;

    fn is_readonly(&self) -> bool {
        false
    }
}

/// Cuts `ranges` out of a fully loaded file.
pub fn slice_ranges(
    path: &str,
    data: &Bytes,
    ranges: &[ReadvRange],
) -> Result<Vec<Bytes>, TransportError> {
    let len = data.len() as u64;
    ranges
        .iter()
        .map(|range| {
            if range.end() > len {
                return Err(TransportError::ShortReadv {
                    path: path.to_string(),
                    offset: range.start,
                    length: range.length,
                    actual: len.saturating_sub(range.start),
                });
            }
            Ok(data.slice(range.start as usize..range.end() as usize))
        })
        .collect()
}

/// Splits a client path into normalised components.
///
/// Leading slashes are ignored, `.` is dropped and `..` removes the previous
/// component. Escaping above the root is refused.
pub fn normalize_path(path: &str) -> Result<Vec<&str>, TransportError> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(TransportError::PathNotPermitted(path.to_string()));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a/b/c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(normalize_path("/a//./b/").unwrap(), vec!["a", "b"]);
        assert_eq!(normalize_path("a/../b").unwrap(), vec!["b"]);
        assert!(normalize_path("").unwrap().is_empty());
        assert!(normalize_path(".").unwrap().is_empty());
    }

    #[test]
    fn test_normalize_refuses_escape() {
        assert!(matches!(
            normalize_path("../etc/passwd"),
            Err(TransportError::PathNotPermitted(_))
        ));
        assert!(matches!(
            normalize_path("a/../../b"),
            Err(TransportError::PathNotPermitted(_))
        ));
    }

    #[test]
    fn test_slice_ranges() {
        let data = Bytes::from_static(b"0123456789");
        let ranges = [
            ReadvRange::new(0, 1),
            ReadvRange::new(3, 2),
            ReadvRange::new(3, 2),
            ReadvRange::new(8, 2),
        ];
        let parts = slice_ranges("a", &data, &ranges).unwrap();
        assert_eq!(parts, vec![
            Bytes::from_static(b"0"),
            Bytes::from_static(b"34"),
            Bytes::from_static(b"34"),
            Bytes::from_static(b"89"),
        ]);
    }

    #[test]
    fn test_slice_ranges_short() {
        let data = Bytes::from_static(b"0123456789");
        let err = slice_ranges("a", &data, &[ReadvRange::new(8, 5)]).unwrap_err();
        match err {
            TransportError::ShortReadv {
                offset,
                length,
                actual,
                ..
            } => assert_eq!((offset, length, actual), (8, 5, 2)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
