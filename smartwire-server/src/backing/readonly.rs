//! Read-only decorator for a backing transport.

use super::Transport;
use bytes::Bytes;
use smartwire_protocol::{ReadvRange, Stat, TransportError};
use std::sync::Arc;

/// Passes reads through and rejects every mutation with `ReadOnly`.
pub struct ReadOnlyTransport {
    inner: Arc<dyn Transport>,
}

impl ReadOnlyTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }
}

impl Transport for ReadOnlyTransport {
    fn has(&self, path: &str) -> Result<bool, TransportError> {
        self.inner.has(path)
    }

    fn get_bytes(&self, path: &str) -> Result<Bytes, TransportError> {
        self.inner.get_bytes(path)
    }

    fn put_bytes(&self, _: &str, _: &[u8], _: Option<u32>) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn put_bytes_non_atomic(
        &self,
        _: &str,
        _: &[u8],
        _: Option<u32>,
        _: bool,
        _: Option<u32>,
    ) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn append_bytes(&self, _: &str, _: &[u8], _: Option<u32>) -> Result<u64, TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn delete(&self, _: &str) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn mkdir(&self, _: &str, _: Option<u32>) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn rmdir(&self, _: &str) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn rename(&self, _: &str, _: &str) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn move_path(&self, _: &str, _: &str) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly)
    }

    fn stat(&self, path: &str) -> Result<Stat, TransportError> {
        self.inner.stat(path)
    }

    fn readv(&self, path: &str, ranges: &[ReadvRange]) -> Result<Vec<Bytes>, TransportError> {
        self.inner.readv(path, ranges)
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError> {
        self.inner.list_dir(path)
    }

    fn iter_files_recursive(&self, path: &str) -> Result<Vec<String>, TransportError> {
        self.inner.iter_files_recursive(path)
    }

    fn is_readonly(&self) -> bool {
        true
    }
}
