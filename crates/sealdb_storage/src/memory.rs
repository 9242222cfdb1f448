//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Suitable for unit tests, crash simulation and ephemeral databases.
///
/// Cloning the backend with [`handle`](Self::handle) yields a second
/// backend over the *same* bytes. Tests keep a handle, hand the other one to
/// a database, and inspect or reopen the bytes after a simulated crash.
///
/// # Example
///
/// ```rust
/// use sealdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.handle();
/// backend.append(b"test data").unwrap();
/// assert_eq!(observer.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns another backend sharing this backend's bytes.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites a single byte. Used by tests to simulate bit rot.
    ///
    /// Does nothing if `offset` is past the end.
    pub fn corrupt_byte(&self, offset: u64) {
        let mut data = self.data.write();
        if let Some(byte) = usize::try_from(offset)
            .ok()
            .and_then(|offset| data.get_mut(offset))
        {
            *byte ^= 0xFF;
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {new_size} which is greater than current size {current_size}"
                ),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_append_returns_correct_offset() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn memory_write_at_overwrites_in_place() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();
        backend.write_at(0, b"HELLO").unwrap();
        assert_eq!(backend.data(), b"HELLO world");
    }

    #[test]
    fn memory_write_at_extends_with_zeros() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(3, b"ab").unwrap();
        assert_eq!(backend.data(), vec![0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn memory_read_at_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn memory_handles_share_bytes() {
        let mut backend = InMemoryBackend::new();
        let observer = backend.handle();

        backend.write_at(0, b"shared").unwrap();
        assert_eq!(observer.data(), b"shared");

        observer.corrupt_byte(0);
        assert_ne!(backend.read_at(0, 1).unwrap(), b"s");
    }

    #[test]
    fn memory_with_data() {
        let backend = InMemoryBackend::with_data(b"preloaded".to_vec());
        assert_eq!(backend.size().unwrap(), 9);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"preloaded");
    }

    #[test]
    fn memory_truncate() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.read_at(0, 5).unwrap(), b"hello");

        backend.truncate(0).unwrap();
        assert_eq!(backend.size().unwrap(), 0);

        assert!(backend.truncate(100).is_err());
    }

    proptest! {
        #[test]
        fn write_then_read_returns_written_bytes(
            offset in 0u64..8192,
            bytes in proptest::collection::vec(any::<u8>(), 1..512),
        ) {
            let mut backend = InMemoryBackend::new();
            backend.write_at(offset, &bytes).unwrap();
            prop_assert_eq!(backend.size().unwrap(), offset + bytes.len() as u64);
            prop_assert_eq!(backend.read_at(offset, bytes.len()).unwrap(), bytes);
        }
    }
}
