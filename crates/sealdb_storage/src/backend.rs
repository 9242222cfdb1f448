//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for SealDB.
///
/// Storage backends are **opaque byte stores** addressed by offset. The page
/// file writes fixed-size blocks in place with [`write_at`](Self::write_at);
/// the write-ahead log only ever [`append`](Self::append)s and
/// [`truncate`](Self::truncate)s.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes previously written at that range
/// - `write_at` past the current end extends the storage, zero-filling any gap
/// - `sync` makes every completed write durable
/// - Backends must be `Send + Sync` so a database handle can be shared
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range extends past the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`, overwriting or extending the storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush`: after it returns, the
    /// written bytes survive power loss.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to reset the write-ahead log after a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size, the
    /// backend is read-only, or the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
