//! WAL writer and reader.

use crate::error::{CoreError, CoreResult};
use crate::wal::iterator::{WalRecordIterator, CRC_SIZE, HEADER_SIZE};
use crate::wal::record::{compute_crc32, WalRecord, WAL_MAGIC, WAL_VERSION};
use crate::wal::recovery::RecoveredLog;
use parking_lot::Mutex;
use sealdb_storage::StorageBackend;
use tracing::debug;

/// Manages the write-ahead log file.
///
/// The log only ever grows by whole batches and shrinks by truncation: a
/// commit appends its records in one call and syncs, and a checkpoint resets
/// the log to empty.
pub struct WalManager {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
}

impl WalManager {
    /// Creates a new WAL manager.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
        }
    }

    /// Wraps a record in its envelope.
    fn encode(record: &WalRecord, out: &mut Vec<u8>) -> CoreResult<()> {
        let payload = record.encode_payload()?;
        let start = out.len();

        out.extend_from_slice(&WAL_MAGIC);
        out.extend_from_slice(&WAL_VERSION.to_le_bytes());
        out.push(record.record_type().as_byte());

        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&payload);

        let crc = compute_crc32(&out[start..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Appends a single record.
    ///
    /// Returns the offset where the record was written.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Appends several records with a single backend write.
    ///
    /// Returns the offset of the first record.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails. A failed write may
    /// leave a torn tail; callers that need to undo it record
    /// [`size`](Self::size) first and [`truncate`](Self::truncate) back.
    pub fn append_batch(&self, records: &[WalRecord]) -> CoreResult<u64> {
        let mut data = Vec::new();
        for record in records {
            data.reserve(HEADER_SIZE + CRC_SIZE);
            Self::encode(record, &mut data)?;
        }

        let offset = self.backend.lock().append(&data)?;
        debug!(records = records.len(), bytes = data.len(), offset, "appended WAL batch");
        Ok(offset)
    }

    /// Makes every appended record durable.
    ///
    /// A no-op when the manager was created with `sync_on_commit == false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        if self.sync_on_commit {
            backend.sync()?;
        } else {
            backend.flush()?;
        }
        Ok(())
    }

    /// Returns the current WAL size.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Returns true if the log holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Returns a streaming iterator over WAL records.
    ///
    /// The WAL stays locked until the iterator is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<WalRecordIterator<'_>> {
        WalRecordIterator::new(self.backend.lock(), 0)
    }

    /// Reads all records from the WAL.
    ///
    /// # Errors
    ///
    /// Returns the first read or corruption error encountered.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        self.iter()?.collect()
    }

    /// Scans the log and groups page records by committed transaction.
    ///
    /// # Errors
    ///
    /// Returns an error on fatal corruption, see [`RecoveredLog::scan`].
    pub fn recover(&self) -> CoreResult<RecoveredLog> {
        RecoveredLog::scan(self.iter()?)
    }

    /// Truncates the WAL to `offset` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(offset)?;
        Ok(())
    }

    /// Empties the WAL and syncs the truncation.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation or sync fails.
    pub fn clear(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(0)?;
        if self.sync_on_commit {
            backend.sync()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PageNumber, TransactionId};
    use sealdb_storage::InMemoryBackend;

    fn create_wal() -> WalManager {
        WalManager::new(Box::new(InMemoryBackend::new()), false)
    }

    #[test]
    fn append_and_read() {
        let wal = create_wal();
        let record = WalRecord::Begin {
            txid: TransactionId::new(1),
        };

        let offset = wal.append(&record).unwrap();
        assert_eq!(offset, 0);

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], (0, record));
    }

    #[test]
    fn batch_is_one_contiguous_write() {
        let wal = create_wal();
        let txid = TransactionId::new(4);
        let batch = vec![
            WalRecord::Begin { txid },
            WalRecord::Page {
                txid,
                page: PageNumber::new(1),
                block: vec![7; 128],
            },
            WalRecord::Commit {
                txid,
                page_records: 1,
            },
        ];

        assert_eq!(wal.append_batch(&batch).unwrap(), 0);
        let offsets: Vec<u64> = wal.read_all().unwrap().into_iter().map(|(o, _)| o).collect();
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], (HEADER_SIZE + 8 + CRC_SIZE) as u64);
        assert_eq!(wal.size().unwrap(), offsets[2] + (HEADER_SIZE + 12 + CRC_SIZE) as u64);
    }

    #[test]
    fn clear_empties_log() {
        let wal = create_wal();
        wal.append(&WalRecord::Begin {
            txid: TransactionId::new(1),
        })
        .unwrap();
        assert!(!wal.is_empty().unwrap());

        wal.clear().unwrap();
        assert!(wal.is_empty().unwrap());
        assert!(wal.read_all().unwrap().is_empty());
    }
}
