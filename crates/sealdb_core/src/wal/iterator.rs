//! Streaming WAL record iterator.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{compute_crc32, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
use parking_lot::MutexGuard;
use sealdb_storage::StorageBackend;

/// Header size for WAL records.
/// magic (4) + version (2) + type (1) + length (4) = 11 bytes
pub(crate) const HEADER_SIZE: usize = 11;

/// CRC size.
pub(crate) const CRC_SIZE: usize = 4;

/// A streaming iterator over WAL records.
///
/// Records are read one at a time from the backend, so memory stays bounded
/// by the largest single record.
///
/// - A truncated header or payload ends iteration cleanly
/// - A CRC mismatch yields [`CoreError::ChecksumMismatch`]
/// - Bad magic, a newer version or an unknown type yields
///   [`CoreError::WalCorruption`]
///
/// Iteration stops after the first error.
pub struct WalRecordIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    current_offset: u64,
    finished: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Creates a new streaming iterator starting at the given offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(
        backend: MutexGuard<'a, Box<dyn StorageBackend>>,
        start_offset: u64,
    ) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            current_offset: start_offset,
            finished: false,
        })
    }

    /// Returns the offset just past the last record read.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.current_offset
    }

    fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.current_offset)
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        let start = self.current_offset;

        if self.remaining() < HEADER_SIZE as u64 {
            return Ok(None);
        }
        let header = self.backend.read_at(start, HEADER_SIZE)?;

        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }

        let type_byte = header[6];
        let record_type = WalRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::wal_corruption(format!(
                "unknown record type {type_byte} at offset {start}"
            ))
        })?;

        let payload_len =
            u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;

        if self.remaining() < total_len as u64 {
            // torn tail from a crash mid-append
            return Ok(None);
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, payload_len + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(payload_len);
        let stored_crc =
            u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut covered = header;
        covered.extend_from_slice(payload);
        let computed_crc = compute_crc32(&covered);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = WalRecord::decode_payload(record_type, payload)?;
        self.current_offset += total_len as u64;

        Ok(Some((start, record)))
    }
}

impl Iterator for WalRecordIterator<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::types::{PageNumber, TransactionId};
    use crate::wal::{WalManager, WalRecord};
    use sealdb_storage::{InMemoryBackend, StorageBackend};

    fn wal_with(records: &[WalRecord]) -> (WalManager, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let wal = WalManager::new(Box::new(backend.handle()), false);
        for record in records {
            wal.append(record).unwrap();
        }
        (wal, backend)
    }

    fn page(txid: u64, page: u64) -> WalRecord {
        WalRecord::Page {
            txid: TransactionId::new(txid),
            page: PageNumber::new(page),
            block: vec![page as u8; 64],
        }
    }

    #[test]
    fn empty_wal_yields_nothing() {
        let (wal, _) = wal_with(&[]);
        assert_eq!(wal.iter().unwrap().count(), 0);
    }

    #[test]
    fn records_come_back_in_order() {
        let records = vec![
            WalRecord::Begin {
                txid: TransactionId::new(1),
            },
            page(1, 2),
            page(1, 3),
            WalRecord::Commit {
                txid: TransactionId::new(1),
                page_records: 2,
            },
        ];
        let (wal, _) = wal_with(&records);

        let read: Vec<_> = wal.iter().unwrap().map(|r| r.unwrap().1).collect();
        assert_eq!(read, records);
    }

    #[test]
    fn truncated_tail_is_clean_end() {
        let (wal, backend) = wal_with(&[
            WalRecord::Begin {
                txid: TransactionId::new(1),
            },
            page(1, 2),
        ]);

        let size = backend.size().unwrap();
        wal.truncate(size - 10).unwrap();

        let read: Vec<_> = wal.iter().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(read.len(), 1);
    }

    #[test]
    fn flipped_payload_bit_is_checksum_error() {
        let (wal, backend) = wal_with(&[page(1, 2)]);
        backend.corrupt_byte(40);

        let results: Vec<_> = wal.iter().unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(CoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn bad_magic_is_fatal() {
        let (wal, backend) = wal_with(&[page(1, 2)]);
        backend.corrupt_byte(0);

        let results: Vec<_> = wal.iter().unwrap().collect();
        assert!(matches!(results[0], Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn unknown_type_is_fatal() {
        let (wal, backend) = wal_with(&[page(1, 2)]);
        // type byte sits after magic and version
        backend.corrupt_byte(6);

        let results: Vec<_> = wal.iter().unwrap().collect();
        assert!(matches!(results[0], Err(CoreError::WalCorruption { .. })));
    }
}
