//! WAL record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{PageNumber, TransactionId};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"SWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Start of a transaction's log entries.
    Begin = 1,
    /// A sealed page image.
    Page = 2,
    /// Commit marker.
    Commit = 3,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Page),
            3 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A WAL record.
///
/// Page records carry the exact physical block that will be written to the
/// main file, already sealed, so replay never needs the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Start of a transaction.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
    },

    /// New on-disk image of one page.
    Page {
        /// Transaction ID.
        txid: TransactionId,
        /// Target page.
        page: PageNumber,
        /// Sealed physical block.
        block: Vec<u8>,
    },

    /// Commit marker. The transaction is durable once this record is synced.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Number of page records logged for the transaction.
        page_records: u32,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Page { .. } => WalRecordType::Page,
            Self::Commit { .. } => WalRecordType::Commit,
        }
    }

    /// Returns the transaction this record belongs to.
    #[must_use]
    pub fn txid(&self) -> TransactionId {
        match self {
            Self::Begin { txid } | Self::Page { txid, .. } | Self::Commit { txid, .. } => *txid,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if a page block is larger than a `u32` length allows.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Begin { txid } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
            }

            Self::Page { txid, page, block } => {
                let len = u32::try_from(block.len())
                    .map_err(|_| CoreError::invalid_operation("page block too large for WAL"))?;
                buf.reserve(20 + block.len());
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&page.as_u64().to_le_bytes());
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(block);
            }

            Self::Commit { txid, page_records } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&page_records.to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WalCorruption`] on short or trailing bytes.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut cursor = 0;

        let read_u64 = |cursor: &mut usize| -> CoreResult<u64> {
            let bytes: [u8; 8] = payload
                .get(*cursor..*cursor + 8)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))?;
            *cursor += 8;
            Ok(u64::from_le_bytes(bytes))
        };

        let read_u32 = |cursor: &mut usize| -> CoreResult<u32> {
            let bytes: [u8; 4] = payload
                .get(*cursor..*cursor + 4)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))?;
            *cursor += 4;
            Ok(u32::from_le_bytes(bytes))
        };

        let record = match record_type {
            WalRecordType::Begin => Self::Begin {
                txid: TransactionId::new(read_u64(&mut cursor)?),
            },

            WalRecordType::Page => {
                let txid = TransactionId::new(read_u64(&mut cursor)?);
                let page = PageNumber::new(read_u64(&mut cursor)?);
                let len = read_u32(&mut cursor)? as usize;
                let block = payload
                    .get(cursor..cursor + len)
                    .ok_or_else(|| CoreError::wal_corruption("unexpected end of page block"))?
                    .to_vec();
                cursor += len;
                Self::Page { txid, page, block }
            }

            WalRecordType::Commit => Self::Commit {
                txid: TransactionId::new(read_u64(&mut cursor)?),
                page_records: read_u32(&mut cursor)?,
            },
        };

        if cursor != payload.len() {
            return Err(CoreError::wal_corruption(format!(
                "trailing bytes in {record_type:?} record: expected {cursor} bytes, got {}",
                payload.len()
            )));
        }

        Ok(record)
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_from_byte() {
        for t in [
            WalRecordType::Begin,
            WalRecordType::Page,
            WalRecordType::Commit,
        ] {
            assert_eq!(WalRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(WalRecordType::from_byte(0), None);
        assert_eq!(WalRecordType::from_byte(4), None);
    }

    #[test]
    fn page_record_decodes() {
        let record = WalRecord::Page {
            txid: TransactionId::new(3),
            page: PageNumber::new(17),
            block: vec![0xCA, 0xFE, 0xBA, 0xBE],
        };
        let payload = record.encode_payload().unwrap();
        assert_eq!(payload.len(), 8 + 8 + 4 + 4);
        let decoded = WalRecord::decode_payload(WalRecordType::Page, &payload).unwrap();
        assert_eq!(record, decoded);
        assert_eq!(decoded.txid(), TransactionId::new(3));
    }

    #[test]
    fn commit_record_decodes() {
        let record = WalRecord::Commit {
            txid: TransactionId::new(7),
            page_records: 12,
        };
        let payload = record.encode_payload().unwrap();
        let decoded = WalRecord::decode_payload(WalRecordType::Commit, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut payload = WalRecord::Begin {
            txid: TransactionId::new(1),
        }
        .encode_payload()
        .unwrap();
        payload.push(0);
        assert!(matches!(
            WalRecord::decode_payload(WalRecordType::Begin, &payload),
            Err(CoreError::WalCorruption { .. })
        ));
    }

    #[test]
    fn short_page_block_rejected() {
        let mut payload = WalRecord::Page {
            txid: TransactionId::new(1),
            page: PageNumber::new(1),
            block: vec![1, 2, 3, 4],
        }
        .encode_payload()
        .unwrap();
        payload.truncate(payload.len() - 2);
        assert!(WalRecord::decode_payload(WalRecordType::Page, &payload).is_err());
    }

    #[test]
    fn crc32_known_value() {
        // "123456789" is the standard check input
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty() {
        assert_eq!(compute_crc32(b""), 0);
    }
}
