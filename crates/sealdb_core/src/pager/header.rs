//! Plaintext preamble at the start of the metadata page.
//!
//! The preamble is the only plaintext on disk. It carries what is needed to
//! derive the page key and pick a key mode before anything is decrypted.
//!
//! ```text
//! | magic (8) | format (2) | mode (1) | reserved (1) | page size (4) |
//! | file id (16) | reserved (28) | crc32 (4) |
//! ```

use crate::crypto::{KeyMode, FILE_ID_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::pager::PAGE_SIZE;
use crate::wal::compute_crc32;
use uuid::Uuid;

/// Size of the preamble in bytes.
pub const PREAMBLE_SIZE: usize = 64;

/// Magic bytes at offset 0 of every SealDB file.
pub const FILE_MAGIC: [u8; 8] = *b"SEALDB\0\x01";

/// Newest on-disk format this build understands.
pub const FORMAT_VERSION: u16 = 1;

const MODE_PLAINTEXT: u8 = 0;
const MODE_AES_256_GCM: u8 = 1;
const CRC_OFFSET: usize = PREAMBLE_SIZE - 4;

/// Decoded preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    /// On-disk format version.
    pub format_version: u16,
    /// Key mode fixed at creation.
    pub key_mode: KeyMode,
    /// Physical page size.
    pub page_size: u32,
    /// Random per-file id; HKDF salt and part of every page's AAD.
    pub file_id: [u8; FILE_ID_SIZE],
}

impl Preamble {
    /// Creates a preamble for a new file with a fresh random id.
    #[must_use]
    pub fn new(format_version: u16, key_mode: KeyMode) -> Self {
        Self {
            format_version,
            key_mode,
            page_size: PAGE_SIZE as u32,
            file_id: *Uuid::new_v4().as_bytes(),
        }
    }

    /// Encodes the preamble.
    #[must_use]
    pub fn encode(&self) -> [u8; PREAMBLE_SIZE] {
        let mut buf = [0u8; PREAMBLE_SIZE];
        buf[0..8].copy_from_slice(&FILE_MAGIC);
        buf[8..10].copy_from_slice(&self.format_version.to_le_bytes());
        buf[10] = match self.key_mode {
            KeyMode::Plaintext => MODE_PLAINTEXT,
            KeyMode::Encrypted => MODE_AES_256_GCM,
        };
        buf[12..16].copy_from_slice(&self.page_size.to_le_bytes());
        buf[16..32].copy_from_slice(&self.file_id);

        let crc = compute_crc32(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and validates a preamble.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidFormat`] for a short buffer, wrong magic, an
    ///   unsupported version, an unknown key mode or a foreign page size
    /// - [`CoreError::ChecksumMismatch`] if the CRC does not match
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < PREAMBLE_SIZE {
            return Err(CoreError::invalid_format("file too small for preamble"));
        }
        if bytes[0..8] != FILE_MAGIC {
            return Err(CoreError::invalid_format("not a SealDB file"));
        }

        let stored = u32::from_le_bytes([
            bytes[CRC_OFFSET],
            bytes[CRC_OFFSET + 1],
            bytes[CRC_OFFSET + 2],
            bytes[CRC_OFFSET + 3],
        ]);
        let computed = compute_crc32(&bytes[..CRC_OFFSET]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let format_version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if format_version == 0 || format_version > FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported format version {format_version}"
            )));
        }

        let key_mode = match bytes[10] {
            MODE_PLAINTEXT => KeyMode::Plaintext,
            MODE_AES_256_GCM => KeyMode::Encrypted,
            other => {
                return Err(CoreError::invalid_format(format!(
                    "unknown key mode {other}"
                )))
            }
        };

        let page_size = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        if page_size as usize != PAGE_SIZE {
            return Err(CoreError::invalid_format(format!(
                "page size {page_size} not supported (expected {PAGE_SIZE})"
            )));
        }

        let mut file_id = [0u8; FILE_ID_SIZE];
        file_id.copy_from_slice(&bytes[16..32]);

        Ok(Self {
            format_version,
            key_mode,
            page_size,
            file_id,
        })
    }
}
