//! Sealed file metadata stored in page 0.

use crate::error::{CoreError, CoreResult};
use crate::pager::header::Preamble;
use crate::pager::{META_PAYLOAD_SIZE, PAGE_SIZE, VERIFY_MARKER};
use crate::types::{PageNumber, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location and size of one object class's page chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassChain {
    /// First page of the chain (0 when empty).
    pub first: u64,
    /// Last page of the chain, where new records are appended.
    pub last: u64,
    /// Bytes used in the last page's data area.
    pub tail_used: u32,
    /// Number of records in the chain.
    pub count: u64,
    /// Identifies this incarnation of the chain. A class that is cleared
    /// and refilled gets a new generation.
    #[serde(default)]
    pub generation: u64,
}

impl ClassChain {
    /// Returns true if the chain holds no pages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first == 0
    }
}

/// Metadata held in the sealed part of page 0.
///
/// The leading [`VERIFY_MARKER`] proves the key was right; the rest is this
/// struct encoded as CBOR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// On-disk format version, mirrors the preamble.
    pub format_version: u16,
    /// Key mode, mirrors the preamble.
    pub encrypted: bool,
    /// Page size, mirrors the preamble.
    pub page_size: u32,
    /// Number of pages in the file, including page 0.
    pub page_count: u64,
    /// First page of the free list (0 when empty).
    pub freelist_head: u64,
    /// Last committed transaction.
    pub last_txid: TransactionId,
    /// Object classes by name.
    pub classes: BTreeMap<String, ClassChain>,
    /// Last chain generation handed out.
    #[serde(default)]
    pub last_generation: u64,
}

impl Metadata {
    /// Creates metadata for a fresh file holding only page 0.
    #[must_use]
    pub fn new(preamble: &Preamble) -> Self {
        Self {
            format_version: preamble.format_version,
            encrypted: preamble.key_mode.is_encrypted(),
            page_size: preamble.page_size,
            page_count: 1,
            freelist_head: 0,
            last_txid: TransactionId::new(0),
            classes: BTreeMap::new(),
            last_generation: 0,
        }
    }

    /// Hands out a chain generation never used before in this file.
    pub fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    /// Returns the free-list head, if any.
    #[must_use]
    pub fn freelist_head(&self) -> Option<PageNumber> {
        (self.freelist_head != 0).then_some(PageNumber::new(self.freelist_head))
    }

    /// Encodes the sealed payload: marker, length, CBOR, zero padding.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the class catalog no
    /// longer fits in page 0.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut cbor = Vec::new();
        ciborium::into_writer(self, &mut cbor).map_err(|e| CoreError::codec(e.to_string()))?;

        let header = VERIFY_MARKER.len() + 4;
        if header + cbor.len() > META_PAYLOAD_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "metadata is {} bytes, page 0 holds at most {}",
                cbor.len(),
                META_PAYLOAD_SIZE - header
            )));
        }

        let mut payload = Vec::with_capacity(META_PAYLOAD_SIZE);
        payload.extend_from_slice(&VERIFY_MARKER);
        payload.extend_from_slice(&(cbor.len() as u32).to_le_bytes());
        payload.extend_from_slice(&cbor);
        payload.resize(META_PAYLOAD_SIZE, 0);
        Ok(payload)
    }

    /// Decodes the sealed payload of page 0.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the marker is missing or the
    /// encoded length is out of bounds, and [`CoreError::Codec`] if the
    /// CBOR does not decode.
    pub fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        let marker_len = VERIFY_MARKER.len();
        if payload.len() < marker_len + 4 || payload[..marker_len] != VERIFY_MARKER {
            return Err(CoreError::invalid_format("verification marker missing"));
        }

        let len = u32::from_le_bytes([
            payload[marker_len],
            payload[marker_len + 1],
            payload[marker_len + 2],
            payload[marker_len + 3],
        ]) as usize;
        let body = payload
            .get(marker_len + 4..marker_len + 4 + len)
            .ok_or_else(|| CoreError::invalid_format("metadata length out of bounds"))?;

        ciborium::from_reader(body).map_err(|e| CoreError::codec(e.to_string()))
    }

    /// Checks that the sealed metadata agrees with the plaintext preamble.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] on any disagreement.
    pub fn check_against(&self, preamble: &Preamble) -> CoreResult<()> {
        if self.format_version != preamble.format_version
            || self.encrypted != preamble.key_mode.is_encrypted()
            || self.page_size != preamble.page_size
        {
            return Err(CoreError::invalid_format(
                "sealed metadata disagrees with file preamble",
            ));
        }
        if self.page_size as usize != PAGE_SIZE || self.page_count == 0 {
            return Err(CoreError::invalid_format("metadata page geometry invalid"));
        }
        if self.freelist_head >= self.page_count {
            return Err(CoreError::invalid_format("free list head beyond end of file"));
        }
        Ok(())
    }
}
