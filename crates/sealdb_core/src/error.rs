//! Error types for SealDB core.

use crate::types::PageNumber;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SealDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] sealdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Object or metadata (de)serialization failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The supplied key does not have the required length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// The metadata page failed authentication: wrong key, or the file is
    /// not a SealDB file.
    #[error("wrong encryption key: the metadata page could not be authenticated")]
    KeyMismatch,

    /// A key was supplied for a plaintext file, or omitted for an encrypted one.
    #[error("key mode mismatch: file is {}, but {}", mode_name(.file_encrypted), key_name(.key_supplied))]
    KeyModeMismatch {
        /// Whether the file was created with encryption.
        file_encrypted: bool,
        /// Whether the caller supplied a key.
        key_supplied: bool,
    },

    /// A sealed frame failed tag verification.
    #[error("authentication failed for page {page}")]
    AuthenticationFailed {
        /// The page whose frame failed.
        page: PageNumber,
    },

    /// A page other than the metadata page failed verification after the
    /// key was already accepted.
    #[error("page {page} is corrupt: {message}")]
    CorruptPage {
        /// The corrupt page.
        page: PageNumber,
        /// Description of the corruption.
        message: String,
    },

    /// `begin` was called while another transaction is active on this handle.
    #[error("a transaction is already in progress")]
    TransactionInProgress,

    /// A write was attempted through a read-only handle.
    #[error("database is open read-only")]
    ReadOnly,

    /// Another handle holds a conflicting lock on the file.
    #[error("database locked: another handle has conflicting access")]
    DatabaseLocked,

    /// The file does not exist and creation was not requested.
    #[error("database not found: {path}")]
    DatabaseNotFound {
        /// The missing path.
        path: String,
    },

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A page number beyond the end of the file was requested.
    #[error("page {page} out of range (page count {page_count})")]
    PageOutOfRange {
        /// The requested page.
        page: PageNumber,
        /// Current number of pages.
        page_count: u64,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

fn mode_name(encrypted: &bool) -> &'static str {
    if *encrypted {
        "encrypted"
    } else {
        "not encrypted"
    }
}

fn key_name(supplied: &bool) -> &'static str {
    if *supplied {
        "a key was supplied"
    } else {
        "no key was supplied"
    }
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid key length error.
    pub fn invalid_key_length(actual: usize, expected: usize) -> Self {
        Self::InvalidKeyLength { expected, actual }
    }

    /// Creates a corrupt page error.
    pub fn corrupt_page(page: PageNumber, message: impl Into<String>) -> Self {
        Self::CorruptPage {
            page,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by a wrong, missing or unexpected key.
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::KeyMismatch | Self::KeyModeMismatch { .. })
    }
}
