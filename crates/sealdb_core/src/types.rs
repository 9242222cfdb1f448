//! Core type definitions for SealDB.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a write transaction.
///
/// Transaction IDs are monotonically increasing and never reused within a
/// file; the last committed ID is persisted in the metadata page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Logical page number within the main file.
///
/// Page `n` occupies bytes `n * PAGE_SIZE .. (n + 1) * PAGE_SIZE`.
/// Page 0 is always the metadata page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageNumber(pub u64);

impl PageNumber {
    /// The metadata page.
    pub const META: Self = Self(0);

    /// Creates a new page number.
    #[must_use]
    pub const fn new(page: u64) -> Self {
        Self(page)
    }

    /// Returns the raw page number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the metadata page.
    #[must_use]
    pub const fn is_meta(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}
