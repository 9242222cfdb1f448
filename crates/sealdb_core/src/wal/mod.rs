//! Write-Ahead Log (WAL) for atomic commits and crash recovery.
//!
//! The WAL lives next to the main file at `<path>.wal`. A commit appends one
//! batch: a `Begin` record, one `Page` record per sealed block, and a
//! `Commit` record carrying the page count. Once that batch is synced the
//! transaction is durable; the blocks are then written in place and the log
//! is truncated.
//!
//! ## WAL Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! ### Tolerated (clean end of log)
//!
//! - Truncated header or payload at the tail: a crash mid-append. The torn
//!   transaction never reached its commit record and is discarded.
//!
//! ### Fatal (open fails)
//!
//! - CRC mismatch → `ChecksumMismatch`
//! - Invalid magic, unknown record type, newer version → `WalCorruption`
//! - Commit whose page count disagrees with the logged pages → `WalCorruption`
//!
//! ## Invariants
//!
//! - Only transactions with a complete commit record are replayed
//! - Replay writes whole sealed blocks, so it is idempotent
//! - The key is never needed to replay

mod iterator;
mod record;
mod recovery;
mod writer;

pub use iterator::WalRecordIterator;
pub use record::{compute_crc32, WalRecord, WalRecordType};
pub use recovery::{CommittedTransaction, RecoveredLog};
pub use writer::WalManager;
