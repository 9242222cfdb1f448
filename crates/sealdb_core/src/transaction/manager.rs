//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::pager::EncryptedFile;
use crate::transaction::state::{TransactionState, WriteTransaction};
use crate::types::{PageNumber, TransactionId};
use crate::wal::{RecoveredLog, WalManager, WalRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Owns the commit protocol for one open file.
///
/// ## Commit Protocol
///
/// 1. Seal every dirty page and the new metadata page
/// 2. Append `Begin`, one `Page` per block, and `Commit` to the WAL in one
///    write, then sync: **the commit point**
/// 3. Write the blocks in place and sync the main file
/// 4. Truncate the WAL
///
/// A failure before step 2 completes leaves the file untouched. A failure
/// in step 3 poisons the manager: the transaction is durable, but no new
/// transaction may start until the database is reopened and recovery
/// finishes the apply.
///
/// ## Single-Writer Guarantee
///
/// `begin_write()` try-locks the write slot and fails immediately with
/// [`CoreError::TransactionInProgress`] if another transaction holds it.
pub struct TransactionManager {
    file: EncryptedFile,
    wal: WalManager,
    write_lock: Mutex<()>,
    poisoned: AtomicBool,
}

impl TransactionManager {
    /// Creates a transaction manager over an opened file and its log.
    pub fn new(file: EncryptedFile, wal: WalManager) -> Self {
        Self {
            file,
            wal,
            write_lock: Mutex::new(()),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Returns the managed file.
    #[must_use]
    pub fn file(&self) -> &EncryptedFile {
        &self.file
    }

    /// Returns the write-ahead log.
    #[must_use]
    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    /// Returns true once a durable commit failed to apply.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    fn poison(&self, reason: &str) {
        warn!(reason, "database handle poisoned, reopen to recover");
        self.poisoned.store(true, Ordering::SeqCst);
    }

    /// Replays committed transactions found in the log.
    ///
    /// Writable handles write the newest block of every logged page and
    /// truncate the log. Read-only handles serve those blocks from memory
    /// and leave the log alone. Incomplete transactions are dropped.
    ///
    /// Returns the number of transactions replayed.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the blocks or truncating the log fails.
    pub fn recover(&self, log: RecoveredLog) -> CoreResult<usize> {
        let replayed = log.committed.len();

        if self.file.is_read_only() {
            if replayed > 0 {
                let blocks = Self::owned_blocks(&log);
                info!(
                    transactions = replayed,
                    pages = blocks.len(),
                    "serving committed WAL transactions from memory"
                );
                self.file.install_overlay(blocks);
            }
            return Ok(replayed);
        }

        if replayed > 0 {
            let blocks = Self::owned_blocks(&log);
            info!(
                transactions = replayed,
                pages = blocks.len(),
                discarded = log.discarded.len(),
                "replaying committed WAL transactions"
            );
            self.file.apply(blocks, self.file.metadata())?;
        }
        if !self.wal.is_empty()? {
            self.wal.clear()?;
        }
        Ok(replayed)
    }

    fn owned_blocks(log: &RecoveredLog) -> Vec<(PageNumber, Vec<u8>)> {
        log.latest_blocks()
            .into_iter()
            .map(|(page, block)| (page, block.to_vec()))
            .collect()
    }

    /// Begins a write transaction.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ReadOnly`] on a read-only handle
    /// - [`CoreError::InvalidOperation`] after a failed apply poisoned the
    ///   handle
    /// - [`CoreError::TransactionInProgress`] if a transaction is active
    pub fn begin_write(&self) -> CoreResult<WriteTransaction<'_>> {
        if self.file.is_read_only() {
            return Err(CoreError::ReadOnly);
        }
        if self.is_poisoned() {
            return Err(CoreError::invalid_operation(
                "a committed transaction could not be applied; reopen the database",
            ));
        }
        let guard = self
            .write_lock
            .try_lock()
            .ok_or(CoreError::TransactionInProgress)?;

        let txid = self.file.metadata().last_txid.next();
        debug!(%txid, "began write transaction");
        Ok(WriteTransaction::new(txid, &self.file, guard))
    }

    /// Returns true if a write transaction currently holds the write slot.
    #[must_use]
    pub fn has_active_transaction(&self) -> bool {
        self.write_lock.is_locked()
    }

    /// Commits a write transaction.
    ///
    /// Returns once the transaction is durable and applied. A transaction
    /// with no changes commits without touching the disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active or belongs to
    /// another handle, or if sealing, logging or applying fails. The
    /// transaction ends [`Committed`](TransactionState::Committed) if the
    /// commit record was synced, even when the apply then failed, and
    /// [`Aborted`](TransactionState::Aborted) otherwise.
    pub fn commit(&self, txn: &mut WriteTransaction<'_>) -> CoreResult<TransactionId> {
        txn.ensure_active()?;
        if !std::ptr::eq(txn.file(), &self.file) {
            return Err(CoreError::invalid_operation(
                "transaction belongs to a different database handle",
            ));
        }

        let txid = txn.id();
        txn.set_state(TransactionState::Committing);

        if !txn.has_changes() {
            txn.set_state(TransactionState::Committed);
            debug!(%txid, "committed empty transaction");
            return Ok(txid);
        }

        let records = match self.seal(txn) {
            Ok(records) => records,
            Err(e) => {
                txn.set_state(TransactionState::Aborted);
                return Err(e);
            }
        };

        if let Err(e) = self.log(&records) {
            txn.set_state(TransactionState::Aborted);
            return Err(e);
        }
        txn.set_state(TransactionState::Committed);

        let blocks: Vec<(PageNumber, Vec<u8>)> = records
            .into_iter()
            .filter_map(|record| match record {
                WalRecord::Page { page, block, .. } => Some((page, block)),
                _ => None,
            })
            .collect();
        let pages = blocks.len();

        if let Err(e) = self.file.apply(blocks, txn.metadata().clone()) {
            self.poison("applying committed pages failed");
            return Err(e);
        }

        if let Err(e) = self.wal.clear() {
            // the log still holds only committed transactions, so the next
            // commit appends after them and recovery replays all of them
            warn!(%txid, error = %e, "WAL checkpoint failed");
        }

        debug!(%txid, pages, "committed transaction");
        Ok(txid)
    }

    fn seal(&self, txn: &mut WriteTransaction<'_>) -> CoreResult<Vec<WalRecord>> {
        let txid = txn.id();
        txn.metadata_mut().last_txid = txid;
        let dirty = txn.take_dirty();

        let mut records = Vec::with_capacity(dirty.len() + 3);
        records.push(WalRecord::Begin { txid });
        records.push(WalRecord::Page {
            txid,
            page: PageNumber::META,
            block: self.file.seal_metadata(txn.metadata())?,
        });
        for (page, payload) in dirty {
            records.push(WalRecord::Page {
                txid,
                page,
                block: self.file.seal_page(page, &payload)?,
            });
        }

        let page_records = u32::try_from(records.len() - 1)
            .map_err(|_| CoreError::invalid_operation("too many pages in one transaction"))?;
        records.push(WalRecord::Commit { txid, page_records });
        Ok(records)
    }

    fn log(&self, records: &[WalRecord]) -> CoreResult<()> {
        let start = self.wal.size()?;
        let result = self
            .wal
            .append_batch(records)
            .and_then(|_| self.wal.sync());

        if result.is_err() {
            if let Err(undo) = self.wal.truncate(start) {
                warn!(error = %undo, "could not remove partial WAL batch");
                self.poison("partial WAL batch left behind");
            }
        }
        result
    }

    /// Aborts a write transaction, discarding its buffered pages.
    ///
    /// Nothing was written before commit, so the file is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active.
    pub fn abort(&self, txn: &mut WriteTransaction<'_>) -> CoreResult<()> {
        txn.ensure_active()?;
        txn.set_state(TransactionState::Aborting);
        let discarded = txn.take_dirty().len();
        txn.set_state(TransactionState::Aborted);
        debug!(txid = %txn.id(), pages = discarded, "aborted transaction");
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("file", &self.file)
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}
