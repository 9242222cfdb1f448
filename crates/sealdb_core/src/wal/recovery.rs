//! Grouping of WAL records into committed transactions.

use crate::error::{CoreError, CoreResult};
use crate::types::{PageNumber, TransactionId};
use crate::wal::record::WalRecord;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// The page images of one committed transaction, in log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    /// Transaction ID.
    pub txid: TransactionId,
    /// Sealed physical blocks to write.
    pub pages: Vec<(PageNumber, Vec<u8>)>,
}

/// Result of scanning the WAL on open.
#[derive(Debug, Default)]
pub struct RecoveredLog {
    /// Committed transactions in commit order.
    pub committed: Vec<CommittedTransaction>,
    /// Transactions that began but never committed.
    pub discarded: Vec<TransactionId>,
}

impl RecoveredLog {
    /// Groups records into committed and incomplete transactions.
    ///
    /// A transaction counts as committed only if its commit record was read
    /// and its page-record count matches what was logged.
    ///
    /// # Errors
    ///
    /// Propagates iterator errors, and returns [`CoreError::WalCorruption`]
    /// for records that reference a transaction that never began, a
    /// duplicate begin, or a commit whose page count disagrees.
    pub fn scan<I>(records: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = CoreResult<(u64, WalRecord)>>,
    {
        let mut pending: HashMap<TransactionId, Vec<(PageNumber, Vec<u8>)>> = HashMap::new();
        let mut order: Vec<TransactionId> = Vec::new();
        let mut log = Self::default();

        for result in records {
            let (offset, record) = result?;
            match record {
                WalRecord::Begin { txid } => {
                    if pending.insert(txid, Vec::new()).is_some() {
                        return Err(CoreError::wal_corruption(format!(
                            "duplicate begin for {txid} at offset {offset}"
                        )));
                    }
                    order.push(txid);
                }
                WalRecord::Page { txid, page, block } => {
                    pending
                        .get_mut(&txid)
                        .ok_or_else(|| {
                            CoreError::wal_corruption(format!(
                                "page record for unknown {txid} at offset {offset}"
                            ))
                        })?
                        .push((page, block));
                }
                WalRecord::Commit { txid, page_records } => {
                    let pages = pending.remove(&txid).ok_or_else(|| {
                        CoreError::wal_corruption(format!(
                            "commit for unknown {txid} at offset {offset}"
                        ))
                    })?;
                    if pages.len() != page_records as usize {
                        return Err(CoreError::wal_corruption(format!(
                            "commit for {txid} expects {page_records} pages, log has {}",
                            pages.len()
                        )));
                    }
                    order.retain(|t| *t != txid);
                    log.committed.push(CommittedTransaction { txid, pages });
                }
            }
        }

        for txid in order {
            warn!(%txid, "discarding incomplete transaction from WAL");
            log.discarded.push(txid);
        }

        Ok(log)
    }

    /// Returns true if there is nothing to replay.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Returns the highest committed transaction ID, if any.
    #[must_use]
    pub fn last_txid(&self) -> Option<TransactionId> {
        self.committed.iter().map(|t| t.txid).max()
    }

    /// Returns the newest block per page across all committed transactions.
    #[must_use]
    pub fn latest_blocks(&self) -> BTreeMap<PageNumber, &[u8]> {
        let mut latest = BTreeMap::new();
        for txn in &self.committed {
            for (page, block) in &txn.pages {
                latest.insert(*page, block.as_slice());
            }
        }
        latest
    }

    /// Returns the newest committed image of the metadata page.
    #[must_use]
    pub fn latest_meta_block(&self) -> Option<&[u8]> {
        self.committed.iter().rev().find_map(|txn| {
            txn.pages
                .iter()
                .rev()
                .find(|(page, _)| page.is_meta())
                .map(|(_, block)| block.as_slice())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn page(t: u64, p: u64, fill: u8) -> WalRecord {
        WalRecord::Page {
            txid: txid(t),
            page: PageNumber::new(p),
            block: vec![fill; 8],
        }
    }

    fn scan(records: Vec<WalRecord>) -> CoreResult<RecoveredLog> {
        RecoveredLog::scan(
            records
                .into_iter()
                .enumerate()
                .map(|(i, r)| Ok((i as u64, r))),
        )
    }

    #[test]
    fn committed_and_incomplete_are_separated() {
        let log = scan(vec![
            WalRecord::Begin { txid: txid(1) },
            page(1, 1, 0xA),
            WalRecord::Commit {
                txid: txid(1),
                page_records: 1,
            },
            WalRecord::Begin { txid: txid(2) },
            page(2, 1, 0xB),
        ])
        .unwrap();

        assert_eq!(log.committed.len(), 1);
        assert_eq!(log.committed[0].txid, txid(1));
        assert_eq!(log.discarded, vec![txid(2)]);
        assert_eq!(log.last_txid(), Some(txid(1)));
    }

    #[test]
    fn later_commit_wins_per_page() {
        let log = scan(vec![
            WalRecord::Begin { txid: txid(1) },
            page(1, 0, 1),
            page(1, 3, 1),
            WalRecord::Commit {
                txid: txid(1),
                page_records: 2,
            },
            WalRecord::Begin { txid: txid(2) },
            page(2, 0, 2),
            WalRecord::Commit {
                txid: txid(2),
                page_records: 1,
            },
        ])
        .unwrap();

        let latest = log.latest_blocks();
        assert_eq!(latest[&PageNumber::new(0)], &[2u8; 8][..]);
        assert_eq!(latest[&PageNumber::new(3)], &[1u8; 8][..]);
        assert_eq!(log.latest_meta_block(), Some(&[2u8; 8][..]));
    }

    #[test]
    fn page_count_mismatch_is_corruption() {
        let result = scan(vec![
            WalRecord::Begin { txid: txid(1) },
            page(1, 1, 0),
            WalRecord::Commit {
                txid: txid(1),
                page_records: 2,
            },
        ]);
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn orphan_page_is_corruption() {
        let result = scan(vec![page(9, 1, 0)]);
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn empty_log() {
        let log = scan(Vec::new()).unwrap();
        assert!(log.is_empty());
        assert!(log.latest_meta_block().is_none());
    }
}
