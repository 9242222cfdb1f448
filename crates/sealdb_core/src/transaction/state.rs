//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::pager::{ClassChain, EncryptedFile, Metadata, PageSource, PAGE_PAYLOAD_SIZE};
use crate::types::{PageNumber, TransactionId};
use parking_lot::MutexGuard;
use std::collections::BTreeMap;
use tracing::debug;

/// State of a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting reads and writes.
    Active,
    /// Sealing and logging; no further writes.
    Committing,
    /// Durable in the log.
    Committed,
    /// Being discarded.
    Aborting,
    /// Discarded; nothing reached the file.
    Aborted,
}

/// A write transaction.
///
/// Holds the handle's single write slot for its lifetime. Page writes are
/// buffered as plaintext and only sealed when committed through
/// [`TransactionManager::commit`](super::TransactionManager::commit).
/// Dropping an active transaction aborts it.
pub struct WriteTransaction<'db> {
    id: TransactionId,
    state: TransactionState,
    file: &'db EncryptedFile,
    meta: Metadata,
    dirty: BTreeMap<PageNumber, Vec<u8>>,
    _guard: MutexGuard<'db, ()>,
}

impl<'db> WriteTransaction<'db> {
    pub(crate) fn new(
        id: TransactionId,
        file: &'db EncryptedFile,
        guard: MutexGuard<'db, ()>,
    ) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            meta: file.metadata(),
            file,
            dirty: BTreeMap::new(),
            _guard: guard,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction still accepts operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the page count including pages allocated by this transaction.
    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.meta.page_count
    }

    /// Returns the number of buffered pages.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Reads a data page as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is finished, the page is out of
    /// range, or the committed block is corrupt.
    pub fn read_page(&self, page: PageNumber) -> CoreResult<Vec<u8>> {
        self.ensure_active()?;
        if let Some(payload) = self.dirty.get(&page) {
            return Ok(payload.clone());
        }
        if page.as_u64() >= self.meta.page_count {
            return Err(CoreError::PageOutOfRange {
                page,
                page_count: self.meta.page_count,
            });
        }
        self.file.read_page(page)
    }

    /// Buffers new contents for an allocated data page.
    ///
    /// `data` is zero-padded to a full page.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is finished, the page is page 0
    /// or not yet allocated, or `data` exceeds [`PAGE_PAYLOAD_SIZE`].
    pub fn write_page(&mut self, page: PageNumber, data: &[u8]) -> CoreResult<()> {
        self.ensure_active()?;
        if page.is_meta() {
            return Err(CoreError::invalid_operation(
                "page 0 is managed by the engine",
            ));
        }
        if page.as_u64() >= self.meta.page_count {
            return Err(CoreError::PageOutOfRange {
                page,
                page_count: self.meta.page_count,
            });
        }
        if data.len() > PAGE_PAYLOAD_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "page data is {} bytes, maximum is {PAGE_PAYLOAD_SIZE}",
                data.len()
            )));
        }

        let mut payload = data.to_vec();
        payload.resize(PAGE_PAYLOAD_SIZE, 0);
        self.dirty.insert(page, payload);
        Ok(())
    }

    /// Allocates a zeroed data page, reusing the free list before growing
    /// the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is finished or the free list is
    /// corrupt.
    pub fn allocate_page(&mut self) -> CoreResult<PageNumber> {
        self.ensure_active()?;

        let page = match self.meta.freelist_head() {
            Some(head) => {
                let content = self.read_page(head)?;
                let mut next = [0u8; 8];
                next.copy_from_slice(&content[..8]);
                let next = u64::from_le_bytes(next);
                if next >= self.meta.page_count || next == head.as_u64() {
                    return Err(CoreError::corrupt_page(head, "free list link out of range"));
                }
                self.meta.freelist_head = next;
                head
            }
            None => {
                let page = PageNumber::new(self.meta.page_count);
                self.meta.page_count += 1;
                page
            }
        };

        self.dirty.insert(page, vec![0u8; PAGE_PAYLOAD_SIZE]);
        debug!(txid = self.id.as_u64(), page = page.as_u64(), "allocated page");
        Ok(page)
    }

    /// Pushes a page onto the free list.
    pub(crate) fn free_page(&mut self, page: PageNumber) -> CoreResult<()> {
        self.ensure_active()?;
        let mut payload = vec![0u8; PAGE_PAYLOAD_SIZE];
        payload[..8].copy_from_slice(&self.meta.freelist_head.to_le_bytes());
        self.dirty.insert(page, payload);
        self.meta.freelist_head = page.as_u64();
        Ok(())
    }

    pub(crate) fn metadata(&self) -> &Metadata {
        &self.meta
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }

    pub(crate) fn file(&self) -> &'db EncryptedFile {
        self.file
    }

    /// Returns true if committing would change the file.
    pub(crate) fn has_changes(&self) -> bool {
        !self.dirty.is_empty() || self.meta != self.file.metadata()
    }

    pub(crate) fn take_dirty(&mut self) -> BTreeMap<PageNumber, Vec<u8>> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committing | TransactionState::Committed => Err(
                CoreError::invalid_operation("transaction already committed"),
            ),
            TransactionState::Aborting | TransactionState::Aborted => {
                Err(CoreError::invalid_operation("transaction already aborted"))
            }
        }
    }
}

impl PageSource for WriteTransaction<'_> {
    fn read_page(&self, page: PageNumber) -> CoreResult<Vec<u8>> {
        WriteTransaction::read_page(self, page)
    }

    fn class_chain(&self, class: &str) -> Option<ClassChain> {
        self.meta.classes.get(class).copied()
    }

    fn classes(&self) -> Vec<(String, ClassChain)> {
        self.meta
            .classes
            .iter()
            .map(|(name, chain)| (name.clone(), *chain))
            .collect()
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::Aborting;
            debug!(
                txid = self.id.as_u64(),
                pages = self.dirty.len(),
                "transaction dropped without commit, discarding"
            );
            self.dirty.clear();
            self.state = TransactionState::Aborted;
        }
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("dirty_pages", &self.dirty.len())
            .finish_non_exhaustive()
    }
}
