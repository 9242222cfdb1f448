//! Typed object access over a page source.

use crate::error::{CoreError, CoreResult};
use crate::object::chain::{append_record, chain_pages, ChainReader};
use crate::object::codec::{decode_object, encode_object, Object};
use crate::pager::{ClassChain, PageSource};
use crate::transaction::WriteTransaction;
use std::marker::PhantomData;
use tracing::debug;

/// Read view of the objects stored in a [`PageSource`].
///
/// Over an [`EncryptedFile`](crate::pager::EncryptedFile) it sees the
/// committed state; over a [`WriteTransaction`] it also sees that
/// transaction's own additions.
pub struct ObjectStore<'a, S: PageSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: PageSource + ?Sized> ObjectStore<'a, S> {
    /// Creates a view over `source`.
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Returns every stored object of type `T`, in insertion order.
    ///
    /// The sequence is lazy: pages are read and decrypted as it advances.
    #[must_use]
    pub fn all_of<T: Object>(&self) -> Objects<'a, T, S> {
        Objects::new(self.source, self.source.class_chain(T::CLASS_NAME))
    }

    /// Returns the number of stored objects of type `T`.
    #[must_use]
    pub fn count<T: Object>(&self) -> u64 {
        self.source
            .class_chain(T::CLASS_NAME)
            .map_or(0, |chain| chain.count)
    }

    /// Returns the first stored object of type `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the page holding it is corrupt or it fails to
    /// decode.
    pub fn first<T: Object>(&self) -> CoreResult<Option<T>> {
        self.all_of::<T>().next().transpose()
    }

    /// Returns the class names in the catalog with their object counts.
    #[must_use]
    pub fn classes(&self) -> Vec<(String, u64)> {
        self.source
            .classes()
            .into_iter()
            .map(|(name, chain)| (name, chain.count))
            .collect()
    }
}

impl<S: PageSource + ?Sized> Clone for ObjectStore<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: PageSource + ?Sized> Copy for ObjectStore<'_, S> {}

/// Lazy sequence of the objects of one class.
///
/// The sequence is finite: it yields at most as many objects as the class
/// held when the sequence was created, even if more are committed while it
/// is being consumed. After the first error it yields nothing further.
/// [`Objects::rewind`] restarts it from the first object.
///
/// Appends don't disturb a sequence. Once a later commit clears the class,
/// its pages may hold other data, so the sequence fails with
/// [`CoreError::InvalidOperation`] instead of reading them.
pub struct Objects<'a, T, S: PageSource + ?Sized> {
    source: &'a S,
    chain: ClassChain,
    reader: ChainReader,
    remaining: u64,
    failed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Object, S: PageSource + ?Sized> Objects<'a, T, S> {
    fn new(source: &'a S, chain: Option<ClassChain>) -> Self {
        let chain = chain.unwrap_or_default();
        Self {
            source,
            chain,
            reader: ChainReader::new(chain),
            remaining: chain.count,
            failed: false,
            _marker: PhantomData,
        }
    }

    /// Returns the number of objects the sequence covers in total.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.chain.count
    }

    /// Restarts the sequence from the first object.
    pub fn rewind(&mut self) {
        self.reader = ChainReader::new(self.chain);
        self.remaining = self.chain.count;
        self.failed = false;
    }

    fn ensure_current(&self) -> CoreResult<()> {
        match self.source.class_chain(T::CLASS_NAME) {
            Some(current) if current.generation == self.chain.generation => Ok(()),
            _ => Err(CoreError::invalid_operation(
                "sequence invalidated by a later commit",
            )),
        }
    }
}

impl<T: Object, S: PageSource + ?Sized> Iterator for Objects<'_, T, S> {
    type Item = CoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }
        self.remaining -= 1;

        // checked again after reading: the pages may change underneath
        let item = self
            .ensure_current()
            .and_then(|()| self.reader.next_record(self.source))
            .and_then(|bytes| {
                self.ensure_current()?;
                decode_object::<T>(&bytes)
            });
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (remaining.min(1), Some(remaining))
    }
}

impl<T, S: PageSource + ?Sized> std::fmt::Debug for Objects<'_, T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Objects")
            .field("total", &self.chain.count)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl WriteTransaction<'_> {
    /// Appends an object to its class.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is finished, the object fails to
    /// encode, or a page of the class chain is corrupt.
    pub fn add<T: Object>(&mut self, object: &T) -> CoreResult<()> {
        self.ensure_active()?;
        let bytes = encode_object(object)?;
        append_record(self, T::CLASS_NAME, &bytes)?;
        debug!(
            txid = self.id().as_u64(),
            class = T::CLASS_NAME,
            bytes = bytes.len(),
            "added object"
        );
        Ok(())
    }

    /// Removes every object of type `T`, returning their chain pages to the
    /// free list. Returns the number of objects removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is finished or the class chain
    /// is corrupt.
    pub fn clear<T: Object>(&mut self) -> CoreResult<u64> {
        self.ensure_active()?;
        let Some(chain) = self.metadata().classes.get(T::CLASS_NAME).copied() else {
            return Ok(0);
        };

        let pages = chain_pages(&*self, &chain, self.page_count())?;
        for page in &pages {
            self.free_page(*page)?;
        }
        self.metadata_mut().classes.remove(T::CLASS_NAME);
        debug!(
            txid = self.id().as_u64(),
            class = T::CLASS_NAME,
            objects = chain.count,
            pages = pages.len(),
            "cleared class"
        );
        Ok(chain.count)
    }

    /// Returns a read view including this transaction's writes.
    #[must_use]
    pub fn objects(&self) -> ObjectStore<'_, Self> {
        ObjectStore::new(self)
    }

    /// Returns every object of type `T` as this transaction sees them.
    #[must_use]
    pub fn all_of<T: Object>(&self) -> Objects<'_, T, Self> {
        self.objects().all_of()
    }

    /// Returns the number of objects of type `T` as this transaction sees
    /// them.
    #[must_use]
    pub fn count<T: Object>(&self) -> u64 {
        self.objects().count::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pager::EncryptedFile;
    use crate::transaction::TransactionManager;
    use crate::wal::WalManager;
    use sealdb_storage::InMemoryBackend;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(rename = "stringProp")]
        text: String,
    }

    impl Object for Note {
        const CLASS_NAME: &'static str = "Note";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    impl Object for Counter {
        const CLASS_NAME: &'static str = "Counter";
    }

    fn note(text: &str) -> Note {
        Note { text: text.into() }
    }

    fn manager() -> TransactionManager {
        let file =
            EncryptedFile::create(Box::new(InMemoryBackend::new()), None, &Config::default())
                .unwrap();
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), true);
        TransactionManager::new(file, wal)
    }

    #[test]
    fn add_visible_in_transaction_then_committed() {
        let tm = manager();
        let mut txn = tm.begin_write().unwrap();
        txn.add(&note("abcd")).unwrap();
        assert_eq!(txn.count::<Note>(), 1);
        assert_eq!(ObjectStore::new(tm.file()).count::<Note>(), 0);
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let store = ObjectStore::new(tm.file());
        let notes: Vec<Note> = store.all_of::<Note>().collect::<CoreResult<_>>().unwrap();
        assert_eq!(notes, vec![note("abcd")]);
        assert_eq!(store.first::<Note>().unwrap(), Some(note("abcd")));
    }

    #[test]
    fn missing_class_is_empty() {
        let tm = manager();
        let store = ObjectStore::new(tm.file());
        assert_eq!(store.all_of::<Note>().count(), 0);
        assert_eq!(store.first::<Note>().unwrap(), None);
        assert!(store.classes().is_empty());
    }

    #[test]
    fn sequence_bounded_by_captured_count() {
        let tm = manager();
        let mut txn = tm.begin_write().unwrap();
        txn.add(&note("a")).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let store = ObjectStore::new(tm.file());
        let mut objects = store.all_of::<Note>();

        let mut txn = tm.begin_write().unwrap();
        txn.add(&note("b")).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        assert_eq!(objects.next().unwrap().unwrap(), note("a"));
        assert!(objects.next().is_none());
        assert_eq!(store.count::<Note>(), 2);
    }

    #[test]
    fn rewind_restarts() {
        let tm = manager();
        let mut txn = tm.begin_write().unwrap();
        for i in 0..3 {
            txn.add(&Counter { value: i }).unwrap();
        }
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let store = ObjectStore::new(tm.file());
        let mut objects = store.all_of::<Counter>();
        assert_eq!(objects.by_ref().count(), 3);
        assert!(objects.next().is_none());
        objects.rewind();
        let values: Vec<u32> = objects.map(|c| c.unwrap().value).collect();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn clear_frees_pages_for_reuse() {
        let tm = manager();
        let mut txn = tm.begin_write().unwrap();
        for i in 0..2000 {
            txn.add(&Counter { value: i }).unwrap();
        }
        txn.add(&note("keep")).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);
        let grown = tm.file().page_count();

        let mut txn = tm.begin_write().unwrap();
        assert_eq!(txn.clear::<Counter>().unwrap(), 2000);
        assert_eq!(txn.count::<Counter>(), 0);
        for i in 0..10 {
            txn.add(&Counter { value: i }).unwrap();
        }
        tm.commit(&mut txn).unwrap();
        drop(txn);

        assert_eq!(tm.file().page_count(), grown);
        let store = ObjectStore::new(tm.file());
        assert_eq!(store.count::<Counter>(), 10);
        assert_eq!(store.first::<Note>().unwrap(), Some(note("keep")));
        let classes = store.classes();
        assert!(classes.contains(&("Counter".to_string(), 10)));
        assert!(classes.contains(&("Note".to_string(), 1)));
    }

    #[test]
    fn clear_invalidates_pending_sequence() {
        let tm = manager();
        let mut txn = tm.begin_write().unwrap();
        txn.add(&note("a")).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let store = ObjectStore::new(tm.file());
        let mut notes = store.all_of::<Note>();

        // the freed chain page is reused by another class
        let mut txn = tm.begin_write().unwrap();
        txn.clear::<Note>().unwrap();
        txn.add(&Counter { value: 7 }).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        assert_eq!(store.count::<Note>(), 0);
        assert!(matches!(
            notes.next(),
            Some(Err(CoreError::InvalidOperation { .. }))
        ));
        assert!(notes.next().is_none());

        notes.rewind();
        assert!(matches!(
            notes.next(),
            Some(Err(CoreError::InvalidOperation { .. }))
        ));
    }

    #[test]
    fn refilled_class_invalidates_pending_sequence() {
        let tm = manager();
        let mut txn = tm.begin_write().unwrap();
        txn.add(&note("a")).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let store = ObjectStore::new(tm.file());
        let mut notes = store.all_of::<Note>();

        let mut txn = tm.begin_write().unwrap();
        txn.clear::<Note>().unwrap();
        txn.add(&note("b")).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        assert!(matches!(
            notes.next(),
            Some(Err(CoreError::InvalidOperation { .. }))
        ));
        assert_eq!(store.first::<Note>().unwrap(), Some(note("b")));
    }

    #[test]
    fn decode_error_stops_sequence() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Mismatch {
            value: String,
        }
        impl Object for Mismatch {
            const CLASS_NAME: &'static str = "Counter";
        }

        let tm = manager();
        let mut txn = tm.begin_write().unwrap();
        txn.add(&Counter { value: 1 }).unwrap();
        txn.add(&Counter { value: 2 }).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let store = ObjectStore::new(tm.file());
        let mut objects = store.all_of::<Mismatch>();
        assert!(objects.next().unwrap().is_err());
        assert!(objects.next().is_none());
    }
}
