//! Per-class page chains.
//!
//! ```text
//! | next: u64 | used: u32 | data (4056) |
//! ```
//!
//! `next` is the following page of the chain (0 on the last page) and
//! `used` counts the bytes of `data` in use. Records are framed as
//! `len: u32 | cbor` and may span pages.

use crate::error::{CoreError, CoreResult};
use crate::pager::{ClassChain, PageSource, PAGE_PAYLOAD_SIZE};
use crate::transaction::WriteTransaction;
use crate::types::PageNumber;

pub(crate) const CHAIN_HEADER_SIZE: usize = 12;

/// Bytes of record data one chain page holds.
pub(crate) const CHAIN_DATA_SIZE: usize = PAGE_PAYLOAD_SIZE - CHAIN_HEADER_SIZE;

const LEN_SIZE: usize = 4;

fn parse_header(page: PageNumber, payload: &[u8]) -> CoreResult<(u64, usize)> {
    let mut next = [0u8; 8];
    next.copy_from_slice(&payload[0..8]);
    let mut used = [0u8; 4];
    used.copy_from_slice(&payload[8..12]);
    let used = u32::from_le_bytes(used) as usize;
    if used > CHAIN_DATA_SIZE {
        return Err(CoreError::corrupt_page(
            page,
            format!("chain page claims {used} used bytes"),
        ));
    }
    Ok((u64::from_le_bytes(next), used))
}

fn write_header(payload: &mut [u8], next: u64, used: usize) {
    payload[0..8].copy_from_slice(&next.to_le_bytes());
    payload[8..12].copy_from_slice(&(used as u32).to_le_bytes());
}

/// Appends one framed record to the end of a class chain.
pub(crate) fn append_record(
    txn: &mut WriteTransaction<'_>,
    class: &str,
    record: &[u8],
) -> CoreResult<()> {
    let len = u32::try_from(record.len())
        .map_err(|_| CoreError::invalid_operation("object exceeds 4 GiB when encoded"))?;
    let mut framed = Vec::with_capacity(LEN_SIZE + record.len());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(record);

    let mut chain = txn.metadata().classes.get(class).copied().unwrap_or_default();
    if chain.is_empty() {
        let page = txn.allocate_page()?;
        chain.first = page.as_u64();
        chain.last = page.as_u64();
        chain.tail_used = 0;
        chain.generation = txn.metadata_mut().next_generation();
    }

    let mut written = 0;
    loop {
        let page = PageNumber::new(chain.last);
        let mut payload = txn.read_page(page)?;
        let mut used = chain.tail_used as usize;

        let n = (CHAIN_DATA_SIZE - used).min(framed.len() - written);
        let start = CHAIN_HEADER_SIZE + used;
        payload[start..start + n].copy_from_slice(&framed[written..written + n]);
        used += n;
        written += n;

        if written == framed.len() {
            write_header(&mut payload, 0, used);
            txn.write_page(page, &payload)?;
            chain.tail_used = used as u32;
            break;
        }

        let next = txn.allocate_page()?;
        write_header(&mut payload, next.as_u64(), used);
        txn.write_page(page, &payload)?;
        chain.last = next.as_u64();
        chain.tail_used = 0;
    }

    chain.count += 1;
    txn.metadata_mut().classes.insert(class.to_owned(), chain);
    Ok(())
}

/// Lists the pages of a chain in order.
///
/// `limit` bounds the walk so a corrupt cycle can't loop forever.
pub(crate) fn chain_pages<S: PageSource + ?Sized>(
    source: &S,
    chain: &ClassChain,
    limit: u64,
) -> CoreResult<Vec<PageNumber>> {
    let mut pages = Vec::new();
    if chain.is_empty() {
        return Ok(pages);
    }

    let mut current = chain.first;
    loop {
        let page = PageNumber::new(current);
        pages.push(page);
        if current == chain.last {
            return Ok(pages);
        }
        if pages.len() as u64 >= limit {
            return Err(CoreError::corrupt_page(page, "object chain does not terminate"));
        }
        let (next, _) = parse_header(page, &source.read_page(page)?)?;
        if next == 0 {
            return Err(CoreError::corrupt_page(
                page,
                "object chain ends before its last page",
            ));
        }
        current = next;
    }
}

/// Sequential reader over the records of a chain.
///
/// Reads stop at the chain's last page as captured when the reader was
/// created; the last page's fill level is taken from the capture too, so
/// records appended afterwards stay invisible.
#[derive(Debug, Clone)]
pub(crate) struct ChainReader {
    chain: ClassChain,
    current: Option<PageNumber>,
    data: Vec<u8>,
    pos: usize,
    used: usize,
    next: u64,
}

impl ChainReader {
    pub(crate) fn new(chain: ClassChain) -> Self {
        Self {
            chain,
            current: None,
            data: Vec::new(),
            pos: 0,
            used: 0,
            next: 0,
        }
    }

    /// Reads the next record's bytes.
    pub(crate) fn next_record<S: PageSource + ?Sized>(&mut self, source: &S) -> CoreResult<Vec<u8>> {
        let mut len = [0u8; LEN_SIZE];
        let mut filled = 0;
        while filled < LEN_SIZE {
            let chunk = self.take(source, LEN_SIZE - filled)?;
            len[filled..filled + chunk.len()].copy_from_slice(chunk);
            filled += chunk.len();
        }

        let len = u32::from_le_bytes(len) as usize;
        let mut record = Vec::with_capacity(len.min(CHAIN_DATA_SIZE));
        while record.len() < len {
            let want = len - record.len();
            record.extend_from_slice(self.take(source, want)?);
        }
        Ok(record)
    }

    /// Returns up to `max` unread bytes, moving to the next page when the
    /// current one is exhausted.
    fn take<S: PageSource + ?Sized>(&mut self, source: &S, max: usize) -> CoreResult<&[u8]> {
        while self.pos == self.used {
            self.advance(source)?;
        }
        let n = (self.used - self.pos).min(max);
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    fn advance<S: PageSource + ?Sized>(&mut self, source: &S) -> CoreResult<()> {
        let page = match self.current {
            None if self.chain.is_empty() => {
                return Err(CoreError::invalid_operation("object chain is empty"));
            }
            None => PageNumber::new(self.chain.first),
            Some(current) if current.as_u64() == self.chain.last => {
                return Err(CoreError::corrupt_page(
                    current,
                    "object record runs past the end of its chain",
                ));
            }
            Some(current) if self.next == 0 => {
                return Err(CoreError::corrupt_page(
                    current,
                    "object chain ends before its last page",
                ));
            }
            Some(_) => PageNumber::new(self.next),
        };

        let payload = source.read_page(page)?;
        let (next, used) = parse_header(page, &payload)?;
        self.used = if page.as_u64() == self.chain.last {
            (self.chain.tail_used as usize).min(used)
        } else {
            used
        };
        self.next = next;
        self.data = payload[CHAIN_HEADER_SIZE..CHAIN_HEADER_SIZE + self.used].to_vec();
        self.pos = 0;
        self.current = Some(page);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pager::EncryptedFile;
    use crate::types::TransactionId;
    use parking_lot::Mutex;
    use sealdb_storage::InMemoryBackend;

    fn file() -> EncryptedFile {
        EncryptedFile::create(Box::new(InMemoryBackend::new()), None, &Config::default()).unwrap()
    }

    #[test]
    fn small_records_share_a_page() {
        let file = file();
        let lock = Mutex::new(());
        let mut txn = WriteTransaction::new(TransactionId::new(1), &file, lock.lock());

        append_record(&mut txn, "A", b"one").unwrap();
        append_record(&mut txn, "A", b"two").unwrap();

        let chain = txn.class_chain("A").unwrap();
        assert_eq!(chain.first, chain.last);
        assert_eq!(chain.count, 2);
        assert_eq!(chain.tail_used, 14);

        let mut reader = ChainReader::new(chain);
        assert_eq!(reader.next_record(&txn).unwrap(), b"one");
        assert_eq!(reader.next_record(&txn).unwrap(), b"two");
        assert!(reader.next_record(&txn).is_err());
    }

    #[test]
    fn large_record_spans_pages() {
        let file = file();
        let lock = Mutex::new(());
        let mut txn = WriteTransaction::new(TransactionId::new(1), &file, lock.lock());

        let big: Vec<u8> = (0..CHAIN_DATA_SIZE * 2 + 100).map(|i| i as u8).collect();
        append_record(&mut txn, "A", b"head").unwrap();
        append_record(&mut txn, "A", &big).unwrap();
        append_record(&mut txn, "A", b"tail").unwrap();

        let chain = txn.class_chain("A").unwrap();
        let pages = chain_pages(&txn, &chain, txn.page_count()).unwrap();
        assert_eq!(pages.len(), 3);

        let mut reader = ChainReader::new(chain);
        assert_eq!(reader.next_record(&txn).unwrap(), b"head");
        assert_eq!(reader.next_record(&txn).unwrap(), big);
        assert_eq!(reader.next_record(&txn).unwrap(), b"tail");
    }

    #[test]
    fn classes_have_separate_chains() {
        let file = file();
        let lock = Mutex::new(());
        let mut txn = WriteTransaction::new(TransactionId::new(1), &file, lock.lock());

        append_record(&mut txn, "A", b"a").unwrap();
        append_record(&mut txn, "B", b"b").unwrap();

        let a = txn.class_chain("A").unwrap();
        let b = txn.class_chain("B").unwrap();
        assert_ne!(a.first, b.first);
        assert_eq!(ChainReader::new(b).next_record(&txn).unwrap(), b"b");
    }

    #[test]
    fn reader_ignores_records_appended_later() {
        let file = file();
        let lock = Mutex::new(());
        let mut txn = WriteTransaction::new(TransactionId::new(1), &file, lock.lock());

        append_record(&mut txn, "A", b"first").unwrap();
        let captured = txn.class_chain("A").unwrap();
        append_record(&mut txn, "A", b"second").unwrap();

        let mut reader = ChainReader::new(captured);
        assert_eq!(reader.next_record(&txn).unwrap(), b"first");
        assert!(reader.next_record(&txn).is_err());
    }

    #[test]
    fn empty_chain_has_no_pages() {
        let file = file();
        let pages = chain_pages(&file, &ClassChain::default(), 10).unwrap();
        assert!(pages.is_empty());
    }
}
