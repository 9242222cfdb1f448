//! The encrypted main file.

use crate::config::Config;
use crate::crypto::{KeyMaterial, KeyMode, PageCipher};
use crate::error::{CoreError, CoreResult};
use crate::pager::cache::PageCache;
use crate::pager::header::{Preamble, FILE_MAGIC, FORMAT_VERSION, PREAMBLE_SIZE};
use crate::pager::meta::{ClassChain, Metadata};
use crate::pager::{PageSource, PAGE_PAYLOAD_SIZE, PAGE_SIZE};
use crate::types::PageNumber;
use crate::wal::RecoveredLog;
use parking_lot::{Mutex, RwLock};
use sealdb_storage::{StorageBackend, StorageError};
use std::collections::HashMap;
use tracing::{debug, info};

/// Maps page numbers to sealed blocks in a storage backend.
///
/// `EncryptedFile` owns the on-disk byte layout. It verifies the key when
/// opened, serves decrypted committed pages, and writes sealed blocks only
/// when a commit or recovery hands them over through [`apply`](Self::apply).
pub struct EncryptedFile {
    backend: RwLock<Box<dyn StorageBackend>>,
    cipher: PageCipher,
    preamble: Preamble,
    meta: RwLock<Metadata>,
    cache: Mutex<PageCache>,
    /// Committed blocks not (yet) in the backend: WAL contents on read-only
    /// handles, or blocks whose in-place write failed.
    overlay: RwLock<HashMap<PageNumber, Vec<u8>>>,
    read_only: bool,
    sync_on_commit: bool,
}

impl EncryptedFile {
    /// Initializes a new file in an empty backend.
    ///
    /// Writes the preamble and a sealed metadata page under `key` (or in
    /// plaintext mode when `key` is `None`) and syncs.
    ///
    /// # Errors
    ///
    /// Returns an error if the format version is unsupported, the handle is
    /// read-only, or the write fails.
    pub fn create(
        mut backend: Box<dyn StorageBackend>,
        key: Option<&KeyMaterial>,
        config: &Config,
    ) -> CoreResult<Self> {
        if config.read_only {
            return Err(CoreError::ReadOnly);
        }
        if config.format_version == 0 || config.format_version > FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "cannot create format version {}",
                config.format_version
            )));
        }

        let key_mode = if key.is_some() {
            KeyMode::Encrypted
        } else {
            KeyMode::Plaintext
        };
        let preamble = Preamble::new(config.format_version, key_mode);
        let cipher = PageCipher::new(key, preamble.file_id)?;
        let meta = Metadata::new(&preamble);

        let block = Self::encode_meta_block(&cipher, &preamble, &meta)?;
        backend.write_at(0, &block)?;
        backend.sync()?;

        info!(encrypted = key_mode.is_encrypted(), "created database file");

        Ok(Self::assemble(backend, cipher, preamble, meta, config))
    }

    /// Returns true if `backend` holds nothing but the torn start of a
    /// [`create`](Self::create): fewer bytes than one page, beginning with
    /// (a prefix of) the file magic.
    ///
    /// An empty backend counts as torn too. Anything else is left for
    /// [`open`](Self::open) to accept or reject.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend can't be read.
    pub fn is_unfinished_create(backend: &dyn StorageBackend) -> CoreResult<bool> {
        let size = backend.size()?;
        if size >= PAGE_SIZE as u64 {
            return Ok(false);
        }
        let len = (size as usize).min(FILE_MAGIC.len());
        let head = backend.read_at(0, len)?;
        Ok(head[..] == FILE_MAGIC[..len])
    }

    /// Opens an existing file and verifies the key against page 0.
    ///
    /// If the log holds a committed image of page 0 it takes precedence
    /// over the one on disk, which may be stale or torn.
    ///
    /// # Errors
    ///
    /// - [`CoreError::KeyModeMismatch`] if key presence disagrees with the
    ///   file's key mode
    /// - [`CoreError::KeyMismatch`] if page 0 fails authentication
    /// - [`CoreError::InvalidFormat`] or [`CoreError::ChecksumMismatch`] for
    ///   a file that is not a valid SealDB file
    pub fn open(
        backend: Box<dyn StorageBackend>,
        key: Option<&KeyMaterial>,
        config: &Config,
        recovered: &RecoveredLog,
    ) -> CoreResult<Self> {
        let size = backend.size()?;
        if size < PAGE_SIZE as u64 {
            return Err(CoreError::invalid_format(format!(
                "file is {size} bytes, smaller than one page"
            )));
        }

        let disk_block = backend.read_at(0, PAGE_SIZE)?;
        let preamble = Preamble::decode(&disk_block)?;

        let file_encrypted = preamble.key_mode.is_encrypted();
        if file_encrypted != key.is_some() {
            return Err(CoreError::KeyModeMismatch {
                file_encrypted,
                key_supplied: key.is_some(),
            });
        }

        let cipher = PageCipher::new(key, preamble.file_id)?;

        let meta = match recovered.latest_meta_block() {
            Some(logged) => match Self::decode_meta_block(&cipher, &preamble, logged) {
                Err(CoreError::AuthenticationFailed { .. }) => {
                    // a key that opens the disk copy but not the logged one
                    // means the log belongs to another file
                    return Err(
                        match Self::decode_meta_block(&cipher, &preamble, &disk_block) {
                            Ok(_) => CoreError::wal_corruption(
                                "logged metadata page does not belong to this file",
                            ),
                            Err(_) => CoreError::KeyMismatch,
                        },
                    );
                }
                other => other?,
            },
            None => Self::decode_meta_block(&cipher, &preamble, &disk_block).map_err(
                |e| match e {
                    CoreError::AuthenticationFailed { .. } => CoreError::KeyMismatch,
                    other => other,
                },
            )?,
        };

        info!(
            encrypted = file_encrypted,
            page_count = meta.page_count,
            read_only = config.read_only,
            "opened database file"
        );

        Ok(Self::assemble(backend, cipher, preamble, meta, config))
    }

    fn assemble(
        backend: Box<dyn StorageBackend>,
        cipher: PageCipher,
        preamble: Preamble,
        meta: Metadata,
        config: &Config,
    ) -> Self {
        Self {
            backend: RwLock::new(backend),
            cipher,
            preamble,
            meta: RwLock::new(meta),
            cache: Mutex::new(PageCache::new(config.page_cache_capacity)),
            overlay: RwLock::new(HashMap::new()),
            read_only: config.read_only,
            sync_on_commit: config.sync_on_commit,
        }
    }

    fn encode_meta_block(
        cipher: &PageCipher,
        preamble: &Preamble,
        meta: &Metadata,
    ) -> CoreResult<Vec<u8>> {
        let payload = meta.encode_payload()?;
        let mut block = Vec::with_capacity(PAGE_SIZE);
        block.extend_from_slice(&preamble.encode());
        block.extend(cipher.seal(PageNumber::META, &payload)?);
        debug_assert_eq!(block.len(), PAGE_SIZE);
        Ok(block)
    }

    fn decode_meta_block(
        cipher: &PageCipher,
        preamble: &Preamble,
        block: &[u8],
    ) -> CoreResult<Metadata> {
        if block.len() != PAGE_SIZE {
            return Err(CoreError::invalid_format("metadata block has wrong size"));
        }
        if Preamble::decode(block)? != *preamble {
            return Err(CoreError::invalid_format(
                "metadata block preamble does not match file",
            ));
        }

        let payload = cipher.open(PageNumber::META, &block[PREAMBLE_SIZE..])?;
        let meta = Metadata::decode_payload(&payload)?;
        meta.check_against(preamble)?;
        Ok(meta)
    }

    /// Returns the key mode fixed at creation.
    #[must_use]
    pub fn key_mode(&self) -> KeyMode {
        self.preamble.key_mode
    }

    /// Returns true if pages are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.preamble.key_mode.is_encrypted()
    }

    /// Returns true if this handle cannot write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the file's preamble.
    #[must_use]
    pub fn preamble(&self) -> &Preamble {
        &self.preamble
    }

    /// Returns a copy of the committed metadata.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        self.meta.read().clone()
    }

    /// Returns the number of committed pages, including page 0.
    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.meta.read().page_count
    }

    /// Reads and decrypts committed data page `page`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperation`] for page 0, which holds metadata
    /// - [`CoreError::PageOutOfRange`] beyond the committed page count
    /// - [`CoreError::CorruptPage`] if the block is missing or fails
    ///   authentication
    pub fn read_page(&self, page: PageNumber) -> CoreResult<Vec<u8>> {
        if page.is_meta() {
            return Err(CoreError::invalid_operation(
                "page 0 holds file metadata and is not readable as data",
            ));
        }
        // held for the whole read so the page and metadata come from the
        // same commit
        let meta = self.meta.read();
        if page.as_u64() >= meta.page_count {
            return Err(CoreError::PageOutOfRange {
                page,
                page_count: meta.page_count,
            });
        }

        if let Some(payload) = self.cache.lock().get(page) {
            return Ok(payload);
        }

        let overlaid = self.overlay.read().get(&page).cloned();
        let block = match overlaid {
            Some(block) => block,
            None => self
                .backend
                .read()
                .read_at(page.as_u64() * PAGE_SIZE as u64, PAGE_SIZE)
                .map_err(|e| match e {
                    StorageError::ReadPastEnd { .. } => {
                        CoreError::corrupt_page(page, "block missing from file")
                    }
                    other => other.into(),
                })?,
        };

        let payload = self.cipher.open(page, &block).map_err(|e| match e {
            CoreError::AuthenticationFailed { page } => {
                CoreError::corrupt_page(page, "authentication tag mismatch")
            }
            other => other,
        })?;
        debug!(page = page.as_u64(), "decrypted page");

        self.cache.lock().insert(page, payload.clone());
        Ok(payload)
    }

    /// Seals a data page payload into a physical block.
    ///
    /// Short payloads are zero-padded to [`PAGE_PAYLOAD_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns an error for page 0 or an oversized payload.
    pub fn seal_page(&self, page: PageNumber, payload: &[u8]) -> CoreResult<Vec<u8>> {
        if page.is_meta() {
            return Err(CoreError::invalid_operation(
                "page 0 is written through seal_metadata",
            ));
        }
        if payload.len() > PAGE_PAYLOAD_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "page payload is {} bytes, maximum is {PAGE_PAYLOAD_SIZE}",
                payload.len()
            )));
        }

        let mut padded = payload.to_vec();
        padded.resize(PAGE_PAYLOAD_SIZE, 0);
        self.cipher.seal(page, &padded)
    }

    /// Seals metadata into a complete page-0 block, preamble included.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata no longer fits in page 0.
    pub fn seal_metadata(&self, meta: &Metadata) -> CoreResult<Vec<u8>> {
        Self::encode_meta_block(&self.cipher, &self.preamble, meta)
    }

    /// Writes committed blocks in place, syncs, and installs `meta` as the
    /// committed metadata. Concurrent reads see either the old state or the
    /// new one.
    ///
    /// If a write fails the blocks are kept in memory so this handle still
    /// serves the committed state; the error is returned so the caller can
    /// stop accepting new writes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnly`] on a read-only handle, or the first
    /// storage error.
    pub fn apply(&self, blocks: Vec<(PageNumber, Vec<u8>)>, meta: Metadata) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::ReadOnly);
        }

        // readers wait until blocks and metadata are both in place
        let mut committed = self.meta.write();
        let result = {
            let mut backend = self.backend.write();
            Self::write_blocks(&mut **backend, &blocks, self.sync_on_commit)
        };

        {
            let mut cache = self.cache.lock();
            for (page, _) in &blocks {
                cache.remove(*page);
            }
        }
        *committed = meta;

        let mut overlay = self.overlay.write();
        match result {
            Ok(()) => {
                for (page, _) in &blocks {
                    overlay.remove(page);
                }
                debug!(pages = blocks.len(), "applied blocks to main file");
                Ok(())
            }
            Err(e) => {
                overlay.extend(blocks);
                Err(e)
            }
        }
    }

    fn write_blocks(
        backend: &mut dyn StorageBackend,
        blocks: &[(PageNumber, Vec<u8>)],
        sync: bool,
    ) -> CoreResult<()> {
        for (page, block) in blocks {
            backend.write_at(page.as_u64() * PAGE_SIZE as u64, block)?;
        }
        if sync {
            backend.sync()?;
        } else {
            backend.flush()?;
        }
        Ok(())
    }

    /// Serves committed-but-unapplied blocks from memory.
    ///
    /// Used by read-only handles, which must not write recovery results.
    pub fn install_overlay(&self, blocks: Vec<(PageNumber, Vec<u8>)>) {
        self.cache.lock().clear();
        self.overlay.write().extend(blocks);
    }

    /// Returns the number of blocks currently served from memory.
    #[must_use]
    pub fn overlay_len(&self) -> usize {
        self.overlay.read().len()
    }

    /// Flushes the main file to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        if !self.read_only {
            self.backend.write().sync()?;
        }
        Ok(())
    }
}

impl PageSource for EncryptedFile {
    fn read_page(&self, page: PageNumber) -> CoreResult<Vec<u8>> {
        EncryptedFile::read_page(self, page)
    }

    fn class_chain(&self, class: &str) -> Option<ClassChain> {
        self.meta.read().classes.get(class).copied()
    }

    fn classes(&self) -> Vec<(String, ClassChain)> {
        let meta = self.meta.read();
        meta.classes.iter().map(|(name, chain)| (name.clone(), *chain)).collect()
    }
}

impl std::fmt::Debug for EncryptedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFile")
            .field("key_mode", &self.key_mode())
            .field("page_count", &self.page_count())
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}
