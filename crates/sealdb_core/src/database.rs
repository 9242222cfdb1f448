//! Database facade and recovery.

use crate::config::Config;
use crate::crypto::KeyMaterial;
use crate::error::{CoreError, CoreResult};
use crate::lock::{wal_path, FileLock};
use crate::object::{Object, ObjectStore, Objects};
use crate::pager::EncryptedFile;
use crate::transaction::{TransactionManager, WriteTransaction};
use crate::types::{PageNumber, TransactionId};
use crate::wal::{RecoveredLog, WalManager};
use sealdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The main database handle.
///
/// `Database` ties together the encrypted main file, the write-ahead log
/// and the file lock. Opening a handle:
/// - validates the key length before touching any file
/// - takes `<path>.lock` (exclusive for writers, shared for readers)
/// - scans `<path>.wal` and verifies the key against page 0
/// - replays committed transactions left behind by a crash
///
/// # Example
///
/// ```rust,no_run
/// use sealdb_core::{Database, KeyMaterial, Object};
/// use serde::{Deserialize, Serialize};
/// use std::path::Path;
///
/// #[derive(Serialize, Deserialize)]
/// struct Note {
///     text: String,
/// }
///
/// impl Object for Note {
///     const CLASS_NAME: &'static str = "Note";
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let key = KeyMaterial::generate();
/// let db = Database::open(Path::new("notes.sealdb"), Some(key.as_bytes()))?;
///
/// db.transaction(|txn| txn.add(&Note { text: "abcd".into() }))?;
///
/// for note in db.all_of::<Note>() {
///     println!("{}", note?.text);
/// }
/// db.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Database {
    config: Config,
    path: Option<PathBuf>,
    manager: TransactionManager,
    lock: Option<FileLock>,
}

impl Database {
    /// Opens or creates the database at `path`.
    ///
    /// `key` must be 64 bytes, or `None` for an unencrypted file. The key
    /// mode is fixed when the file is created.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidKeyLength`] for a key that isn't 64 bytes
    /// - [`CoreError::DatabaseLocked`] if another handle holds the file
    /// - [`CoreError::KeyMismatch`] if the key doesn't open the file
    /// - [`CoreError::KeyModeMismatch`] if a key was supplied for an
    ///   unencrypted file or omitted for an encrypted one
    pub fn open(path: &Path, key: Option<&[u8]>) -> CoreResult<Self> {
        Self::open_with_config(path, key, Config::default())
    }

    /// Opens an existing database without write access.
    ///
    /// Committed transactions still in the log are served from memory; the
    /// files are left untouched.
    ///
    /// # Errors
    ///
    /// As [`Database::open`], plus [`CoreError::DatabaseNotFound`] if the
    /// file doesn't exist.
    pub fn open_read_only(path: &Path, key: Option<&[u8]>) -> CoreResult<Self> {
        Self::open_with_config(path, key, Config::default().read_only(true))
    }

    /// Opens the database at `path` with custom configuration.
    ///
    /// # Errors
    ///
    /// As [`Database::open`], plus [`CoreError::DatabaseNotFound`] when the
    /// file is missing and may not be created, and
    /// [`CoreError::InvalidFormat`] when it exists and `error_if_exists` is
    /// set.
    pub fn open_with_config(path: &Path, key: Option<&[u8]>, config: Config) -> CoreResult<Self> {
        let key = key.map(KeyMaterial::from_bytes).transpose()?;

        let exists = std::fs::metadata(path).is_ok_and(|m| m.len() > 0);
        if !exists && (config.read_only || !config.create_if_missing) {
            return Err(CoreError::DatabaseNotFound {
                path: path.display().to_string(),
            });
        }
        if !exists {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock = FileLock::acquire(path, !config.read_only)?;

        let wal_file = wal_path(path);
        let (main, wal): (Box<dyn StorageBackend>, Box<dyn StorageBackend>) = if config.read_only {
            let wal: Box<dyn StorageBackend> = if wal_file.exists() {
                Box::new(FileBackend::open_read_only(&wal_file)?)
            } else {
                Box::new(InMemoryBackend::new())
            };
            (Box::new(FileBackend::open_read_only(path)?), wal)
        } else {
            (
                Box::new(FileBackend::open(path)?),
                Box::new(FileBackend::open(&wal_file)?),
            )
        };

        let mut db = Self::assemble(config, key.as_ref(), main, wal, &path.display().to_string())?;
        db.path = Some(path.to_path_buf());
        db.lock = Some(lock);
        Ok(db)
    }

    /// Opens a database over caller-supplied backends.
    ///
    /// No lock is taken; the caller owns exclusivity of the backends.
    ///
    /// # Errors
    ///
    /// As [`Database::open_with_config`].
    pub fn open_with_backends(
        config: Config,
        key: Option<&[u8]>,
        main: Box<dyn StorageBackend>,
        wal: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let key = key.map(KeyMaterial::from_bytes).transpose()?;
        Self::assemble(config, key.as_ref(), main, wal, ":backends:")
    }

    /// Opens a fresh in-memory database. Data is lost when the handle is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKeyLength`] for a key that isn't 64 bytes.
    pub fn open_in_memory(key: Option<&[u8]>) -> CoreResult<Self> {
        Self::open_with_backends(
            Config::default(),
            key,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    fn assemble(
        config: Config,
        key: Option<&KeyMaterial>,
        main: Box<dyn StorageBackend>,
        wal: Box<dyn StorageBackend>,
        name: &str,
    ) -> CoreResult<Self> {
        let wal = WalManager::new(wal, config.sync_on_commit);

        // a create that crashed before page 0 was complete left nothing
        // worth keeping
        let unfinished = EncryptedFile::is_unfinished_create(&*main)? && wal.is_empty()?;
        let (file, log) = if unfinished {
            if config.read_only || !config.create_if_missing {
                return Err(CoreError::DatabaseNotFound {
                    path: name.to_string(),
                });
            }
            let torn = main.size()?;
            if torn > 0 {
                warn!(database = name, bytes = torn, "reinitializing interrupted create");
            }
            let file = EncryptedFile::create(main, key, &config)?;
            info!(database = name, encrypted = key.is_some(), "created database");
            (file, RecoveredLog::default())
        } else {
            if config.error_if_exists {
                return Err(CoreError::invalid_format(
                    "database already exists and error_if_exists is true",
                ));
            }
            let log = wal.recover()?;
            let file = EncryptedFile::open(main, key, &config, &log)?;
            (file, log)
        };

        let manager = TransactionManager::new(file, wal);
        let replayed = manager.recover(log)?;
        if replayed > 0 {
            info!(database = name, transactions = replayed, "recovered database");
        }

        Ok(Self {
            config,
            path: None,
            manager,
            lock: None,
        })
    }

    /// Begins a write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionInProgress`] if this handle already
    /// has an active transaction, or [`CoreError::ReadOnly`] on a read-only
    /// handle.
    pub fn begin(&self) -> CoreResult<WriteTransaction<'_>> {
        self.manager.begin_write()
    }

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction isn't active or logging fails.
    /// Once the log is durable, an error applying it poisons the handle
    /// instead of rolling back.
    pub fn commit(&self, txn: &mut WriteTransaction<'_>) -> CoreResult<TransactionId> {
        self.manager.commit(txn)
    }

    /// Aborts a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction isn't active.
    pub fn abort(&self, txn: &mut WriteTransaction<'_>) -> CoreResult<()> {
        self.manager.abort(txn)
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is aborted.
    ///
    /// # Errors
    ///
    /// Returns the function's error, or the error from beginning or
    /// committing.
    pub fn transaction<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<R>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                if txn.is_active() {
                    self.abort(&mut txn)?;
                }
                Err(e)
            }
        }
    }

    /// Returns a read view of the committed objects.
    #[must_use]
    pub fn objects(&self) -> ObjectStore<'_, EncryptedFile> {
        ObjectStore::new(self.manager.file())
    }

    /// Returns every committed object of type `T`, in insertion order.
    #[must_use]
    pub fn all_of<T: Object>(&self) -> Objects<'_, T, EncryptedFile> {
        self.objects().all_of()
    }

    /// Returns the number of committed objects of type `T`.
    #[must_use]
    pub fn count<T: Object>(&self) -> u64 {
        self.objects().count::<T>()
    }

    /// Returns the first committed object of type `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if its page is corrupt or it fails to decode.
    pub fn first<T: Object>(&self) -> CoreResult<Option<T>> {
        self.objects().first()
    }

    /// Returns the class names in the catalog with their object counts.
    #[must_use]
    pub fn classes(&self) -> Vec<(String, u64)> {
        self.objects().classes()
    }

    /// Reads the decrypted contents of a committed data page.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageOutOfRange`] past the end of the file and
    /// [`CoreError::CorruptPage`] if the page fails authentication.
    pub fn read_page(&self, page: PageNumber) -> CoreResult<Vec<u8>> {
        self.manager.file().read_page(page)
    }

    /// Returns the number of committed pages, including page 0.
    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.manager.file().page_count()
    }

    /// Returns the ID of the last committed transaction.
    #[must_use]
    pub fn last_txid(&self) -> TransactionId {
        self.manager.file().metadata().last_txid
    }

    /// Returns true if the file was created with a key.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.manager.file().is_encrypted()
    }

    /// Returns true for read-only handles.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.manager.file().is_read_only()
    }

    /// Returns the database path, or `None` for in-memory and
    /// backend-supplied databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Syncs the files and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails. The lock is released
    /// either way.
    pub fn close(self) -> CoreResult<()> {
        if !self.is_read_only() {
            self.manager.file().sync()?;
        }
        info!(path = ?self.path, "closed database");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("encrypted", &self.is_encrypted())
            .field("read_only", &self.is_read_only())
            .field("page_count", &self.page_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl Object for Note {
        const CLASS_NAME: &'static str = "Note";
    }

    fn note(text: &str) -> Note {
        Note { text: text.into() }
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn database_is_send_sync() {
        assert_send_sync::<Database>();
    }

    #[test]
    fn open_in_memory() {
        let db = Database::open_in_memory(None).unwrap();
        assert!(!db.is_encrypted());
        assert_eq!(db.page_count(), 1);
        assert!(db.path().is_none());
    }

    #[test]
    fn invalid_key_length_rejected() {
        let err = Database::open_in_memory(Some(&[0u8; 32])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidKeyLength {
                actual: 32,
                expected: KEY_SIZE
            }
        ));
    }

    #[test]
    fn transaction_commits_on_ok() {
        let key = KeyMaterial::generate();
        let db = Database::open_in_memory(Some(key.as_bytes())).unwrap();
        db.transaction(|txn| txn.add(&note("abcd"))).unwrap();

        assert_eq!(db.count::<Note>(), 1);
        assert_eq!(db.first::<Note>().unwrap(), Some(note("abcd")));
        assert_eq!(db.last_txid(), TransactionId::new(1));
        assert_eq!(db.classes(), vec![("Note".to_string(), 1)]);
    }

    #[test]
    fn transaction_aborts_on_err() {
        let db = Database::open_in_memory(None).unwrap();
        let result: CoreResult<()> = db.transaction(|txn| {
            txn.add(&note("lost"))?;
            Err(CoreError::invalid_operation("rollback"))
        });
        assert!(result.is_err());
        assert_eq!(db.count::<Note>(), 0);
        assert!(db.begin().is_ok());
    }

    #[test]
    fn nested_begin_fails() {
        let db = Database::open_in_memory(None).unwrap();
        let _txn = db.begin().unwrap();
        assert!(matches!(db.begin(), Err(CoreError::TransactionInProgress)));
    }

    #[test]
    fn read_page_bounds() {
        let db = Database::open_in_memory(None).unwrap();
        assert!(matches!(
            db.read_page(PageNumber::new(1)),
            Err(CoreError::PageOutOfRange { .. })
        ));

        db.transaction(|txn| {
            let page = txn.allocate_page()?;
            txn.write_page(page, b"raw")
        })
        .unwrap();
        assert_eq!(&db.read_page(PageNumber::new(1)).unwrap()[..3], b"raw");
    }

    #[test]
    fn backends_reopen_with_key() {
        let key = KeyMaterial::generate();
        let main = InMemoryBackend::new();
        let wal = InMemoryBackend::new();

        let db = Database::open_with_backends(
            Config::default(),
            Some(key.as_bytes()),
            Box::new(main.handle()),
            Box::new(wal.handle()),
        )
        .unwrap();
        db.transaction(|txn| txn.add(&note("kept"))).unwrap();
        db.close().unwrap();

        let db = Database::open_with_backends(
            Config::default(),
            Some(key.as_bytes()),
            Box::new(main.handle()),
            Box::new(wal.handle()),
        )
        .unwrap();
        assert_eq!(db.first::<Note>().unwrap(), Some(note("kept")));

        let other = KeyMaterial::generate();
        let err = Database::open_with_backends(
            Config::default(),
            Some(other.as_bytes()),
            Box::new(main.handle()),
            Box::new(wal.handle()),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::KeyMismatch));
    }

    #[test]
    fn missing_database_not_created_when_disallowed() {
        let err = Database::open_with_backends(
            Config::default().create_if_missing(false),
            None,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DatabaseNotFound { .. }));
    }

    #[test]
    fn error_if_exists() {
        let main = InMemoryBackend::new();
        Database::open_with_backends(
            Config::default(),
            None,
            Box::new(main.handle()),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap();

        let err = Database::open_with_backends(
            Config::default().error_if_exists(true),
            None,
            Box::new(main.handle()),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn torn_create_is_reinitialized() {
        let key = KeyMaterial::generate();
        let main = InMemoryBackend::with_data(crate::pager::FILE_MAGIC[..5].to_vec());
        let wal = InMemoryBackend::new();

        let err = Database::open_with_backends(
            Config::default().read_only(true),
            Some(key.as_bytes()),
            Box::new(main.handle()),
            Box::new(wal.handle()),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DatabaseNotFound { .. }));

        let db = Database::open_with_backends(
            Config::default(),
            Some(key.as_bytes()),
            Box::new(main.handle()),
            Box::new(wal.handle()),
        )
        .unwrap();
        assert!(db.is_encrypted());
        assert_eq!(db.page_count(), 1);
        assert_eq!(main.data().len(), crate::pager::PAGE_SIZE);
    }

    #[test]
    fn short_foreign_file_is_not_overwritten() {
        let main = InMemoryBackend::with_data(b"not a database".to_vec());
        let err = Database::open_with_backends(
            Config::default(),
            None,
            Box::new(main.handle()),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
        assert_eq!(main.data(), b"not a database");
    }
}
