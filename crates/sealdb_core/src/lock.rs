//! Advisory file locking and sidecar paths.
//!
//! A database at `<path>` owns two sidecar files:
//!
//! ```text
//! <path>          # Main page file
//! <path>.wal      # Write-ahead log
//! <path>.lock     # Advisory lock
//! ```
//!
//! Writable handles take an exclusive lock, read-only handles a shared one,
//! so any number of readers may coexist but never alongside a writer.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const WAL_SUFFIX: &str = ".wal";
const LOCK_SUFFIX: &str = ".lock";

/// Returns `<path>.wal`.
#[must_use]
pub fn wal_path(path: &Path) -> PathBuf {
    with_suffix(path, WAL_SUFFIX)
}

/// Returns `<path>.lock`.
#[must_use]
pub fn lock_path(path: &Path) -> PathBuf {
    with_suffix(path, LOCK_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// A held advisory lock on a database file.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    exclusive: bool,
    _file: File,
}

impl FileLock {
    /// Acquires the lock for the database at `db_path` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseLocked`] if another handle holds a
    /// conflicting lock.
    pub fn acquire(db_path: &Path, exclusive: bool) -> CoreResult<Self> {
        let path = lock_path(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let locked = if exclusive {
            FileExt::try_lock_exclusive(&file)
        } else {
            FileExt::try_lock_shared(&file)
        };
        if locked.is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path,
            exclusive,
            _file: file,
        })
    }

    /// Returns the path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if this is an exclusive (writer) lock.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}
