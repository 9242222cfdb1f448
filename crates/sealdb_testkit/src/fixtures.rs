//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use sealdb_core::{Config, CoreResult, Database, KeyMaterial, Object};
use sealdb_storage::{InMemoryBackend, StorageBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A small object type for tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Text of the note.
    #[serde(rename = "stringProp")]
    pub text: String,
}

impl Note {
    /// Creates a note.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Object for Note {
    const CLASS_NAME: &'static str = "Note";
}

/// Main file and WAL held in memory, reopenable any number of times.
///
/// Every database opened from the same `MemoryFiles` shares its bytes, so
/// dropping a handle and opening another behaves like restarting a
/// process over the same files.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    /// Main database file.
    pub main: InMemoryBackend,
    /// Write-ahead log.
    pub wal: InMemoryBackend,
}

impl Clone for MemoryFiles {
    /// Returns handles sharing the same bytes; see [`MemoryFiles::snapshot`]
    /// for a copy.
    fn clone(&self) -> Self {
        Self {
            main: self.main.handle(),
            wal: self.wal.handle(),
        }
    }
}

impl MemoryFiles {
    /// Creates empty files.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an independent copy of the current bytes.
    pub fn snapshot(&self) -> Self {
        Self {
            main: InMemoryBackend::with_data(self.main.data()),
            wal: InMemoryBackend::with_data(self.wal.data()),
        }
    }

    /// Opens a database over the files.
    pub fn open(&self, key: Option<&KeyMaterial>) -> CoreResult<Database> {
        self.open_with(Config::default(), key)
    }

    /// Opens a database over the files with custom configuration.
    pub fn open_with(&self, config: Config, key: Option<&KeyMaterial>) -> CoreResult<Database> {
        Database::open_with_backends(
            config,
            key.map(|k| &k.as_bytes()[..]),
            Box::new(self.main.handle()),
            Box::new(self.wal.handle()),
        )
    }

    /// Opens a database over caller-wrapped backends of the files.
    pub fn open_wrapped<M, W>(
        &self,
        key: Option<&KeyMaterial>,
        wrap_main: M,
        wrap_wal: W,
    ) -> CoreResult<Database>
    where
        M: FnOnce(InMemoryBackend) -> Box<dyn StorageBackend>,
        W: FnOnce(InMemoryBackend) -> Box<dyn StorageBackend>,
    {
        Database::open_with_backends(
            Config::default(),
            key.map(|k| &k.as_bytes()[..]),
            wrap_main(self.main.handle()),
            wrap_wal(self.wal.handle()),
        )
    }

    /// Returns the length of the write-ahead log.
    pub fn wal_len(&self) -> usize {
        self.wal.data().len()
    }
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The key the database was created with, if any.
    pub key: Option<KeyMaterial>,
    path: Option<PathBuf>,
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new unencrypted in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory(None).expect("Failed to open in-memory database"),
            key: None,
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new in-memory test database under a fresh key.
    pub fn encrypted() -> Self {
        let key = KeyMaterial::generate();
        Self {
            db: Database::open_in_memory(Some(key.as_bytes()))
                .expect("Failed to open encrypted in-memory database"),
            key: Some(key),
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test database under a fresh key.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.sealdb");
        let key = KeyMaterial::generate();
        let db = Database::open(&path, Some(key.as_bytes())).expect("Failed to open file database");

        Self {
            db,
            key: Some(key),
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary unencrypted in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary encrypted in-memory database and its key.
pub fn with_encrypted_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &KeyMaterial) -> R,
{
    let test_db = TestDatabase::encrypted();
    let key = test_db.key.as_ref().expect("Encrypted database should have a key");
    f(&test_db.db, key)
}

/// Runs a test with a temporary encrypted file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates in-memory files holding `count` committed notes, one per
    /// transaction, under `key`.
    pub fn populated_files(key: Option<&KeyMaterial>, count: usize) -> MemoryFiles {
        let files = MemoryFiles::new();
        let db = files.open(key).expect("Failed to create database");
        for i in 0..count {
            db.transaction(|txn| txn.add(&Note::new(format!("note {i}"))))
                .expect("Failed to commit note");
        }
        db.close().expect("Failed to close database");
        files
    }

    /// Reads every note, panicking on any error.
    pub fn read_notes(db: &Database) -> Vec<Note> {
        db.all_of::<Note>()
            .collect::<CoreResult<_>>()
            .expect("Failed to read notes")
    }
}
