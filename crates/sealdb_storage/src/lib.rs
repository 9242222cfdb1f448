//! # SealDB Storage
//!
//! Storage backend trait and implementations for SealDB.
//!
//! Backends are **opaque byte stores**: they read and write bytes at
//! offsets and know nothing about pages, encryption or the write-ahead log.
//! The engine in `sealdb_core` owns every byte of the on-disk format and
//! guarantees that only sealed (encrypted or checksummed) frames reach a
//! backend.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests, crash simulation and ephemeral databases
//! - [`FileBackend`] - Persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use sealdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(4, b"page").unwrap();
//! assert_eq!(backend.size().unwrap(), 8);
//! assert_eq!(backend.read_at(4, 4).unwrap(), b"page");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
