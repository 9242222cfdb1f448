//! # SealDB Core
//!
//! Encrypted page storage engine for SealDB.
//!
//! This crate provides:
//! - Page encryption with AES-256-GCM under a key derived from 64 bytes of
//!   caller-held key material
//! - Key verification at open time through a sealed marker in page 0
//! - Write-ahead logged, all-or-nothing commits with crash recovery
//! - A small object store keeping serde types in per-class page chains
//!
//! ## Usage
//!
//! ```rust
//! use sealdb_core::{CoreError, Database, KeyMaterial, Object};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Note {
//!     #[serde(rename = "stringProp")]
//!     text: String,
//! }
//!
//! impl Object for Note {
//!     const CLASS_NAME: &'static str = "Note";
//! }
//!
//! let key = KeyMaterial::generate();
//! let db = Database::open_in_memory(Some(key.as_bytes())).unwrap();
//!
//! let mut txn = db.begin().unwrap();
//! txn.add(&Note { text: "abcd".into() }).unwrap();
//! assert!(matches!(db.begin(), Err(CoreError::TransactionInProgress)));
//! db.commit(&mut txn).unwrap();
//! drop(txn);
//!
//! assert_eq!(db.count::<Note>(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod crypto;
mod database;
mod error;
mod lock;
pub mod object;
pub mod pager;
pub mod transaction;
mod types;
pub mod wal;

pub use config::{Config, DEFAULT_PAGE_CACHE_CAPACITY};
pub use crypto::{KeyMaterial, KeyMode, PageCipher, KEY_SIZE};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use lock::{lock_path, wal_path, FileLock};
pub use object::{Object, ObjectStore, Objects};
pub use pager::{EncryptedFile, PageSource, PAGE_PAYLOAD_SIZE, PAGE_SIZE};
pub use transaction::{TransactionManager, TransactionState, WriteTransaction};
pub use types::{PageNumber, TransactionId};
