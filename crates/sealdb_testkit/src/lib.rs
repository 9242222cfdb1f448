//! # SealDB Testkit
//!
//! Test utilities for SealDB.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - A storage backend that simulates crashes mid-write
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use sealdb_testkit::prelude::*;
//!
//! with_encrypted_db(|db, _key| {
//!     db.transaction(|txn| txn.add(&Note::new("abcd"))).unwrap();
//!     assert_eq!(db.count::<Note>(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
