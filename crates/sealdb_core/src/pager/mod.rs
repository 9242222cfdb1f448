//! Page-level access to the main database file.
//!
//! ## File Layout
//!
//! ```text
//! offset 0      | preamble (64, plaintext) | sealed metadata frame (4032) |
//! offset 4096   | sealed data page 1 (4096)                               |
//! offset 8192   | sealed data page 2 (4096)                               |
//! ...
//! ```
//!
//! Every block except the preamble is a [`PageCipher`](crate::crypto::PageCipher)
//! frame, so a data page carries [`PAGE_PAYLOAD_SIZE`] bytes of plaintext.

mod cache;
mod file;
mod header;
mod meta;

pub use file::EncryptedFile;
pub use header::{Preamble, FILE_MAGIC, FORMAT_VERSION, PREAMBLE_SIZE};
pub use meta::{ClassChain, Metadata};

use crate::crypto::FRAME_OVERHEAD;
use crate::error::CoreResult;
use crate::types::PageNumber;

/// Physical size of every page.
pub const PAGE_SIZE: usize = 4096;

/// Plaintext bytes available in a data page.
pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - FRAME_OVERHEAD;

/// Size of the sealed frame that follows the preamble in page 0.
pub const META_FRAME_SIZE: usize = PAGE_SIZE - PREAMBLE_SIZE;

/// Plaintext bytes available in the sealed part of page 0.
pub const META_PAYLOAD_SIZE: usize = META_FRAME_SIZE - FRAME_OVERHEAD;

/// Marker at the start of the sealed metadata. Decrypting it proves the key.
pub const VERIFY_MARKER: [u8; 16] = *b"SealDB-verified!";

/// Read access to decrypted data pages and the class catalog.
///
/// Implemented by [`EncryptedFile`] for the committed state and by
/// [`WriteTransaction`](crate::transaction::WriteTransaction) for the
/// state including that transaction's own writes.
pub trait PageSource {
    /// Returns the [`PAGE_PAYLOAD_SIZE`]-byte plaintext of a data page.
    ///
    /// # Errors
    ///
    /// Returns an error if the page is out of range, unreadable or corrupt.
    fn read_page(&self, page: PageNumber) -> CoreResult<Vec<u8>>;

    /// Returns the page chain of an object class, if it has one.
    fn class_chain(&self, class: &str) -> Option<ClassChain>;

    /// Returns every class in the catalog with its chain.
    fn classes(&self) -> Vec<(String, ClassChain)>;
}
