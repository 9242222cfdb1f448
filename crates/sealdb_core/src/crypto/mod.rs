//! Page encryption for SealDB.
//!
//! ## Security Model
//!
//! - Callers supply a 512-bit [`KeyMaterial`]; it is never written to disk
//! - The AES-256-GCM page key is derived from it with HKDF-SHA256, salted
//!   with the file's random 16-byte id
//! - Every sealed frame carries a fresh random nonce
//! - The page number and file id are authenticated as associated data, so a
//!   frame only opens at the position and in the file it was written for
//! - Files created without a key still carry a SHA-256 based tag per page so
//!   corruption is detected in both modes
//!
//! ## Frame Layout
//!
//! ```text
//! | nonce (12) | body (N) | tag (16) |
//! ```

mod cipher;
mod key;

pub use cipher::{KeyMode, PageCipher, FILE_ID_SIZE, FRAME_OVERHEAD, NONCE_SIZE, TAG_SIZE};
pub use key::{KeyMaterial, KEY_SIZE};
