//! The encryption walkthrough: write under a key, fail to open with the
//! wrong key or none, then read back with the right one.

use super::EncryptionObject;
use sealdb_core::{CoreResult, Database, KeyMaterial};
use std::path::Path;
use tracing::info;

/// A well-formed 64-byte key that didn't create the file.
const WRONG_KEY: &[u8; 64] = b"1234567890123456789012345678901234567890123456789012345678901234";

/// Runs the walkthrough against `path`, returning the lines it reports.
///
/// # Errors
///
/// Returns an error if opening with the right key or writing fails.
pub fn run(path: &Path, key: &KeyMaterial) -> CoreResult<Vec<String>> {
    let mut log = Vec::new();

    let db = Database::open(path, Some(key.as_bytes()))?;
    db.transaction(|txn| {
        txn.add(&EncryptionObject {
            string_prop: "abcd".to_string(),
        })
    })?;
    db.close()?;
    info!(path = %path.display(), "wrote sample object");

    log.push(match Database::open(path, Some(WRONG_KEY)) {
        Ok(_) => "Open with wrong key: unexpectedly succeeded".to_string(),
        Err(e) => format!("Open with wrong key: {e}"),
    });

    log.push(match Database::open(path, None) {
        Ok(_) => "Open with no key: unexpectedly succeeded".to_string(),
        Err(e) => format!("Open with no key: {e}"),
    });

    let db = Database::open(path, Some(key.as_bytes()))?;
    match db.first::<EncryptionObject>()? {
        Some(object) => log.push(format!("Saved object: {}", object.string_prop)),
        None => log.push("Saved object: none".to_string()),
    }
    db.close()?;

    Ok(log)
}
