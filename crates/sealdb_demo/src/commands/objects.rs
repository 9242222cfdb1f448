//! Adding and listing sample objects.

use super::EncryptionObject;
use sealdb_core::{CoreResult, Database};

/// Adds one object in its own transaction.
///
/// # Errors
///
/// Returns an error if the commit fails.
pub fn add(db: &Database, text: &str) -> CoreResult<()> {
    db.transaction(|txn| {
        txn.add(&EncryptionObject {
            string_prop: text.to_string(),
        })
    })
}

/// Returns the text of every stored object, oldest first.
///
/// # Errors
///
/// Returns an error if a page is corrupt or an object fails to decode.
pub fn list(db: &Database) -> CoreResult<Vec<String>> {
    db.all_of::<EncryptionObject>()
        .map(|object| object.map(|o| o.string_prop))
        .collect()
}
