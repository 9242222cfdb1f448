//! Property-based test generators using proptest.

use crate::fixtures::Note;
use proptest::prelude::*;
use sealdb_core::{KeyMaterial, KEY_SIZE, PAGE_PAYLOAD_SIZE};

/// Strategy for generating key material.
pub fn key_strategy() -> impl Strategy<Value = KeyMaterial> {
    prop::collection::vec(any::<u8>(), KEY_SIZE)
        .prop_map(|bytes| KeyMaterial::from_bytes(&bytes).expect("Generated key has the right size"))
}

/// Strategy for generating pairs of distinct keys.
pub fn distinct_keys_strategy() -> impl Strategy<Value = (KeyMaterial, KeyMaterial)> {
    (key_strategy(), key_strategy()).prop_filter("keys must differ", |(a, b)| {
        a.as_bytes() != b.as_bytes()
    })
}

/// Strategy for generating raw page contents up to a full page.
pub fn page_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=PAGE_PAYLOAD_SIZE)
}

/// Strategy for generating notes, including some that span pages.
pub fn note_strategy() -> impl Strategy<Value = Note> {
    prop_oneof![
        8 => "[a-zA-Z0-9 ]{0,64}",
        1 => prop::string::string_regex("[a-z]{4000,9000}").expect("Invalid regex"),
    ]
    .prop_map(Note::new)
}

/// Strategy for generating a batch of transactions, each a list of notes.
pub fn transactions_strategy(max_txns: usize) -> impl Strategy<Value = Vec<Vec<Note>>> {
    prop::collection::vec(prop::collection::vec(note_strategy(), 1..6), 1..=max_txns)
}
