//! Demo command implementations.

pub mod inspect;
pub mod objects;
pub mod sample;

use sealdb_core::Object;
use serde::{Deserialize, Serialize};

/// The object type stored by the sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionObject {
    /// Free text.
    #[serde(rename = "stringProp")]
    pub string_prop: String,
}

impl Object for EncryptionObject {
    const CLASS_NAME: &'static str = "EncryptionObject";
}
