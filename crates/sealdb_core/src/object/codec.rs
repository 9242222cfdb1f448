//! Object codec trait.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for types that can be stored in the object store.
///
/// Objects are serialized with serde into CBOR. `CLASS_NAME` names the page
/// chain the objects live in, so two types sharing a name share a chain and
/// must agree on their encoding.
///
/// # Example
///
/// ```rust
/// use sealdb_core::Object;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Note {
///     #[serde(rename = "stringProp")]
///     text: String,
/// }
///
/// impl Object for Note {
///     const CLASS_NAME: &'static str = "Note";
/// }
/// ```
pub trait Object: Serialize + DeserializeOwned {
    /// Name of the class chain holding objects of this type.
    const CLASS_NAME: &'static str;
}

pub(crate) fn encode_object<T: Object>(object: &T) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(object, &mut bytes)
        .map_err(|e| CoreError::codec(format!("encoding {}: {e}", T::CLASS_NAME)))?;
    Ok(bytes)
}

pub(crate) fn decode_object<T: Object>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| CoreError::codec(format!("decoding {}: {e}", T::CLASS_NAME)))
}
