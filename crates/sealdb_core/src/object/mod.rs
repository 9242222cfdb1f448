//! Typed objects stored in per-class page chains.
//!
//! Each class named by [`Object::CLASS_NAME`] owns a chain of data pages
//! listed in the metadata catalog. Objects are appended to the end of the
//! chain inside a write transaction and read back in insertion order.

mod chain;
mod codec;
mod store;

pub use codec::Object;
pub use store::{ObjectStore, Objects};
