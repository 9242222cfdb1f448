//! Transaction management.
//!
//! One write transaction at a time per handle; commits are atomic through
//! the write-ahead log.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{TransactionState, WriteTransaction};
