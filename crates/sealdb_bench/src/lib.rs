//! Benchmark utilities.

use rand::Rng;
use sealdb_core::Object;
use serde::{Deserialize, Serialize};

/// Object type stored by the database benchmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Object for Record {
    const CLASS_NAME: &'static str = "Record";
}

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate records with the specified payload size.
pub fn generate_records(count: usize, payload_size: usize) -> Vec<Record> {
    (0..count)
        .map(|_| Record {
            payload: random_data(payload_size),
        })
        .collect()
}
