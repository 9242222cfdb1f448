//! Inspect command implementation.

use sealdb_core::{lock_path, wal_path, Database};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Whether the file is encrypted.
    pub encrypted: bool,
    /// Main file size in bytes.
    pub file_size: u64,
    /// WAL size in bytes; non-zero only after an interrupted commit.
    pub wal_size: u64,
    /// Number of pages including page 0.
    pub page_count: u64,
    /// Last committed transaction.
    pub last_txid: u64,
    /// Object classes.
    pub classes: Vec<ClassStats>,
}

/// Statistics for a single object class.
#[derive(Debug, Serialize)]
pub struct ClassStats {
    /// Class name.
    pub name: String,
    /// Number of objects.
    pub count: u64,
}

/// Collects statistics from an open database.
///
/// # Errors
///
/// Returns an error if the file sizes can't be read.
pub fn collect(db: &Database, path: &Path) -> std::io::Result<InspectResult> {
    let wal = wal_path(path);
    Ok(InspectResult {
        path: path.display().to_string(),
        encrypted: db.is_encrypted(),
        file_size: std::fs::metadata(path)?.len(),
        wal_size: if wal.exists() {
            std::fs::metadata(&wal)?.len()
        } else {
            0
        },
        page_count: db.page_count(),
        last_txid: db.last_txid().as_u64(),
        classes: db
            .classes()
            .into_iter()
            .map(|(name, count)| ClassStats { name, count })
            .collect(),
    })
}

/// Runs the inspect command.
pub fn run(db: &Database, path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(db, path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => {
            println!("Database: {}", result.path);
            println!("Encrypted: {}", result.encrypted);
            println!("File size: {} bytes", result.file_size);
            println!("WAL size: {} bytes", result.wal_size);
            println!("Lock file: {}", lock_path(path).display());
            println!("Pages: {}", result.page_count);
            println!("Last transaction: {}", result.last_txid);
            for class in &result.classes {
                println!("  {}: {} objects", class.name, class.count);
            }
        }
        other => return Err(format!("unknown format: {other}").into()),
    }
    Ok(())
}
