//! SealDB encryption demo
//!
//! Opens an encrypted database with a key taken from a key file or the OS
//! keychain, and shows what happens with the wrong key or none.
//!
//! # Commands
//!
//! - `run` - Write an object, then reopen with a wrong key, no key and the
//!   right key (the default)
//! - `add` - Add an object
//! - `list` - List stored objects
//! - `inspect` - Display database statistics

mod commands;
mod key_provider;

use clap::{Parser, Subcommand};
use key_provider::{FileKeyProvider, KeyProvider, KeychainProvider};
use sealdb_core::{Database, KeyMaterial};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Keychain service and account naming the demo's key.
const KEY_IDENTIFIER: &str = "io.sealdb.EncryptionExampleKey";

/// SealDB encrypted database demo.
#[derive(Parser)]
#[command(name = "sealdb-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long, default_value = "encrypted.sealdb")]
    path: PathBuf,

    /// Key file (base64); created with a fresh key if missing.
    /// Defaults to `<path>.key`
    #[arg(global = true, short, long, conflicts_with = "keychain")]
    key_file: Option<PathBuf>,

    /// Keep the key in the OS keychain instead of a file
    #[arg(global = true, long)]
    keychain: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an object, then reopen with a wrong key, no key and the right key
    Run,

    /// Add an object
    Add {
        /// Text to store
        text: String,
    },

    /// List stored objects
    List,

    /// Display database statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn load_key(cli: &Cli) -> Result<KeyMaterial, key_provider::KeyProviderError> {
    if cli.keychain {
        return KeychainProvider::new(KEY_IDENTIFIER).get_or_create_key(KEY_IDENTIFIER);
    }
    let path = cli
        .key_file
        .clone()
        .unwrap_or_else(|| default_key_file(&cli.path));
    FileKeyProvider::new(path).get_or_create_key(KEY_IDENTIFIER)
}

fn default_key_file(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".key");
    PathBuf::from(name)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let key = load_key(&cli)?;

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => {
            for line in commands::sample::run(&cli.path, &key)? {
                println!("{line}");
            }
        }
        Commands::Add { text } => {
            let db = Database::open(&cli.path, Some(key.as_bytes()))?;
            commands::objects::add(&db, text)?;
            db.close()?;
        }
        Commands::List => {
            let db = Database::open_read_only(&cli.path, Some(key.as_bytes()))?;
            for text in commands::objects::list(&db)? {
                println!("{text}");
            }
        }
        Commands::Inspect { format } => {
            let db = Database::open_read_only(&cli.path, Some(key.as_bytes()))?;
            commands::inspect::run(&db, &cli.path, format)?;
        }
    }

    Ok(())
}
