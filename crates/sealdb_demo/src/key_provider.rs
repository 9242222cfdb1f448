//! Sources of database key material.
//!
//! The engine never stores keys. A provider hands back the same 64-byte
//! key for an identifier every time, generating and persisting a fresh one
//! the first time it's asked.

use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use sealdb_core::{KeyMaterial, KEY_SIZE};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors returned by key providers.
#[derive(Debug, Error)]
pub enum KeyProviderError {
    /// The OS credential store failed.
    #[error("keyring error: {0}")]
    Keyring(String),

    /// A stored key could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Reading or writing a key file failed.
    #[error("key file error: {0}")]
    Io(#[from] io::Error),
}

/// Provides the key for a database, creating it on first use.
pub trait KeyProvider: Send + Sync {
    /// Returns the key stored under `identifier`, generating and storing a
    /// new one if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store can't be read or written, or
    /// holds something that isn't a 64-byte key.
    fn get_or_create_key(&self, identifier: &str) -> Result<KeyMaterial, KeyProviderError>;
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryKeyProvider {
    keys: Mutex<HashMap<String, KeyMaterial>>,
}

impl InMemoryKeyProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyProvider for InMemoryKeyProvider {
    fn get_or_create_key(&self, identifier: &str) -> Result<KeyMaterial, KeyProviderError> {
        Ok(self
            .keys
            .lock()
            .entry(identifier.to_string())
            .or_insert_with(KeyMaterial::generate)
            .clone())
    }
}

/// Keeps the key base64-encoded in a file.
///
/// The file holds a single key, so the identifier only shows up in logs.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    /// Creates a provider backed by the key file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the key file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_new(&self, key: &KeyMaterial) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(encode_key(key).as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()
    }
}

impl KeyProvider for FileKeyProvider {
    fn get_or_create_key(&self, identifier: &str) -> Result<KeyMaterial, KeyProviderError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => decode_key(contents.trim()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let key = KeyMaterial::generate();
                self.write_new(&key)?;
                info!(identifier, path = %self.path.display(), "generated new key file");
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// OS keychain-backed provider using the `keyring` crate.
///
/// The identifier is the keychain account; the service is fixed per
/// provider.
#[derive(Debug, Clone)]
pub struct KeychainProvider {
    service: String,
}

impl KeychainProvider {
    /// Creates a provider storing keys under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl KeyProvider for KeychainProvider {
    fn get_or_create_key(&self, identifier: &str) -> Result<KeyMaterial, KeyProviderError> {
        let entry = keyring::Entry::new(&self.service, identifier)
            .map_err(|e| KeyProviderError::Keyring(e.to_string()))?;

        match entry.get_password() {
            Ok(secret) => decode_key(&secret),
            Err(keyring::Error::NoEntry) => {
                let key = KeyMaterial::generate();
                entry
                    .set_password(&encode_key(&key))
                    .map_err(|e| KeyProviderError::Keyring(e.to_string()))?;
                info!(identifier, service = %self.service, "stored new key in keychain");
                Ok(key)
            }
            Err(e) => Err(KeyProviderError::Keyring(e.to_string())),
        }
    }
}

fn encode_key(key: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(key.as_bytes())
}

fn decode_key(secret: &str) -> Result<KeyMaterial, KeyProviderError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyProviderError::Decode(e.to_string()))?;
    if bytes.len() != KEY_SIZE {
        return Err(KeyProviderError::Decode(format!(
            "expected {KEY_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    KeyMaterial::from_bytes(&bytes).map_err(|e| KeyProviderError::Decode(e.to_string()))
}
