//! Crash recovery testing for SealDB.
//!
//! [`CrashableBackend`] wraps another backend and stops writing after a
//! configured number of bytes, leaving a torn prefix behind exactly as a
//! power cut would. Once it has crashed every further write, sync and
//! truncate fails, so the engine can't clean up after itself.
//!
//! ## Test Strategy
//!
//! 1. **Crash while logging** - the commit record never becomes durable,
//!    reopening must show the pre-transaction state
//! 2. **Crash while applying** - the log is durable, reopening must show
//!    the post-transaction state
//! 3. **Failed sync** - either state is acceptable, a mix never is
//!
//! ## Usage
//!
//! ```rust
//! use sealdb_testkit::crash::CrashableBackend;
//! use sealdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
//! let switch = backend.switch();
//! switch.crash_after(4);
//! assert!(backend.append(b"torn write").is_err());
//! assert!(switch.has_crashed());
//! assert_eq!(backend.size().unwrap(), 4);
//! ```

use sealdb_storage::{StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl Default for CrashState {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }
}

/// Remote control for a [`CrashableBackend`] that has been handed to a
/// database.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

impl CrashSwitch {
    /// Lets `bytes` more bytes through, then crashes.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        self.state
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail (and crash the backend).
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.state
            .crash_after_bytes
            .store(usize::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Returns the number of bytes written through the backend.
    pub fn bytes_written(&self) -> usize {
        self.state.bytes_written.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState::default()),
        }
    }

    /// Returns a switch controlling this backend.
    pub fn switch(&self) -> CrashSwitch {
        CrashSwitch {
            state: Arc::clone(&self.state),
        }
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }

    fn check_alive(&self, what: &str) -> StorageResult<()> {
        if self.state.crashed.load(Ordering::SeqCst) {
            return Err(self.crash(what));
        }
        Ok(())
    }

    /// Returns how many of `len` bytes may be written before the crash
    /// point, recording them as written.
    fn admit(&self, len: usize) -> usize {
        let current = self.state.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);
        threshold.saturating_sub(current).min(len)
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check_alive("write")?;
        let allowed = self.admit(data.len());
        if allowed < data.len() {
            if allowed > 0 {
                let _ = self.inner.write_at(offset, &data[..allowed]);
            }
            return Err(self.crash("partial write"));
        }
        self.inner.write_at(offset, data)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_alive("append")?;
        let allowed = self.admit(data.len());
        if allowed < data.len() {
            if allowed > 0 {
                let _ = self.inner.append(&data[..allowed]);
            }
            return Err(self.crash("partial append"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive("flush")?;
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive("sync")?;
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive("truncate")?;
        self.inner.truncate(new_size)
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
