//! Database configuration.

/// Default number of decrypted pages kept in memory per handle.
pub const DEFAULT_PAGE_CACHE_CAPACITY: usize = 256;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database already exists.
    pub error_if_exists: bool,

    /// Open without write access. Read-only handles take a shared lock and
    /// never run recovery writes.
    pub read_only: bool,

    /// Whether to fsync the WAL and the main file on every commit.
    pub sync_on_commit: bool,

    /// Maximum number of decrypted pages cached per handle (0 disables caching).
    pub page_cache_capacity: usize,

    /// Format version to use for new databases.
    pub format_version: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            read_only: false,
            sync_on_commit: true,
            page_cache_capacity: DEFAULT_PAGE_CACHE_CAPACITY,
            format_version: 1,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to open the database read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the page cache capacity.
    #[must_use]
    pub const fn page_cache_capacity(mut self, pages: usize) -> Self {
        self.page_cache_capacity = pages;
        self
    }

    /// Sets the format version written into new databases.
    #[must_use]
    pub const fn format_version(mut self, version: u16) -> Self {
        self.format_version = version;
        self
    }
}
