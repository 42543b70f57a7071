use crate::migration::LATEST_SCHEMA_VERSION;
use crate::storage::DurabilityMode;
use log::warn;
use std::path::PathBuf;

pub const DEFAULT_DATABASE: &str = "readit-db";
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "readit-progress-";

pub const DATA_DIR_ENV: &str = "READMARK_DATA_DIR";
pub const DURABILITY_ENV: &str = "READMARK_DURABILITY";

/// Store configuration
///
/// Built with chained setters:
///
/// ```
/// use readmark::{DurabilityMode, StoreConfig};
///
/// let config = StoreConfig::new("/tmp/readmark")
///     .database("library")
///     .durability(DurabilityMode::Sync)
///     .checkpoint_threshold(200);
/// assert_eq!(config.snapshot_path().file_name().unwrap(), "library.snapshot");
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the snapshot, WAL and session cache files
    pub data_dir: PathBuf,

    /// Database name, used as the file stem
    pub database: String,

    /// Schema version to open the store at
    pub schema_version: u32,

    pub durability: DurabilityMode,

    /// Committed transactions between automatic checkpoints
    pub checkpoint_threshold: usize,

    /// Prefix of the ephemeral cache keys
    pub cache_key_prefix: String,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database: DEFAULT_DATABASE.to_string(),
            schema_version: LATEST_SCHEMA_VERSION,
            durability: DurabilityMode::default(),
            checkpoint_threshold: 1000,
            cache_key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self::new(PathBuf::new()).durability(DurabilityMode::None)
    }

    /// Defaults to `./.readmark`, overridden by `READMARK_DATA_DIR` and
    /// `READMARK_DURABILITY`.
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".readmark"));
        let mut config = Self::new(data_dir);
        if let Ok(raw) = std::env::var(DURABILITY_ENV) {
            match raw.parse() {
                Ok(mode) => config.durability = mode,
                Err(err) => warn!("Ignoring {}: {}", DURABILITY_ENV, err),
            }
        }
        config
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn cache_key_prefix(mut self, prefix: &str) -> Self {
        self.cache_key_prefix = prefix.to_string();
        self
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.snapshot", self.database))
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.wal", self.database))
    }

    /// File behind the file-backed session cache.
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.session.json", self.database))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
