//! Ephemeral, synchronous per-document position cache.
//!
//! This is the write buffer for high-frequency position updates. It is never
//! migrated and never authoritative once the durable store has answered for
//! a document.

pub mod backend;

pub use backend::{CacheBackend, FileBackend, MemoryBackend};

use crate::connection::StoreConfig;
use crate::connection::config::DEFAULT_CACHE_KEY_PREFIX;
use log::warn;
use std::sync::Mutex;

pub struct PositionCache {
    prefix: String,
    backend: Mutex<Box<dyn CacheBackend>>,
}

impl PositionCache {
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self::with_prefix(backend, DEFAULT_CACHE_KEY_PREFIX)
    }

    pub fn with_prefix(backend: impl CacheBackend + 'static, prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            backend: Mutex::new(Box::new(backend)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// File-backed cache at `config.cache_path()`.
    pub fn for_config(config: &StoreConfig) -> Self {
        Self::with_prefix(FileBackend::open(config.cache_path()), &config.cache_key_prefix)
    }

    fn key(&self, document_id: &str) -> String {
        format!("{}{}", self.prefix, document_id)
    }

    /// Overwrites the cached position. A backend failure is logged; the
    /// caller's in-memory position still holds the value.
    pub fn set(&self, document_id: &str, position_index: u64) {
        let key = self.key(document_id);
        let result = match self.backend.lock() {
            Ok(mut backend) => backend.set_item(&key, &position_index.to_string()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            warn!("Could not cache position for '{}': {}", document_id, err);
        }
    }

    /// Cached position, if one is stored and readable.
    pub fn lookup(&self, document_id: &str) -> Option<u64> {
        let key = self.key(document_id);
        let raw = match self.backend.lock() {
            Ok(backend) => backend.get_item(&key)?,
            Err(err) => {
                warn!("Position cache unavailable: {}", err);
                return None;
            }
        };
        match raw.trim().parse() {
            Ok(position) => Some(position),
            Err(_) => {
                warn!("Ignoring unreadable cached position '{}' for '{}'", raw, document_id);
                None
            }
        }
    }

    /// Cached position; no entry means the start of the document.
    pub fn get(&self, document_id: &str) -> u64 {
        self.lookup(document_id).unwrap_or(0)
    }

    pub fn clear(&self, document_id: &str) {
        let key = self.key(document_id);
        let result = match self.backend.lock() {
            Ok(mut backend) => backend.remove_item(&key),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            warn!("Could not clear cached position for '{}': {}", document_id, err);
        }
    }

    /// Documents that currently have a cached position.
    pub fn documents(&self) -> Vec<String> {
        match self.backend.lock() {
            Ok(backend) => backend
                .keys()
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_entry_reads_as_zero() {
        let cache = PositionCache::in_memory();
        assert_eq!(cache.lookup("alice"), None);
        assert_eq!(cache.get("alice"), 0);
    }

    #[test]
    fn test_set_overwrites_and_clear_removes() {
        let cache = PositionCache::in_memory();
        cache.set("alice", 4);
        cache.set("alice", 2);
        assert_eq!(cache.get("alice"), 2);
        cache.clear("alice");
        assert_eq!(cache.lookup("alice"), None);
    }

    #[test]
    fn test_garbage_entry_reads_as_absent() {
        let mut backend = MemoryBackend::new();
        backend.set_item("readit-progress-alice", "twelve").unwrap();
        let cache = PositionCache::new(backend);
        assert_eq!(cache.lookup("alice"), None);
        assert_eq!(cache.get("alice"), 0);
    }

    #[test]
    fn test_documents_strips_prefix() {
        let mut backend = MemoryBackend::new();
        backend.set_item("theme", "dark").unwrap();
        let cache = PositionCache::new(backend);
        cache.set("alice", 1);
        assert_eq!(cache.documents(), vec!["alice".to_string()]);
    }
}
