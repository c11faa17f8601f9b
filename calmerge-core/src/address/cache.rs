//! Address cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CalMergeResult;
use crate::storage::{read_json_lenient, write_json_atomic};

/// A location label produced by the primary lookup.
///
/// Only the primary path of the normalizer can construct one, and the cache
/// accepts nothing else, so fallback output can never be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryResolved(String);

impl PrimaryResolved {
    pub(super) fn new(label: String) -> Self {
        PrimaryResolved(label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCacheEntry {
    pub normalized: String,
    pub cached_at: DateTime<Utc>,
}

/// Normalized-key to primary-result store.
pub trait AddressCache: Send {
    fn get(&self, key: &str) -> Option<&AddressCacheEntry>;

    fn insert(&mut self, key: String, resolved: PrimaryResolved);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist pending changes.
    fn save(&self) -> CalMergeResult<()>;
}

fn entry(resolved: PrimaryResolved) -> AddressCacheEntry {
    AddressCacheEntry {
        normalized: resolved.0,
        cached_at: Utc::now(),
    }
}

/// In-memory cache, nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryAddressCache {
    entries: BTreeMap<String, AddressCacheEntry>,
}

impl MemoryAddressCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AddressCache for MemoryAddressCache {
    fn get(&self, key: &str) -> Option<&AddressCacheEntry> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, resolved: PrimaryResolved) {
        self.entries.insert(key, entry(resolved));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn save(&self) -> CalMergeResult<()> {
        Ok(())
    }
}

/// JSON file cache, replaced atomically on save.
#[derive(Debug)]
pub struct JsonAddressCache {
    path: PathBuf,
    entries: BTreeMap<String, AddressCacheEntry>,
    dirty: bool,
}

impl JsonAddressCache {
    /// Load the cache at `path`. A missing or unreadable file starts empty.
    pub fn load(path: &Path) -> Self {
        let entries: BTreeMap<String, AddressCacheEntry> =
            read_json_lenient(path).unwrap_or_default();
        debug!("Loaded {} cached addresses from {}", entries.len(), path.display());

        JsonAddressCache {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        }
    }
}

impl AddressCache for JsonAddressCache {
    fn get(&self, key: &str) -> Option<&AddressCacheEntry> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, resolved: PrimaryResolved) {
        self.entries.insert(key, entry(resolved));
        self.dirty = true;
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn save(&self) -> CalMergeResult<()> {
        if !self.dirty && self.path.exists() {
            return Ok(());
        }
        write_json_atomic(&self.path, &self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("address_cache.json");

        let mut cache = JsonAddressCache::load(&path);
        assert!(cache.is_empty());
        cache.insert(
            "1234 some st, arlington, va".into(),
            PrimaryResolved::new("1234 Some St, Arlington, VA".into()),
        );
        cache.save().unwrap();

        let reloaded = JsonAddressCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.get("1234 some st, arlington, va").map(|e| e.normalized.as_str()),
            Some("1234 Some St, Arlington, VA")
        );
    }

    #[test]
    fn test_unreadable_cache_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("address_cache.json");
        std::fs::write(&path, "[1, 2").unwrap();

        assert!(JsonAddressCache::load(&path).is_empty());
    }
}
