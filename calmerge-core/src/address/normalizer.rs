//! Cache-first address normalization with a non-caching fallback.

use std::collections::HashMap;

use tracing::debug;

use super::cache::{AddressCache, PrimaryResolved};
use super::cache_key;
use super::fallback::fallback_normalize;
use super::primary::AddressLookup;
use crate::error::CalMergeResult;

/// Which path produced a normalized location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Blank,
    Cached,
    Primary,
    Fallback,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AddressStats {
    pub cached: usize,
    pub primary: usize,
    pub fallback: usize,
    pub memoized: usize,
}

pub struct AddressNormalizer<L> {
    lookup: L,
    cache: Box<dyn AddressCache>,
    memo: HashMap<String, (Option<String>, Resolution)>,
    stats: AddressStats,
}

impl<L: AddressLookup> AddressNormalizer<L> {
    pub fn new(lookup: L, cache: Box<dyn AddressCache>) -> Self {
        AddressNormalizer {
            lookup,
            cache,
            memo: HashMap::new(),
            stats: AddressStats::default(),
        }
    }

    /// Normalize an optional raw location.
    pub async fn normalize(&mut self, raw: Option<&str>) -> Option<String> {
        match raw {
            Some(raw) => self.resolve(raw).await.0,
            None => None,
        }
    }

    /// Resolve one raw location: cache, then primary, then fallback.
    ///
    /// Only a primary success is written to the cache. Results are memoized
    /// for the lifetime of this normalizer, which is one run.
    pub async fn resolve(&mut self, raw: &str) -> (Option<String>, Resolution) {
        let key = cache_key(raw);
        if key.is_empty() {
            return (None, Resolution::Blank);
        }

        if let Some(hit) = self.memo.get(&key) {
            self.stats.memoized += 1;
            return hit.clone();
        }

        let resolved = if let Some(entry) = self.cache.get(&key) {
            self.stats.cached += 1;
            (Some(entry.normalized.clone()), Resolution::Cached)
        } else {
            match self.lookup.lookup(raw.trim()).await {
                Ok(label) => {
                    self.stats.primary += 1;
                    let resolved = PrimaryResolved::new(label);
                    let value = resolved.as_str().to_string();
                    self.cache.insert(key.clone(), resolved);
                    (Some(value), Resolution::Primary)
                }
                Err(e) => {
                    debug!("Primary lookup failed for '{raw}', using fallback: {e}");
                    self.stats.fallback += 1;
                    (fallback_normalize(raw), Resolution::Fallback)
                }
            }
        };

        self.memo.insert(key, resolved.clone());
        resolved
    }

    pub fn stats(&self) -> AddressStats {
        self.stats
    }

    pub fn cache(&self) -> &dyn AddressCache {
        self.cache.as_ref()
    }

    /// Persist the cache.
    pub fn save(&self) -> CalMergeResult<()> {
        self.cache.save()
    }
}
