//! Address normalization.
//!
//! Raw location strings are resolved through a primary lookup service and
//! cached. When the primary fails, a local heuristic cleans the string up,
//! but that result is never cached so it is retried on later cycles.

mod cache;
mod fallback;
mod normalizer;
mod primary;

pub use cache::{AddressCache, AddressCacheEntry, JsonAddressCache, MemoryAddressCache, PrimaryResolved};
pub use fallback::fallback_normalize;
pub use normalizer::{AddressNormalizer, AddressStats, Resolution};
pub use primary::{AddressLookup, GeocodeClient};

/// Cache key for a raw location: trimmed, whitespace collapsed, lowercase.
pub fn cache_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
