//! Stable event identity.
//!
//! The identity hash is the primary key of an event across cycles: overrides,
//! suppression lists and the canonical store are all keyed by it.

use chrono::{NaiveDate, NaiveTime};
use md5::{Digest, Md5};

use crate::event::RawEventInstance;

const DELIMITER: &str = "|";

/// `md5(date | time | title [| url])` as lowercase hex.
///
/// Inputs are trimmed and lowercased so trivial formatting differences
/// collapse to one identity. A blank URL is treated as absent.
pub fn identity_hash(
    date: NaiveDate,
    time: Option<NaiveTime>,
    title: &str,
    url: Option<&str>,
) -> String {
    let mut parts = vec![
        date.format("%Y-%m-%d").to_string(),
        time.map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default(),
        normalize(title),
    ];

    if let Some(url) = url.map(normalize).filter(|u| !u.is_empty()) {
        parts.push(url);
    }

    hex::encode(Md5::digest(parts.join(DELIMITER).as_bytes()))
}

/// Identity of a feed instance, from its own URL (before any source fallback URL).
pub fn instance_identity(instance: &RawEventInstance) -> String {
    identity_hash(
        instance.date,
        instance.start_time(),
        &instance.title,
        instance.url.as_deref(),
    )
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
