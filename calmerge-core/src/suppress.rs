//! Suppression and de-duplication of feed instances.

use std::collections::HashSet;

use tracing::debug;

use crate::config::Source;
use crate::event::{CanonicalEvent, RawEventInstance};
use crate::identity::instance_identity;

/// A feed instance together with its identity hash.
#[derive(Debug, Clone)]
pub struct IdentifiedInstance {
    pub identity: String,
    pub instance: RawEventInstance,
}

/// Whether `source` suppresses this instance, by identity or by its URL.
///
/// Suppression entries that match nothing are simply never hit.
pub fn is_suppressed(source: &Source, identity: &str, instance: &RawEventInstance) -> bool {
    suppresses(source, identity, instance.url.as_deref())
}

/// Whether a stored event has since been suppressed by its source.
///
/// Applied to the previous cycle's events so a newly suppressed event is
/// removed at once rather than riding out the grace window.
pub fn is_stored_suppressed(source: &Source, event: &CanonicalEvent) -> bool {
    suppresses(source, &event.identity, event.url.as_deref())
}

fn suppresses(source: &Source, identity: &str, url: Option<&str>) -> bool {
    if source.suppress_guid.contains(identity) {
        return true;
    }

    match url.map(str::trim) {
        Some(url) if !url.is_empty() => source.suppress_urls.iter().any(|s| s.trim() == url),
        _ => false,
    }
}

/// Counts from one suppression pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SuppressionStats {
    pub suppressed: usize,
    pub duplicates: usize,
}

/// Assign identities, drop suppressed instances and collapse duplicates.
///
/// The first instance seen for an identity wins.
pub fn identify_and_filter(
    source: &Source,
    instances: Vec<RawEventInstance>,
    seen: &mut HashSet<String>,
) -> (Vec<IdentifiedInstance>, SuppressionStats) {
    let mut stats = SuppressionStats::default();
    let mut kept = Vec::with_capacity(instances.len());

    for instance in instances {
        let identity = instance_identity(&instance);

        if is_suppressed(source, &identity, &instance) {
            debug!("Suppressed '{}' ({identity}) from '{}'", instance.title, source.id);
            stats.suppressed += 1;
            continue;
        }

        if !seen.insert(identity.clone()) {
            debug!("Duplicate '{}' ({identity}) from '{}'", instance.title, source.id);
            stats.duplicates += 1;
            continue;
        }

        kept.push(IdentifiedInstance { identity, instance });
    }

    (kept, stats)
}
