//! Category resolution.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How event-level and source-level categories combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryPrecedence {
    /// Event/override categories replace the source's entirely.
    #[default]
    EventFirst,
    /// Event and source categories are combined.
    Union,
}

/// Resolve the categories of one event.
///
/// Tiers: explicit event/override categories, else inherited source
/// categories, else empty. `explicit` is `None` when nothing set categories on
/// the event; an explicitly empty set still counts as set.
pub fn resolve_categories(
    explicit: Option<&BTreeSet<String>>,
    inherited: &BTreeSet<String>,
    precedence: CategoryPrecedence,
) -> BTreeSet<String> {
    let explicit = explicit.map(clean);
    let inherited = clean(inherited);

    match (precedence, explicit) {
        (CategoryPrecedence::EventFirst, Some(explicit)) => explicit,
        (CategoryPrecedence::Union, Some(explicit)) => explicit.union(&inherited).cloned().collect(),
        (_, None) => inherited,
    }
}

/// Trimmed, lowercase, non-empty tags.
fn clean(tags: &BTreeSet<String>) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
