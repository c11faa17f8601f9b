//! Directly submitted events (events/<slug>.toml).
//!
//! These have no feed counterpart and no override layer. The file is the
//! whole record; editing it replaces the event wholesale.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::categories::{CategoryPrecedence, resolve_categories};
use crate::event::{CanonicalEvent, EventClock, SourceType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectlySubmittedEvent {
    pub title: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<EventClock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
}

impl DirectlySubmittedEvent {
    /// Build the canonical record. `location` is the already-normalized location.
    pub fn into_canonical(
        self,
        slug: &str,
        location: Option<String>,
        precedence: CategoryPrecedence,
        cycle_date: NaiveDate,
    ) -> CanonicalEvent {
        CanonicalEvent {
            identity: slug.to_string(),
            title: self.title.trim().to_string(),
            date: self.date,
            time: self.time,
            end_date: self.end_date,
            end_time: self.end_time,
            location,
            url: self.url,
            description: self.description,
            categories: resolve_categories(self.categories.as_ref(), &BTreeSet::new(), precedence),
            source_type: SourceType::Direct,
            source_id: None,
            submitted_by: self.submitted_by,
            last_seen_date: cycle_date,
        }
    }
}

/// Load every direct event in `dir`, keyed by slug.
///
/// The slug is the slugified file stem. Malformed files are skipped with a
/// warning; if two files slugify to the same key the first in name order wins.
pub fn load_direct_events(dir: &Path) -> BTreeMap<String, DirectlySubmittedEvent> {
    let mut events = BTreeMap::new();

    if !dir.exists() {
        debug!("No direct events directory at {}", dir.display());
        return events;
    }

    let mut paths: Vec<_> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "toml"))
            .collect(),
        Err(e) => {
            warn!("Could not read events directory {}: {e}", dir.display());
            return events;
        }
    };
    paths.sort();

    for path in paths {
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let slug = slug::slugify(&stem);
        if slug.is_empty() {
            warn!("Skipping direct event with empty slug: {}", path.display());
            continue;
        }

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                toml::from_str::<DirectlySubmittedEvent>(&content).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(event) if event.title.trim().is_empty() => {
                warn!("Skipping direct event {}: empty title", path.display());
            }
            Ok(event) => {
                if events.contains_key(&slug) {
                    warn!("Duplicate direct event slug '{slug}' from {}", path.display());
                    continue;
                }
                events.insert(slug, event);
            }
            Err(e) => warn!("Skipping direct event {}: {e}", path.display()),
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK_CLUB: &str = r#"
title = "Rust Book Club"
date = "2025-04-02"
time = "19:00:00"
end_time = "20:30:00"
location = "Central Library, Arlington, VA"
categories = ["Rust", "books"]
submitted_by = "alex@example.com"
"#;

    #[test]
    fn test_load_direct_events() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Rust Book Club.toml"), BOOK_CLUB).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "title = ").unwrap();
        std::fs::write(dir.path().join("untitled.toml"), "title = \" \"\ndate = \"2025-04-02\"\n")
            .unwrap();

        let events = load_direct_events(dir.path());

        assert_eq!(events.len(), 1);
        let event = &events["rust-book-club"];
        assert_eq!(event.submitted_by.as_deref(), Some("alex@example.com"));
        assert_eq!(
            event.time,
            Some(EventClock::Fixed(NaiveTime::from_hms_opt(19, 0, 0).unwrap()))
        );
    }

    #[test]
    fn test_into_canonical_uses_slug_and_own_categories() {
        let event: DirectlySubmittedEvent = toml::from_str(BOOK_CLUB).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();

        let canonical = event.into_canonical(
            "rust-book-club",
            Some("Arlington, VA".into()),
            CategoryPrecedence::EventFirst,
            today,
        );

        assert_eq!(canonical.identity, "rust-book-club");
        assert_eq!(canonical.source_type, SourceType::Direct);
        assert_eq!(canonical.location.as_deref(), Some("Arlington, VA"));
        assert_eq!(
            canonical.categories,
            BTreeSet::from(["books".to_string(), "rust".to_string()])
        );
        assert!(canonical.source_id.is_none());
        assert_eq!(canonical.last_seen_date, today);
    }

    #[test]
    fn test_missing_categories_resolve_empty() {
        let event: DirectlySubmittedEvent =
            toml::from_str("title = \"Picnic\"\ndate = \"2025-06-01\"\n").unwrap();
        let canonical = event.into_canonical(
            "picnic",
            None,
            CategoryPrecedence::Union,
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
        );
        assert!(canonical.categories.is_empty());
        assert!(canonical.time.is_none());
    }
}
