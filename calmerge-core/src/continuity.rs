//! Continuity tracking across cycles.
//!
//! A single failed or partial fetch must not make events vanish. Events
//! missing from the current cycle are kept while they are dated today or
//! were last confirmed within the grace window.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use tracing::debug;

use crate::event::{CanonicalEvent, SourceType};

/// Per-cycle reconciliation counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ContinuityReport {
    /// New identities.
    pub added: usize,
    /// Seen before and seen again.
    pub confirmed: usize,
    /// Missing this cycle but kept.
    pub retained: usize,
    pub dropped: usize,
}

impl fmt::Display for ContinuityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} confirmed, {} retained, {} dropped",
            self.added, self.confirmed, self.retained, self.dropped
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContinuityTracker {
    grace_days: i64,
}

impl ContinuityTracker {
    pub fn new(grace_days: i64) -> Self {
        ContinuityTracker { grace_days }
    }

    /// Whether a previously seen event that is missing this cycle survives.
    pub fn retains(&self, event: &CanonicalEvent, cycle_date: NaiveDate) -> bool {
        if event.source_type == SourceType::Direct {
            return false;
        }
        if event.date == cycle_date {
            return true;
        }
        (cycle_date - event.last_seen_date).num_days() <= self.grace_days
    }

    /// Union of `current` and the retained part of `previous`, keyed by identity.
    ///
    /// Events in `current` are upserted with `last_seen_date = cycle_date`;
    /// retained events are carried over unchanged.
    pub fn reconcile(
        &self,
        previous: Vec<CanonicalEvent>,
        current: Vec<CanonicalEvent>,
        cycle_date: NaiveDate,
    ) -> (Vec<CanonicalEvent>, ContinuityReport) {
        let mut report = ContinuityReport::default();
        let mut previous: BTreeMap<String, CanonicalEvent> = previous
            .into_iter()
            .map(|e| (e.identity.clone(), e))
            .collect();
        let mut merged: BTreeMap<String, CanonicalEvent> = BTreeMap::new();

        for mut event in current {
            event.last_seen_date = cycle_date;
            if previous.remove(&event.identity).is_some() {
                report.confirmed += 1;
            } else {
                report.added += 1;
            }
            merged.insert(event.identity.clone(), event);
        }

        for (identity, event) in previous {
            if self.retains(&event, cycle_date) {
                debug!("Retaining missing event {event} ({identity})");
                report.retained += 1;
                merged.insert(identity, event);
            } else {
                debug!("Dropping missing event {event} ({identity})");
                report.dropped += 1;
            }
        }

        (merged.into_values().collect(), report)
    }
}
