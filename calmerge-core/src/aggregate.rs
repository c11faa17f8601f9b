//! Ordering of the final collection.

use crate::event::CanonicalEvent;

/// Sort by date, then start time (all-day first), title and identity.
pub fn assemble(mut events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    events.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.start_time().cmp(&b.start_time()))
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.identity.cmp(&b.identity))
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::BTreeSet;

    use crate::event::{EventClock, SourceType};

    fn event(identity: &str, day: u32, hour: Option<u32>, title: &str) -> CanonicalEvent {
        CanonicalEvent {
            identity: identity.into(),
            title: title.into(),
            date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            time: hour.map(|h| EventClock::Fixed(NaiveTime::from_hms_opt(h, 0, 0).unwrap())),
            end_date: None,
            end_time: None,
            location: None,
            url: None,
            description: None,
            categories: BTreeSet::new(),
            source_type: SourceType::Feed,
            source_id: None,
            submitted_by: None,
            last_seen_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        }
    }

    #[test]
    fn test_assemble_order() {
        let sorted = assemble(vec![
            event("e", 21, Some(9), "Breakfast"),
            event("d", 20, Some(18), "Meetup"),
            event("c", 20, Some(18), "Happy Hour"),
            event("b", 20, None, "Festival"),
            event("a", 20, Some(18), "Happy Hour"),
        ]);

        let ids: Vec<_> = sorted.iter().map(|e| e.identity.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c", "d", "e"]);
    }
}
