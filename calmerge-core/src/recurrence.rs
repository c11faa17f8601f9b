//! RRULE expansion and timezone normalization of feed entries.
//!
//! Every entry is resolved into concrete occurrences whose start and end are
//! wall-clock values in the reference timezone. Recurring masters are expanded
//! within the collection window, respecting EXDATEs and RECURRENCE-ID
//! exceptions from the same feed.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use tracing::{debug, warn};

use crate::error::{CalMergeError, CalMergeResult};
use crate::event::{EventTime, FeedEntry};
use crate::window::{CollectionWindow, localize};

/// A start or end value converted into the reference timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTime {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl LocalTime {
    pub fn date(&self) -> NaiveDate {
        match self {
            LocalTime::Date(d) => *d,
            LocalTime::DateTime(dt) => dt.date(),
        }
    }

    /// Last day occupied by an event ending here. Ends are exclusive, so a
    /// date or a midnight time belongs to the day before.
    pub fn last_day(&self) -> NaiveDate {
        match self {
            LocalTime::Date(d) => *d - Duration::days(1),
            LocalTime::DateTime(dt) if dt.time() == NaiveTime::MIN => {
                dt.date() - Duration::days(1)
            }
            LocalTime::DateTime(dt) => dt.date(),
        }
    }
}

/// One concrete occurrence of a feed entry.
#[derive(Debug, Clone)]
pub struct Occurrence<'a> {
    pub entry: &'a FeedEntry,
    pub start: LocalTime,
    pub end: Option<LocalTime>,
}

/// Key matching a generated occurrence to a RECURRENCE-ID exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OccurrenceKey {
    Date(NaiveDate),
    Instant(i64),
}

/// Occurrences generated from one recurring master, plus the exception
/// entries that took a slot.
struct MasterExpansion<'a> {
    occurrences: Vec<Occurrence<'a>>,
    consumed: Vec<usize>,
}

/// Expands feed entries for one source.
pub struct Expander {
    window: CollectionWindow,
    max_occurrences: u16,
}

impl Expander {
    pub fn new(window: CollectionWindow, max_occurrences: u16) -> Self {
        Expander {
            window,
            max_occurrences,
        }
    }

    /// Expand all entries, returning the occurrences and the number of
    /// entries that had to be skipped.
    pub fn expand<'a>(&self, entries: &'a [FeedEntry]) -> (Vec<Occurrence<'a>>, usize) {
        let mut exceptions: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if entry.recurrence_id.is_some() {
                exceptions.entry(entry.uid.as_str()).or_default().push(idx);
            }
        }

        let mut consumed: HashSet<usize> = HashSet::new();
        let mut occurrences = Vec::new();
        let mut skipped = 0;

        for entry in entries.iter().filter(|e| e.recurrence_id.is_none()) {
            if entry.recurrence.is_none() {
                occurrences.push(self.single(entry));
                continue;
            }

            let overrides: HashMap<OccurrenceKey, usize> = exceptions
                .get(entry.uid.as_str())
                .into_iter()
                .flatten()
                .filter_map(|&idx| {
                    let rid = entries[idx].recurrence_id.as_ref()?;
                    Some((self.key_for(rid), idx))
                })
                .collect();

            match self.expand_master(entry, entries, &overrides) {
                Ok(expanded) => {
                    consumed.extend(expanded.consumed);
                    occurrences.extend(expanded.occurrences);
                }
                Err(e) => {
                    warn!("Skipping recurring entry '{}': {e}", entry.summary);
                    skipped += 1;
                }
            }
        }

        // Exceptions that moved outside their master's pattern, or whose master
        // is missing from the feed, stand on their own. Cancelled ones vanish.
        for (idx, entry) in entries.iter().enumerate() {
            if entry.recurrence_id.is_some() && !entry.cancelled && !consumed.contains(&idx) {
                occurrences.push(self.single(entry));
            }
        }

        occurrences.retain(|o| {
            self.window
                .overlaps(o.start.date(), o.end.map(|e| e.last_day()))
        });

        (occurrences, skipped)
    }

    fn single<'a>(&self, entry: &'a FeedEntry) -> Occurrence<'a> {
        Occurrence {
            entry,
            start: self.resolve(&entry.start),
            end: entry.end.as_ref().map(|e| self.resolve(e)),
        }
    }

    /// Convert a feed time into the reference timezone.
    pub fn resolve(&self, time: &EventTime) -> LocalTime {
        let tz = self.window.tz;
        match time {
            EventTime::Date(d) => LocalTime::Date(*d),
            EventTime::DateTimeUtc(dt) => LocalTime::DateTime(dt.with_timezone(&tz).naive_local()),
            EventTime::DateTimeFloating(naive) => LocalTime::DateTime(*naive),
            EventTime::DateTimeZoned { datetime, tzid } => match parse_tzid(tzid) {
                Some(zone) => {
                    LocalTime::DateTime(localize(zone, *datetime).with_timezone(&tz).naive_local())
                }
                None => {
                    debug!("Unknown TZID '{tzid}', treating time as reference-local");
                    LocalTime::DateTime(*datetime)
                }
            },
        }
    }

    fn key_for(&self, time: &EventTime) -> OccurrenceKey {
        match time {
            EventTime::Date(d) => OccurrenceKey::Date(*d),
            EventTime::DateTimeUtc(dt) => OccurrenceKey::Instant(dt.timestamp()),
            EventTime::DateTimeFloating(naive) => {
                OccurrenceKey::Instant(localize(self.window.tz, *naive).timestamp())
            }
            EventTime::DateTimeZoned { datetime, tzid } => {
                let zone = parse_tzid(tzid).unwrap_or(self.window.tz);
                OccurrenceKey::Instant(localize(zone, *datetime).timestamp())
            }
        }
    }

    /// Expand a recurring master into occurrences within the window.
    ///
    /// Generated slots matching an exception are replaced by it, or left
    /// empty when the exception is cancelled.
    fn expand_master<'a>(
        &self,
        master: &'a FeedEntry,
        entries: &'a [FeedEntry],
        overrides: &HashMap<OccurrenceKey, usize>,
    ) -> CalMergeResult<MasterExpansion<'a>> {
        let rrule_set = self.rrule_set(master)?;

        let span = match (self.resolve(&master.start), master.end.as_ref().map(|e| self.resolve(e))) {
            (LocalTime::DateTime(s), Some(LocalTime::DateTime(e))) => e - s,
            (LocalTime::Date(s), Some(LocalTime::Date(e))) => Duration::days((e - s).num_days()),
            _ => Duration::zero(),
        };

        // Widen by the event span so occurrences still running at the window
        // start are kept. Both bounds are exclusive, and an occurrence ending
        // exactly at the window start is not running.
        let tz: rrule::Tz = Utc.into();
        let lead = if span > Duration::zero() {
            span
        } else {
            Duration::seconds(1)
        };
        let after = (self.window.start_utc() - lead).with_timezone(&tz);
        let before = (self.window.end_utc() + Duration::seconds(1)).with_timezone(&tz);

        let result = rrule_set
            .after(after)
            .before(before)
            .all(self.max_occurrences);
        if result.limited {
            debug!(
                "Recurrence for '{}' hit the {} occurrence cap",
                master.summary, self.max_occurrences
            );
        }

        let mut expansion = MasterExpansion {
            occurrences: Vec::with_capacity(result.dates.len()),
            consumed: Vec::new(),
        };
        for occ in &result.dates {
            let key = match master.start {
                EventTime::Date(_) => OccurrenceKey::Date(occ.date_naive()),
                _ => OccurrenceKey::Instant(occ.timestamp()),
            };

            if let Some(&idx) = overrides.get(&key) {
                expansion.consumed.push(idx);
                if entries[idx].cancelled {
                    debug!("Occurrence of '{}' cancelled by its exception", master.summary);
                } else {
                    expansion.occurrences.push(self.single(&entries[idx]));
                }
                continue;
            }

            let (start, end) = match master.start {
                EventTime::Date(_) => {
                    let day = occ.date_naive();
                    let end = master
                        .end
                        .as_ref()
                        .map(|_| LocalTime::Date(day + Duration::days(span.num_days())));
                    (LocalTime::Date(day), end)
                }
                _ => {
                    let local = occ.with_timezone(&self.window.tz).naive_local();
                    let end = master.end.as_ref().map(|_| LocalTime::DateTime(local + span));
                    (LocalTime::DateTime(local), end)
                }
            };

            expansion.occurrences.push(Occurrence {
                entry: master,
                start,
                end,
            });
        }

        Ok(expansion)
    }

    fn rrule_set(&self, master: &FeedEntry) -> CalMergeResult<RRuleSet> {
        let recurrence = master.recurrence.as_ref().ok_or_else(|| {
            CalMergeError::Recurrence(format!("'{}' has no RRULE", master.summary))
        })?;

        let rrule = normalize_until(&recurrence.rrule);
        let rrule_str = self.build_rrule_string(master, &rrule);

        rrule_str.parse::<RRuleSet>().map_err(|e| {
            CalMergeError::Recurrence(format!(
                "Failed to parse RRULE for event '{}': {}",
                master.uid, e
            ))
        })
    }

    /// Build an iCalendar-format RRULE block for the rrule crate parser.
    fn build_rrule_string(&self, master: &FeedEntry, rrule: &str) -> String {
        let master_time = match self.resolve(&master.start) {
            LocalTime::DateTime(dt) => dt.time(),
            LocalTime::Date(_) => NaiveTime::MIN,
        };

        let mut lines = Vec::new();
        lines.push(format!("DTSTART{}", self.rrule_value(&master.start, master_time)));
        lines.push(format!("RRULE:{rrule}"));
        if let Some(recurrence) = &master.recurrence {
            for exdate in &recurrence.exdates {
                lines.push(format!("EXDATE{}", self.rrule_value(exdate, master_time)));
            }
        }

        lines.join("\n")
    }

    /// `;TZID=<zone>:<local>` or `:<utc>Z`.
    ///
    /// All-day dates and floating times are pinned to the reference zone so
    /// occurrences line up with the window bounds.
    fn rrule_value(&self, time: &EventTime, master_time: NaiveTime) -> String {
        let reference = self.window.tz.name();
        match time {
            EventTime::Date(d) => format!(
                ";TZID={}:{}",
                reference,
                d.and_time(master_time).format("%Y%m%dT%H%M%S")
            ),
            EventTime::DateTimeUtc(dt) => format!(":{}", dt.format("%Y%m%dT%H%M%SZ")),
            EventTime::DateTimeFloating(dt) => {
                format!(";TZID={}:{}", reference, dt.format("%Y%m%dT%H%M%S"))
            }
            EventTime::DateTimeZoned { datetime, tzid } => {
                let zone = parse_tzid(tzid).map(|z| z.name()).unwrap_or(reference);
                format!(";TZID={}:{}", zone, datetime.format("%Y%m%dT%H%M%S"))
            }
        }
    }
}

fn parse_tzid(tzid: &str) -> Option<Tz> {
    tzid.trim_matches('"').parse::<Tz>().ok()
}

/// Feeds often write a floating or date-only UNTIL next to a zoned DTSTART,
/// which the rrule crate rejects. Rewrite it as an end-of-day UTC value.
fn normalize_until(rrule: &str) -> String {
    rrule
        .split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") && !value.ends_with('Z') => {
                if value.len() == 8 {
                    format!("UNTIL={value}T235959Z")
                } else {
                    format!("UNTIL={value}Z")
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Recurrence;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(uid: &str, start: EventTime, end: Option<EventTime>, rrule: Option<&str>) -> FeedEntry {
        FeedEntry {
            uid: uid.to_string(),
            summary: format!("Event {uid}"),
            description: None,
            location: None,
            url: None,
            start,
            end,
            recurrence: rrule.map(|r| Recurrence {
                rrule: r.to_string(),
                exdates: vec![],
            }),
            recurrence_id: None,
            cancelled: false,
        }
    }

    fn expander(start: NaiveDate, days: i64) -> Expander {
        Expander::new(CollectionWindow::ahead(start, days, New_York), 500)
    }

    #[test]
    fn test_weekly_rule_is_bounded_by_window() {
        let master = entry(
            "weekly",
            EventTime::DateTimeZoned {
                datetime: date(2025, 1, 6).and_hms_opt(18, 30, 0).unwrap(),
                tzid: "America/New_York".into(),
            },
            Some(EventTime::DateTimeZoned {
                datetime: date(2025, 1, 6).and_hms_opt(20, 0, 0).unwrap(),
                tzid: "America/New_York".into(),
            }),
            Some("FREQ=WEEKLY;BYDAY=MO"),
        );
        let entries = vec![master];

        let (occurrences, skipped) = expander(date(2025, 3, 1), 30).expand(&entries);

        assert_eq!(skipped, 0);
        let starts: Vec<_> = occurrences.iter().map(|o| o.start).collect();
        assert_eq!(
            starts,
            vec![
                LocalTime::DateTime(date(2025, 3, 3).and_hms_opt(18, 30, 0).unwrap()),
                LocalTime::DateTime(date(2025, 3, 10).and_hms_opt(18, 30, 0).unwrap()),
                LocalTime::DateTime(date(2025, 3, 17).and_hms_opt(18, 30, 0).unwrap()),
                LocalTime::DateTime(date(2025, 3, 24).and_hms_opt(18, 30, 0).unwrap()),
                LocalTime::DateTime(date(2025, 3, 31).and_hms_opt(18, 30, 0).unwrap()),
            ]
        );
        assert_eq!(
            occurrences[0].end,
            Some(LocalTime::DateTime(date(2025, 3, 3).and_hms_opt(20, 0, 0).unwrap()))
        );
    }

    #[test]
    fn test_utc_times_convert_to_reference_zone_across_dst() {
        // 23:00 UTC is 18:00 EST before the switch and 19:00 EDT after it.
        let master = entry(
            "utc",
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 4, 23, 0, 0).unwrap()),
            None,
            Some("FREQ=WEEKLY;COUNT=3"),
        );
        let entries = vec![master];

        let (occurrences, _) = expander(date(2025, 3, 1), 30).expand(&entries);

        let times: Vec<_> = occurrences
            .iter()
            .map(|o| match o.start {
                LocalTime::DateTime(dt) => dt.format("%m-%d %H:%M").to_string(),
                LocalTime::Date(d) => d.to_string(),
            })
            .collect();
        assert_eq!(times, vec!["03-04 18:00", "03-11 19:00", "03-18 19:00"]);
    }

    #[test]
    fn test_exdate_and_recurrence_id_exception() {
        let mut master = entry(
            "series",
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 3, 23, 0, 0).unwrap()),
            Some(EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap())),
            Some("FREQ=WEEKLY;COUNT=4"),
        );
        if let Some(r) = master.recurrence.as_mut() {
            r.exdates
                .push(EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 10, 23, 0, 0).unwrap()));
        }

        let mut moved = entry(
            "series",
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 18, 22, 0, 0).unwrap()),
            None,
            None,
        );
        moved.summary = "Moved session".into();
        moved.recurrence_id = Some(EventTime::DateTimeUtc(
            Utc.with_ymd_and_hms(2025, 3, 17, 23, 0, 0).unwrap(),
        ));

        let entries = vec![master, moved];
        let (occurrences, _) = expander(date(2025, 3, 1), 60).expand(&entries);

        let summaries: Vec<_> = occurrences.iter().map(|o| o.entry.summary.as_str()).collect();
        assert_eq!(
            summaries,
            vec!["Event series", "Moved session", "Event series"],
            "EXDATE drops 03-10 and the exception replaces 03-17"
        );
        assert_eq!(occurrences[1].start.date(), date(2025, 3, 18));
    }

    #[test]
    fn test_all_day_recurrence_stays_on_its_dates() {
        let master = entry(
            "allday",
            EventTime::Date(date(2025, 3, 1)),
            Some(EventTime::Date(date(2025, 3, 2))),
            Some("FREQ=MONTHLY;COUNT=3"),
        );
        let entries = vec![master];

        let (occurrences, _) = expander(date(2025, 3, 1), 90).expand(&entries);

        let starts: Vec<_> = occurrences.iter().map(|o| o.start).collect();
        assert_eq!(
            starts,
            vec![
                LocalTime::Date(date(2025, 3, 1)),
                LocalTime::Date(date(2025, 4, 1)),
                LocalTime::Date(date(2025, 5, 1)),
            ]
        );
        assert_eq!(occurrences[1].end, Some(LocalTime::Date(date(2025, 4, 2))));
    }

    #[test]
    fn test_broken_rrule_is_skipped() {
        let entries = vec![
            entry(
                "bad",
                EventTime::Date(date(2025, 3, 1)),
                None,
                Some("FREQ=SOMETIMES"),
            ),
            entry("ok", EventTime::Date(date(2025, 3, 2)), None, None),
        ];

        let (occurrences, skipped) = expander(date(2025, 3, 1), 30).expand(&entries);
        assert_eq!(skipped, 1);
        assert_eq!(occurrences.len(), 1);
    }

    #[test]
    fn test_single_events_outside_window_are_dropped() {
        let entries = vec![
            entry("past", EventTime::Date(date(2025, 2, 1)), None, None),
            entry("future", EventTime::Date(date(2026, 2, 1)), None, None),
            entry("inside", EventTime::Date(date(2025, 3, 5)), None, None),
        ];

        let (occurrences, _) = expander(date(2025, 3, 1), 30).expand(&entries);
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].entry.uid, "inside");
    }

    #[test]
    fn test_cancelled_exception_removes_its_occurrence() {
        let master = entry(
            "series",
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 24, 23, 0, 0).unwrap()),
            None,
            Some("FREQ=WEEKLY;COUNT=3"),
        );
        let mut cancelled = entry(
            "series",
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 31, 23, 0, 0).unwrap()),
            None,
            None,
        );
        cancelled.recurrence_id = Some(EventTime::DateTimeUtc(
            Utc.with_ymd_and_hms(2025, 3, 31, 23, 0, 0).unwrap(),
        ));
        cancelled.cancelled = true;

        let entries = vec![master, cancelled];
        let (occurrences, skipped) = expander(date(2025, 3, 20), 30).expand(&entries);

        assert_eq!(skipped, 0);
        let dates: Vec<_> = occurrences.iter().map(|o| o.start.date()).collect();
        assert_eq!(dates, vec![date(2025, 3, 24), date(2025, 4, 7)]);
    }

    #[test]
    fn test_cancelled_exception_without_master_is_not_emitted() {
        let mut orphan = entry(
            "orphan",
            EventTime::Date(date(2025, 3, 25)),
            None,
            None,
        );
        orphan.recurrence_id = Some(EventTime::Date(date(2025, 3, 25)));
        orphan.cancelled = true;

        let entries = vec![orphan];
        let (occurrences, _) = expander(date(2025, 3, 20), 30).expand(&entries);
        assert!(occurrences.is_empty());
    }

    #[test]
    fn test_events_ending_at_window_start_are_dropped() {
        let entries = vec![
            entry(
                "yesterday-fair",
                EventTime::Date(date(2025, 3, 19)),
                Some(EventTime::Date(date(2025, 3, 20))),
                None,
            ),
            entry(
                "late-show",
                EventTime::DateTimeFloating(date(2025, 3, 19).and_hms_opt(21, 0, 0).unwrap()),
                Some(EventTime::DateTimeFloating(date(2025, 3, 20).and_hms_opt(0, 0, 0).unwrap())),
                None,
            ),
            entry(
                "after-party",
                EventTime::DateTimeFloating(date(2025, 3, 19).and_hms_opt(22, 0, 0).unwrap()),
                Some(EventTime::DateTimeFloating(date(2025, 3, 20).and_hms_opt(1, 0, 0).unwrap())),
                None,
            ),
        ];

        let (occurrences, _) = expander(date(2025, 3, 20), 30).expand(&entries);

        let uids: Vec<_> = occurrences.iter().map(|o| o.entry.uid.as_str()).collect();
        assert_eq!(uids, vec!["after-party"]);
    }

    #[test]
    fn test_recurring_all_day_ending_at_window_start_is_dropped() {
        let master = entry(
            "daily",
            EventTime::Date(date(2025, 3, 18)),
            Some(EventTime::Date(date(2025, 3, 19))),
            Some("FREQ=DAILY;COUNT=4"),
        );
        let entries = vec![master];

        let (occurrences, _) = expander(date(2025, 3, 20), 30).expand(&entries);

        let starts: Vec<_> = occurrences.iter().map(|o| o.start).collect();
        assert_eq!(
            starts,
            vec![LocalTime::Date(date(2025, 3, 20)), LocalTime::Date(date(2025, 3, 21))]
        );
    }

    #[test]
    fn test_last_day_treats_ends_as_exclusive() {
        assert_eq!(LocalTime::Date(date(2025, 3, 20)).last_day(), date(2025, 3, 19));
        assert_eq!(
            LocalTime::DateTime(date(2025, 3, 20).and_hms_opt(0, 0, 0).unwrap()).last_day(),
            date(2025, 3, 19)
        );
        assert_eq!(
            LocalTime::DateTime(date(2025, 3, 20).and_hms_opt(0, 30, 0).unwrap()).last_day(),
            date(2025, 3, 20)
        );
    }

    #[test]
    fn test_normalize_until() {
        assert_eq!(
            normalize_until("FREQ=WEEKLY;UNTIL=20250401"),
            "FREQ=WEEKLY;UNTIL=20250401T235959Z"
        );
        assert_eq!(
            normalize_until("FREQ=WEEKLY;UNTIL=20250401T100000"),
            "FREQ=WEEKLY;UNTIL=20250401T100000Z"
        );
        assert_eq!(
            normalize_until("FREQ=DAILY;UNTIL=20250401T100000Z"),
            "FREQ=DAILY;UNTIL=20250401T100000Z"
        );
    }
}
