//! Event types flowing through the pipeline.
//!
//! Feed entries carry their times exactly as the feed wrote them (`EventTime`).
//! Once expanded and converted to the reference timezone they become
//! `RawEventInstance`s, and after suppression, override merge and continuity
//! processing they end up as `CanonicalEvent`s.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A DTSTART/DTEND/EXDATE value as written in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(DateTime<Utc>),
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
}

impl EventTime {
    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EventTime::DateTimeUtc(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M UTC")),
            EventTime::DateTimeFloating(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M")),
            EventTime::DateTimeZoned { datetime, tzid } => {
                write!(f, "{} ({})", datetime.format("%Y-%m-%d %H:%M"), tzid)
            }
        }
    }
}

/// RRULE plus its exclusions for a recurring master.
#[derive(Debug, Clone, PartialEq)]
pub struct Recurrence {
    pub rrule: String,
    pub exdates: Vec<EventTime>,
}

/// One VEVENT from a feed, before expansion.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub start: EventTime,
    pub end: Option<EventTime>,
    pub recurrence: Option<Recurrence>,
    /// Set on instance exceptions of a recurring master.
    pub recurrence_id: Option<EventTime>,
    /// A cancelled exception removes its slot from the series and is never emitted.
    pub cancelled: bool,
}

/// Start time of an event.
///
/// Multi-day events whose time varies by date use `PerDay`; dates missing
/// from the map render as all-day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventClock {
    Fixed(NaiveTime),
    PerDay(BTreeMap<NaiveDate, NaiveTime>),
}

impl EventClock {
    /// The start time that applies on `date`, if any.
    pub fn on(&self, date: NaiveDate) -> Option<NaiveTime> {
        match self {
            EventClock::Fixed(t) => Some(*t),
            EventClock::PerDay(times) => times.get(&date).copied(),
        }
    }
}

/// A concrete occurrence produced by the feed collector for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEventInstance {
    pub title: String,
    pub date: NaiveDate,
    pub time: Option<EventClock>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub source_id: String,
}

impl RawEventInstance {
    /// Start time on the first day, `None` for all-day starts.
    pub fn start_time(&self) -> Option<NaiveTime> {
        self.time.as_ref().and_then(|c| c.on(self.date))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Feed,
    Direct,
}

/// The merged, normalized event handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub identity: String,
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
    #[serde(default)]
    pub categories: BTreeSet<String>,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
    pub last_seen_date: NaiveDate,
}

impl CanonicalEvent {
    pub fn start_time(&self) -> Option<NaiveTime> {
        self.time.as_ref().and_then(|c| c.on(self.date))
    }

    /// Equality that ignores `last_seen_date` bookkeeping.
    pub fn same_content(&self, other: &CanonicalEvent) -> bool {
        CanonicalEvent {
            last_seen_date: other.last_seen_date,
            ..self.clone()
        } == *other
    }
}

impl fmt::Display for CanonicalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_time() {
            Some(t) => write!(f, "{} {} {}", self.date, t.format("%H:%M"), self.title),
            None => write!(f, "{} {}", self.date, self.title),
        }
    }
}
