//! Feed parsing using the icalendar crate's parser.

use icalendar::{
    DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};
use tracing::{debug, warn};

use crate::error::{CalMergeError, CalMergeResult};
use crate::event::{EventTime, FeedEntry, Recurrence};

/// Entries parsed from one feed body, plus how many were skipped.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub entries: Vec<FeedEntry>,
    pub skipped: usize,
}

/// Parse every VEVENT in an iCalendar document.
///
/// Individual entries that are malformed are skipped with a warning. If the
/// document as a whole does not parse, each `BEGIN:VEVENT` block is retried
/// on its own so one broken entry cannot hide the rest of the feed.
pub fn parse_calendar(content: &str) -> CalMergeResult<ParsedFeed> {
    if !content.contains("BEGIN:VCALENDAR") && !content.contains("BEGIN:VEVENT") {
        return Err(CalMergeError::IcsParse(
            "Document contains no calendar data".into(),
        ));
    }

    let unfolded = unfold(content);
    let mut parsed = ParsedFeed::default();

    match read_calendar(&unfolded) {
        Ok(calendar) => {
            let mut vevents = Vec::new();
            collect_vevents(&calendar.components, &mut vevents);
            for vevent in vevents {
                push_entry(&mut parsed, vevent);
            }
        }
        Err(e) => {
            debug!("Calendar did not parse as a whole ({e}), parsing entries one by one");
            let blocks = vevent_blocks(&unfolded);
            if blocks.is_empty() {
                return Err(CalMergeError::IcsParse(e));
            }
            for block in blocks {
                let wrapped = format!("BEGIN:VCALENDAR\r\n{block}\r\nEND:VCALENDAR\r\n");
                match read_calendar(&wrapped) {
                    Ok(calendar) => {
                        let mut vevents = Vec::new();
                        collect_vevents(&calendar.components, &mut vevents);
                        for vevent in vevents {
                            push_entry(&mut parsed, vevent);
                        }
                    }
                    Err(e) => {
                        warn!("Skipping unparseable feed entry: {e}");
                        parsed.skipped += 1;
                    }
                }
            }
        }
    }

    Ok(parsed)
}

fn push_entry(parsed: &mut ParsedFeed, vevent: &Component) {
    match parse_vevent(vevent) {
        Ok(Some(entry)) => parsed.entries.push(entry),
        Ok(None) => {}
        Err(e) => {
            warn!("Skipping malformed feed entry: {e}");
            parsed.skipped += 1;
        }
    }
}

fn collect_vevents<'a, 'b>(components: &'a [Component<'b>], out: &mut Vec<&'a Component<'b>>) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(component);
        } else {
            collect_vevents(&component.components, out);
        }
    }
}

/// Raw `BEGIN:VEVENT ... END:VEVENT` blocks, used when the calendar as a whole is invalid.
fn vevent_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in content.lines() {
        let trimmed = line.trim_end_matches('\r');
        if trimmed == "BEGIN:VEVENT" {
            current = Some(vec![trimmed]);
        } else if let Some(lines) = current.as_mut() {
            lines.push(trimmed);
            if trimmed == "END:VEVENT" {
                blocks.push(lines.join("\r\n"));
                current = None;
            }
        }
    }

    blocks
}

/// Parse one VEVENT.
///
/// Cancelled standalone events yield `Ok(None)`. A cancelled RECURRENCE-ID
/// exception is kept, flagged, so it can blank out its slot in the series.
fn parse_vevent(vevent: &Component) -> CalMergeResult<Option<FeedEntry>> {
    let cancelled = vevent
        .find_prop("STATUS")
        .is_some_and(|p| p.val.as_ref().trim().eq_ignore_ascii_case("CANCELLED"));

    let recurrence_id = vevent
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    if cancelled && recurrence_id.is_none() {
        return Ok(None);
    }

    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty());
    let summary = match summary {
        Some(summary) => summary,
        None if cancelled => String::new(),
        None => return Err(CalMergeError::IcsParse("Entry has no SUMMARY".into())),
    };

    let uid = vevent
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| summary.clone());

    let start = match vevent.find_prop("DTSTART") {
        Some(start_prop) => DatePerhapsTime::try_from(start_prop)
            .map(to_event_time)
            .map_err(|_| {
                CalMergeError::IcsParse(format!(
                    "Entry '{summary}' has an invalid DTSTART '{}'",
                    start_prop.val.as_ref()
                ))
            })?,
        None => match (&recurrence_id, cancelled) {
            (Some(rid), true) => rid.clone(),
            _ => {
                return Err(CalMergeError::IcsParse(format!(
                    "Entry '{summary}' has no DTSTART"
                )));
            }
        },
    };

    let end = match vevent.find_prop("DTEND") {
        Some(prop) => Some(
            DatePerhapsTime::try_from(prop)
                .map(to_event_time)
                .map_err(|_| {
                    CalMergeError::IcsParse(format!(
                        "Entry '{summary}' has an invalid DTEND '{}'",
                        prop.val.as_ref()
                    ))
                })?,
        ),
        None => vevent
            .find_prop("DURATION")
            .and_then(|p| end_from_duration(&start, p.val.as_ref())),
    };

    let description = vevent
        .find_prop("DESCRIPTION")
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty());
    let location = vevent
        .find_prop("LOCATION")
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty());
    let url = vevent
        .find_prop("URL")
        .map(|p| p.val.as_ref().trim().to_string())
        .filter(|s| !s.is_empty());

    let rrule = vevent.find_prop("RRULE").map(|p| p.val.to_string());
    let exdates: Vec<EventTime> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(parse_exdate_property)
        .collect();
    let recurrence = rrule.map(|rrule| Recurrence { rrule, exdates });

    Ok(Some(FeedEntry {
        uid,
        summary,
        description,
        location,
        url,
        start,
        end,
        recurrence,
        recurrence_id,
        cancelled,
    }))
}

/// Convert icalendar's DatePerhapsTime to our EventTime, preserving timezone info
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            icalendar::CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                EventTime::DateTimeZoned {
                    datetime: date_time,
                    tzid,
                }
            }
        },
    }
}

/// DTEND derived from DTSTART + DURATION (e.g. `PT1H30M`, `P1D`).
fn end_from_duration(start: &EventTime, value: &str) -> Option<EventTime> {
    let duration = iso8601::duration(value.trim()).ok()?;
    let std_duration: std::time::Duration = duration.into();
    let duration = chrono::Duration::from_std(std_duration).ok()?;

    Some(match start {
        EventTime::Date(d) => EventTime::Date(*d + chrono::Duration::days(duration.num_days())),
        EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + duration),
        EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(*dt + duration),
        EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
            datetime: *datetime + duration,
            tzid: tzid.clone(),
        },
    })
}

/// Parse an EXDATE property into a list of EventTime values.
///
/// Handles TZID and VALUE=DATE parameters, UTC and floating values, and
/// comma-separated lists.
fn parse_exdate_property(prop: &Property) -> Vec<EventTime> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if is_date || s.len() == 8 {
                chrono::NaiveDate::parse_from_str(s, "%Y%m%d")
                    .ok()
                    .map(EventTime::Date)
            } else if let Some(ref tz) = tzid {
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeZoned {
                        datetime: dt,
                        tzid: tz.clone(),
                    })
            } else if let Some(s) = s.strip_suffix('Z') {
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeUtc(dt.and_utc()))
            } else {
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(EventTime::DateTimeFloating)
            }
        })
        .collect()
}

/// Undo RFC 5545 TEXT escaping (`\,` `\;` `\n` `\\`).
pub(crate) fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}
