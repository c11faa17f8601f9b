//! Rolling collection window.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Inclusive date range, in the reference timezone, that feeds are expanded into.
#[derive(Debug, Clone, Copy)]
pub struct CollectionWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub tz: Tz,
}

impl CollectionWindow {
    /// `today` through `today + days`.
    pub fn ahead(today: NaiveDate, days: i64, tz: Tz) -> Self {
        CollectionWindow {
            start: today,
            end: today + Duration::days(days),
            tz,
        }
    }

    /// Today's date in `tz`.
    pub fn today_in(tz: Tz) -> NaiveDate {
        Utc::now().with_timezone(&tz).date_naive()
    }

    /// First instant of the window.
    pub fn start_utc(&self) -> DateTime<Utc> {
        localize(self.tz, self.start.and_time(NaiveTime::MIN)).with_timezone(&Utc)
    }

    /// Last instant of the window (end of the final day).
    pub fn end_utc(&self) -> DateTime<Utc> {
        let next_day = (self.end + Duration::days(1)).and_time(NaiveTime::MIN);
        localize(self.tz, next_day).with_timezone(&Utc) - Duration::seconds(1)
    }

    /// Whether an event occupying the days `start..=end` touches the window.
    ///
    /// `end` is the last occupied day, not an exclusive DTEND.
    pub fn overlaps(&self, start: NaiveDate, end: Option<NaiveDate>) -> bool {
        let end = end.unwrap_or(start).max(start);
        start <= self.end && end >= self.start
    }
}

/// Interpret a wall-clock time in `tz`.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// spring-forward gap are shifted forward by an hour.
pub fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => dt,
        None => {
            let shifted = naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        }
    }
}
