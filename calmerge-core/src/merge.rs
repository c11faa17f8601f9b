//! Override merge.

use chrono::NaiveDate;

use crate::categories::{CategoryPrecedence, resolve_categories};
use crate::config::Source;
use crate::event::{CanonicalEvent, SourceType};
use crate::overrides::OverrideRecord;
use crate::suppress::IdentifiedInstance;

/// Merge an identified feed instance with its override, if any.
///
/// Each field present in the override replaces the instance's value; absent
/// fields keep it. The source's fallback URL applies only when neither side
/// has a URL.
pub fn merge_instance(
    identified: IdentifiedInstance,
    record: Option<&OverrideRecord>,
    source: &Source,
    precedence: CategoryPrecedence,
    cycle_date: NaiveDate,
) -> CanonicalEvent {
    let IdentifiedInstance { identity, instance } = identified;
    let empty = OverrideRecord::default();
    let record = record.unwrap_or(&empty);

    let url = record
        .url
        .clone()
        .or(instance.url)
        .or_else(|| source.fallback_url.clone());

    CanonicalEvent {
        identity,
        title: record.title.clone().unwrap_or(instance.title),
        date: record.date.unwrap_or(instance.date),
        time: record.time.clone().or(instance.time),
        end_date: record.end_date.or(instance.end_date),
        end_time: record.end_time.or(instance.end_time),
        location: record.location.clone().or(instance.location),
        url,
        description: record.description.clone().or(instance.description),
        categories: resolve_categories(record.categories.as_ref(), &source.categories, precedence),
        source_type: SourceType::Feed,
        source_id: Some(instance.source_id),
        submitted_by: None,
        last_seen_date: cycle_date,
    }
}
