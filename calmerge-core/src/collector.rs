//! Feed collection.
//!
//! Fetches every active source, parses and expands its feed, and shapes each
//! occurrence into a `RawEventInstance`. A failing source yields zero
//! instances for the cycle; it never aborts the run.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::Source;
use crate::constants::USER_AGENT;
use crate::error::{CalMergeError, CalMergeResult};
use crate::event::{EventClock, RawEventInstance};
use crate::ics::parse_feed;
use crate::recurrence::{Expander, LocalTime, Occurrence};
use crate::window::CollectionWindow;

/// Retrieves the raw body of a feed.
pub trait FeedFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = CalMergeResult<String>> + Send;
}

/// HTTP(S) feed fetcher with a bounded per-request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> CalMergeResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(HttpFetcher { client, timeout })
    }
}

impl FeedFetcher for HttpFetcher {
    #[instrument(skip(self), level = "debug")]
    async fn fetch(&self, url: &str) -> CalMergeResult<String> {
        let url = normalize_feed_url(url)?;

        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            if e.is_timeout() {
                CalMergeError::FeedTimeout(self.timeout.as_secs())
            } else {
                CalMergeError::FeedFetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalMergeError::FeedFetch {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        Ok(response.text().await?)
    }
}

/// `webcal://` is plain HTTPS as far as fetching goes.
fn normalize_feed_url(raw: &str) -> CalMergeResult<url::Url> {
    let raw = raw.trim();
    let rewritten = match raw.strip_prefix("webcal://") {
        Some(rest) => format!("https://{rest}"),
        None => raw.to_string(),
    };

    url::Url::parse(&rewritten).map_err(|e| CalMergeError::FeedFetch {
        url: raw.to_string(),
        reason: format!("invalid URL: {e}"),
    })
}

/// Outcome of collecting one source.
#[derive(Debug)]
pub struct SourceHarvest {
    pub source_id: String,
    pub instances: Vec<RawEventInstance>,
    pub skipped: usize,
    pub error: Option<String>,
}

/// Turn a fetched feed body into instances for `source`.
pub fn harvest_body(
    source: &Source,
    body: &str,
    window: &CollectionWindow,
    max_occurrences: u16,
) -> CalMergeResult<SourceHarvest> {
    let parsed = parse_feed(body)?;
    let expander = Expander::new(*window, max_occurrences);
    let (occurrences, expand_skipped) = expander.expand(&parsed.entries);

    let instances = occurrences
        .iter()
        .map(|o| to_instance(o, &source.id))
        .collect();

    Ok(SourceHarvest {
        source_id: source.id.clone(),
        instances,
        skipped: parsed.skipped + expand_skipped,
        error: None,
    })
}

/// Shape an occurrence into one of the three temporal forms.
///
/// - all-day: no clock, DTEND is exclusive so the last day is DTEND - 1
/// - timed within one day: fixed clock plus end time
/// - timed across days: per-day clock holding the first day's start time
///
/// An end exactly at midnight belongs to the previous day.
pub fn to_instance(occurrence: &Occurrence, source_id: &str) -> RawEventInstance {
    let entry = occurrence.entry;

    let (date, time, end_date, end_time) = match (occurrence.start, occurrence.end) {
        (LocalTime::Date(start), end) => {
            let last_day = end.map(|e| e.last_day()).filter(|d| *d > start);
            (start, None, last_day, None)
        }
        (LocalTime::DateTime(start), None) => {
            (start.date(), Some(EventClock::Fixed(start.time())), None, None)
        }
        (LocalTime::DateTime(start), Some(end)) => {
            let end = match end {
                LocalTime::DateTime(dt) => dt,
                LocalTime::Date(d) => d.and_time(NaiveTime::MIN),
            };
            let ends_at_midnight = end.time() == NaiveTime::MIN;
            let last_day = if ends_at_midnight {
                end.date() - ChronoDuration::days(1)
            } else {
                end.date()
            };
            let end_time = (!ends_at_midnight).then(|| end.time());

            if last_day <= start.date() {
                (start.date(), Some(EventClock::Fixed(start.time())), None, end_time)
            } else {
                let mut times = BTreeMap::new();
                times.insert(start.date(), start.time());
                (
                    start.date(),
                    Some(EventClock::PerDay(times)),
                    Some(last_day),
                    end_time,
                )
            }
        }
    };

    RawEventInstance {
        title: entry.summary.trim().to_string(),
        date,
        time,
        end_date,
        end_time,
        location: entry.location.clone(),
        url: entry.url.clone(),
        description: entry.description.clone(),
        source_id: source_id.to_string(),
    }
}

/// Collect all active sources with at most `max_concurrent` fetches in flight.
///
/// Results are returned in source order regardless of completion order.
pub async fn collect_sources<F: FeedFetcher>(
    fetcher: Arc<F>,
    sources: &[Source],
    window: CollectionWindow,
    max_concurrent: usize,
    max_occurrences: u16,
) -> Vec<SourceHarvest> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut set = JoinSet::new();
    let mut pending: BTreeMap<usize, String> = BTreeMap::new();

    for (idx, source) in sources.iter().enumerate() {
        if !source.active {
            debug!("Skipping inactive source '{}'", source.id);
            continue;
        }

        let fetcher = Arc::clone(&fetcher);
        let semaphore = Arc::clone(&semaphore);
        let source = source.clone();
        pending.insert(idx, source.id.clone());

        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = fetcher.fetch(&source.url).await;
            (idx, source, result)
        });
    }

    let mut harvests: Vec<(usize, SourceHarvest)> = Vec::new();
    let mut task_errors = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (idx, source, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                warn!("Feed task failed: {e}");
                task_errors.push(e.to_string());
                continue;
            }
        };
        pending.remove(&idx);

        let harvest = match result
            .and_then(|body| harvest_body(&source, &body, &window, max_occurrences))
        {
            Ok(harvest) => {
                info!(
                    "Collected {} instances from '{}' ({} skipped)",
                    harvest.instances.len(),
                    source.id,
                    harvest.skipped
                );
                harvest
            }
            Err(e) => {
                warn!("Source '{}' failed this cycle: {e}", source.id);
                SourceHarvest {
                    source_id: source.id.clone(),
                    instances: Vec::new(),
                    skipped: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        harvests.push((idx, harvest));
    }

    // A task that panicked never reported its source; whatever is still
    // pending failed that way.
    let reason = if task_errors.is_empty() {
        "fetch task did not complete".to_string()
    } else {
        format!("fetch task failed: {}", task_errors.join("; "))
    };
    for (idx, source_id) in pending {
        warn!("Source '{source_id}' failed this cycle: {reason}");
        harvests.push((
            idx,
            SourceHarvest {
                source_id,
                instances: Vec::new(),
                skipped: 0,
                error: Some(reason.clone()),
            },
        ));
    }

    harvests.sort_by_key(|(idx, _)| *idx);
    harvests.into_iter().map(|(_, h)| h).collect()
}
