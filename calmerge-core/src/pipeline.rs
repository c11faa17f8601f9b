//! One collection cycle, end to end.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::address::{AddressLookup, AddressNormalizer, AddressStats, GeocodeClient, JsonAddressCache};
use crate::aggregate::assemble;
use crate::classifier::{CategoryClassifier, ClassifierCache, KeywordClassifier, enrich, taxonomy_fingerprint};
use crate::collector::{FeedFetcher, HttpFetcher, collect_sources};
use crate::config::{PipelineConfig, Source, load_sources};
use crate::continuity::{ContinuityReport, ContinuityTracker};
use crate::direct::load_direct_events;
use crate::error::CalMergeResult;
use crate::event::{CanonicalEvent, SourceType};
use crate::merge::merge_instance;
use crate::overrides::load_overrides;
use crate::storage::write_json_atomic;
use crate::store::CanonicalStore;
use crate::suppress::{identify_and_filter, is_stored_suppressed};
use crate::window::CollectionWindow;

/// Source name shown to the classifier for directly submitted events.
const DIRECT_SOURCE_NAME: &str = "Direct submission";

/// What happened during one cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub cycle_date: Option<NaiveDate>,
    pub sources: usize,
    /// (source id, reason) for every source that yielded nothing this cycle.
    pub failed_sources: Vec<(String, String)>,
    pub fetched: usize,
    pub skipped_entries: usize,
    pub suppressed: usize,
    pub duplicates: usize,
    pub overridden: usize,
    pub direct: usize,
    pub continuity: ContinuityReport,
    pub addresses: AddressStats,
    pub total: usize,
}

pub struct Pipeline<F, L> {
    config: PipelineConfig,
    fetcher: Arc<F>,
    addresses: AddressNormalizer<L>,
    classifier: Option<Box<dyn CategoryClassifier>>,
}

impl Pipeline<HttpFetcher, GeocodeClient> {
    /// Production wiring: HTTP feeds, the configured geocoder and JSON caches.
    pub fn from_config(config: PipelineConfig) -> CalMergeResult<Self> {
        let fetcher = HttpFetcher::new(config.fetch_timeout()?)?;
        let lookup = GeocodeClient::new(&config.geocoder)?;
        let cache = JsonAddressCache::load(&config.address_cache_file());

        Ok(Pipeline::new(
            config,
            fetcher,
            AddressNormalizer::new(lookup, Box::new(cache)),
        ))
    }
}

impl<F: FeedFetcher, L: AddressLookup> Pipeline<F, L> {
    /// The keyword classifier is enabled when the config has a taxonomy.
    pub fn new(config: PipelineConfig, fetcher: F, addresses: AddressNormalizer<L>) -> Self {
        let keywords = KeywordClassifier::new(&config.classifier.taxonomy);
        let classifier: Option<Box<dyn CategoryClassifier>> = if keywords.is_empty() {
            None
        } else {
            Some(Box::new(keywords))
        };

        Pipeline {
            config,
            fetcher: Arc::new(fetcher),
            addresses,
            classifier,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn CategoryClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one cycle for `today` (a date in the reference timezone).
    ///
    /// Only configuration errors and store failures abort the cycle; those
    /// abort before anything is written.
    pub async fn run_cycle(&mut self, today: NaiveDate) -> CalMergeResult<CycleReport> {
        let config = &self.config;
        let tz = config.tz()?;
        let sources = load_sources(&config.sources_path())?;
        let overrides = load_overrides(&config.overrides_path());
        let direct_events = load_direct_events(&config.events_path());
        let store = CanonicalStore::new(config.store_file());
        let previous = store.load()?;

        let mut classifier_cache = match &self.classifier {
            Some(_) => Some(ClassifierCache::load(
                &config.category_cache_file(),
                &taxonomy_fingerprint(&config.classifier.taxonomy),
            )),
            None => None,
        };

        let mut report = CycleReport {
            cycle_date: Some(today),
            sources: sources.iter().filter(|s| s.active).count(),
            ..CycleReport::default()
        };
        info!(
            "Cycle {today}: {} active sources, {} overrides, {} direct events",
            report.sources,
            overrides.len(),
            direct_events.len()
        );

        let window = CollectionWindow::ahead(today, config.window_days, tz);
        let harvests = collect_sources(
            Arc::clone(&self.fetcher),
            &sources,
            window,
            config.max_concurrent_fetches,
            config.max_occurrences,
        )
        .await;

        let by_id: HashMap<&str, &Source> = sources.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut seen = HashSet::new();
        let mut current: Vec<CanonicalEvent> = Vec::new();

        for harvest in harvests {
            report.skipped_entries += harvest.skipped;
            if let Some(reason) = harvest.error {
                report.failed_sources.push((harvest.source_id.clone(), reason));
            }
            let Some(source) = by_id.get(harvest.source_id.as_str()).copied() else {
                continue;
            };

            report.fetched += harvest.instances.len();
            let (identified, stats) = identify_and_filter(source, harvest.instances, &mut seen);
            report.suppressed += stats.suppressed;
            report.duplicates += stats.duplicates;

            for mut item in identified {
                let record = overrides.get(&item.identity);
                if record.is_some() {
                    report.overridden += 1;
                }

                if record.is_none_or(|r| r.location.is_none()) {
                    item.instance.location =
                        self.addresses.normalize(item.instance.location.as_deref()).await;
                }

                let explicit_categories = record.is_some_and(|r| r.categories.is_some());
                let mut event =
                    merge_instance(item, record, source, config.category_precedence, today);

                if event.categories.is_empty() && !explicit_categories {
                    if let (Some(classifier), Some(cache)) =
                        (self.classifier.as_deref(), classifier_cache.as_mut())
                    {
                        enrich(classifier, cache, &mut event, &source.name);
                    }
                }

                current.push(event);
            }
        }

        for (slug, submitted) in direct_events {
            if seen.contains(&slug) {
                warn!("Direct event '{slug}' collides with a feed identity, skipping");
                continue;
            }
            let location = self.addresses.normalize(submitted.location.as_deref()).await;
            let explicit_categories = submitted.categories.is_some();
            let mut event =
                submitted.into_canonical(&slug, location, config.category_precedence, today);

            if event.categories.is_empty() && !explicit_categories {
                if let (Some(classifier), Some(cache)) =
                    (self.classifier.as_deref(), classifier_cache.as_mut())
                {
                    enrich(classifier, cache, &mut event, DIRECT_SOURCE_NAME);
                }
            }

            current.push(event);
            report.direct += 1;
        }

        // Suppression applies to what the store remembers too.
        let previous: Vec<CanonicalEvent> = previous
            .into_iter()
            .filter(|event| {
                let suppressed = event.source_type == SourceType::Feed
                    && event
                        .source_id
                        .as_deref()
                        .and_then(|id| by_id.get(id))
                        .is_some_and(|source| is_stored_suppressed(source, event));
                if suppressed {
                    info!("Removing suppressed event {event} ({})", event.identity);
                }
                !suppressed
            })
            .collect();

        let tracker = ContinuityTracker::new(config.grace_days);
        let (merged, continuity) = tracker.reconcile(previous, current, today);
        let events = assemble(merged);

        // Output first: if it fails the store has not advanced.
        if let Some(output) = config.output_file() {
            write_json_atomic(&output, &events)?;
        }
        store.save(&events)?;
        if let Err(e) = self.addresses.save() {
            warn!("Could not save address cache: {e}");
        }
        if let Some(cache) = &classifier_cache {
            if let Err(e) = cache.save() {
                warn!("Could not save category cache: {e}");
            }
        }

        report.continuity = continuity;
        report.addresses = self.addresses.stats();
        report.total = events.len();

        info!("Continuity: {continuity}");
        info!(
            "Wrote {} events ({} failed sources, {} suppressed, {} duplicates)",
            report.total,
            report.failed_sources.len(),
            report.suppressed,
            report.duplicates
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::Path;

    use crate::address::MemoryAddressCache;
    use crate::error::CalMergeError;
    use crate::identity::identity_hash;

    const FEED_A: &str = "https://feeds.example.com/a.ics";
    const FEED_B: &str = "https://feeds.example.com/b.ics";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()
    }

    #[derive(Clone, Default)]
    struct StubFetcher {
        bodies: HashMap<String, String>,
    }

    impl FeedFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> CalMergeResult<String> {
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| CalMergeError::FeedFetch {
                    url: url.to_string(),
                    reason: "HTTP 500".into(),
                })
        }
    }

    struct StubLookup;

    impl AddressLookup for StubLookup {
        async fn lookup(&self, _raw: &str) -> CalMergeResult<String> {
            Err(CalMergeError::MissingCredentials("geocoder".into()))
        }
    }

    fn vevent(uid: &str, summary: &str, start: &str, end: &str, extra: &str) -> String {
        format!(
            "BEGIN:VEVENT\r\nUID:{uid}\r\nSUMMARY:{summary}\r\nDTSTART:{start}\r\nDTEND:{end}\r\n{extra}END:VEVENT\r\n"
        )
    }

    fn calendar(events: &[String]) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n{}END:VCALENDAR\r\n",
            events.concat()
        )
    }

    fn feed_a() -> String {
        calendar(&[
            vevent(
                "a-1",
                "Data Science Night",
                "20250320T180000",
                "20250320T200000",
                "LOCATION:1234 Some St\\, Arlington\\, VA 22201\\, VA\r\n",
            ),
            vevent("a-2", "Spam Event", "20250321T180000", "20250321T190000", ""),
            vevent("a-3", "Meetup", "20250322T190000", "20250322T210000", ""),
            vevent("a-4", "Meetup ", "20250322T190000", "20250322T210000", ""),
        ])
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> Option<chrono::NaiveTime> {
        chrono::NaiveTime::from_hms_opt(h, m, 0)
    }

    fn spam_identity() -> String {
        identity_hash(ymd(2025, 3, 21), hm(18, 0), "Spam Event", None)
    }

    fn data_night_identity() -> String {
        identity_hash(ymd(2025, 3, 20), hm(18, 0), "Data Science Night", None)
    }

    fn write_sources(dir: &Path, suppress_guid: &[String]) {
        let guids: Vec<String> = suppress_guid.iter().map(|g| format!("\"{g}\"")).collect();
        std::fs::write(
            dir.join("sources.toml"),
            format!(
                r#"
[[source]]
id = "a"
name = "Source A"
url = "{FEED_A}"
fallback_url = "https://a.example.com/events"
categories = ["data"]
suppress_guid = [{}]

[[source]]
id = "b"
name = "Source B"
url = "{FEED_B}"

[[source]]
id = "c"
name = "Source C"
url = "https://feeds.example.com/c.ics"
active = false
"#,
                guids.join(", ")
            ),
        )
        .unwrap();
    }

    fn pipeline(dir: &Path, bodies: &[(&str, String)]) -> Pipeline<StubFetcher, StubLookup> {
        let mut config = PipelineConfig::with_base_dir(dir);
        config.output_path = Some("public/events.json".into());
        let fetcher = StubFetcher {
            bodies: bodies.iter().map(|(u, b)| (u.to_string(), b.clone())).collect(),
        };
        Pipeline::new(
            config,
            fetcher,
            AddressNormalizer::new(StubLookup, Box::new(MemoryAddressCache::new())),
        )
    }

    fn stored(dir: &Path) -> Vec<CanonicalEvent> {
        CanonicalStore::new(dir.join("data/canonical.json")).load().unwrap()
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), &[spam_identity()]);

        std::fs::create_dir_all(dir.path().join("overrides")).unwrap();
        std::fs::write(
            dir.path()
                .join("overrides")
                .join(format!("{}.toml", data_night_identity())),
            "location = \"Arlington, VA\"\ncategories = [\"ai\"]\n",
        )
        .unwrap();

        std::fs::create_dir_all(dir.path().join("events")).unwrap();
        std::fs::write(
            dir.path().join("events").join("spring-picnic.toml"),
            "title = \"Spring Picnic\"\ndate = \"2025-03-29\"\nlocation = \"Bluemont Park, Arlington, Virginia, VA\"\nsubmitted_by = \"sam\"\n",
        )
        .unwrap();

        // Source B is unreachable this cycle.
        let mut pipeline = pipeline(dir.path(), &[(FEED_A, feed_a())]);
        let report = pipeline.run_cycle(today()).await.unwrap();

        assert_eq!(report.sources, 2);
        assert_eq!(report.failed_sources.len(), 1);
        assert_eq!(report.failed_sources[0].0, "b");
        assert_eq!(report.fetched, 4);
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.overridden, 1);
        assert_eq!(report.direct, 1);
        assert_eq!(report.total, 3);

        let events = stored(dir.path());
        let titles: Vec<_> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Data Science Night", "Meetup", "Spring Picnic"]);
        assert!(events.iter().all(|e| e.identity != spam_identity()));

        let night = &events[0];
        assert_eq!(night.location.as_deref(), Some("Arlington, VA"));
        assert_eq!(night.categories, BTreeSet::from(["ai".to_string()]));
        assert_eq!(night.url.as_deref(), Some("https://a.example.com/events"));

        let meetup = &events[1];
        assert_eq!(meetup.categories, BTreeSet::from(["data".to_string()]));

        let picnic = &events[2];
        assert_eq!(picnic.identity, "spring-picnic");
        assert_eq!(picnic.source_type, SourceType::Direct);
        assert_eq!(picnic.location.as_deref(), Some("Bluemont Park, Arlington, VA"));
        assert_eq!(picnic.submitted_by.as_deref(), Some("sam"));

        let output: Vec<CanonicalEvent> = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("public/events.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(output, events);

        // Nothing from the fallback path was cached.
        assert!(pipeline.addresses.cache().is_empty());
        assert!(pipeline.addresses.stats().fallback >= 1);
    }

    #[tokio::test]
    async fn test_base_location_is_normalized_without_override() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), &[]);

        let mut pipeline = pipeline(dir.path(), &[(FEED_A, feed_a())]);
        pipeline.run_cycle(today()).await.unwrap();

        let events = stored(dir.path());
        let night = events
            .iter()
            .find(|e| e.identity == data_night_identity())
            .unwrap();
        assert_eq!(
            night.location.as_deref(),
            Some("1234 Some St, Arlington, VA 22201")
        );
    }

    #[tokio::test]
    async fn test_unchanged_inputs_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), &[spam_identity()]);

        let mut pipeline = pipeline(dir.path(), &[(FEED_A, feed_a())]);
        pipeline.run_cycle(today()).await.unwrap();
        let first = stored(dir.path());

        pipeline.run_cycle(today()).await.unwrap();
        assert_eq!(stored(dir.path()), first);

        let report = pipeline.run_cycle(today().succ_opt().unwrap()).await.unwrap();
        let third = stored(dir.path());
        assert_eq!(report.continuity.confirmed, third.len() - report.continuity.retained);
        assert_eq!(third.len(), first.len());
        assert!(third.iter().zip(&first).all(|(a, b)| a.same_content(b)));
    }

    #[tokio::test]
    async fn test_outage_keeps_events_within_grace() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), &[]);

        let mut online = pipeline(dir.path(), &[(FEED_A, feed_a())]);
        online.run_cycle(today()).await.unwrap();
        let before = stored(dir.path()).len();

        let mut offline = pipeline(dir.path(), &[]);
        let report = offline.run_cycle(today()).await.unwrap();
        assert_eq!(report.continuity.retained, before);
        assert_eq!(stored(dir.path()).len(), before);

        // Two days on, grace has run out for everything except the event
        // dated that day.
        let report = offline.run_cycle(ymd(2025, 3, 22)).await.unwrap();
        assert_eq!(report.continuity.dropped, before - 1);
        let remaining = stored(dir.path());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].date, ymd(2025, 3, 22));
    }

    #[tokio::test]
    async fn test_newly_suppressed_stored_event_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), &[]);

        let mut pipeline_a = pipeline(dir.path(), &[(FEED_A, feed_a())]);
        pipeline_a.run_cycle(today()).await.unwrap();
        assert!(stored(dir.path()).iter().any(|e| e.identity == spam_identity()));

        // Suppressed while the feed is down: it must not be retained.
        write_sources(dir.path(), &[spam_identity()]);
        let mut offline = pipeline(dir.path(), &[]);
        offline.run_cycle(today()).await.unwrap();

        assert!(stored(dir.path()).iter().all(|e| e.identity != spam_identity()));
    }

    #[tokio::test]
    async fn test_missing_sources_file_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();

        let mut pipeline = pipeline(dir.path(), &[(FEED_A, feed_a())]);
        let err = pipeline.run_cycle(today()).await.unwrap_err();

        assert!(matches!(err, CalMergeError::Config(_)));
        assert!(!dir.path().join("data/canonical.json").exists());
        assert!(!dir.path().join("public/events.json").exists());
    }

    #[tokio::test]
    async fn test_keyword_classifier_fills_empty_categories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sources.toml"),
            format!("[[source]]\nid = \"b\"\nname = \"Source B\"\nurl = \"{FEED_B}\"\n"),
        )
        .unwrap();

        let body = calendar(&[vevent(
            "b-1",
            "Python Office Hours",
            "20250325T120000",
            "20250325T130000",
            "",
        )]);

        let mut config = PipelineConfig::with_base_dir(dir.path());
        config
            .classifier
            .taxonomy
            .insert("python".into(), vec!["python".into()]);
        let mut pipeline = Pipeline::new(
            config,
            StubFetcher {
                bodies: HashMap::from([(FEED_B.to_string(), body)]),
            },
            AddressNormalizer::new(StubLookup, Box::new(MemoryAddressCache::new())),
        );

        pipeline.run_cycle(today()).await.unwrap();

        let events = stored(dir.path());
        assert_eq!(events[0].categories, BTreeSet::from(["python".to_string()]));
        assert!(dir.path().join("data/category_cache.json").exists());
    }

    #[tokio::test]
    async fn test_failed_output_write_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), &[]);
        // A directory where the output file should go makes the final rename fail.
        std::fs::create_dir_all(dir.path().join("public/events.json")).unwrap();

        let mut pipeline = pipeline(dir.path(), &[(FEED_A, feed_a())]);
        assert!(pipeline.run_cycle(today()).await.is_err());

        assert!(!dir.path().join("data/canonical.json").exists());
    }

    #[tokio::test]
    async fn test_keyword_classifier_fills_direct_event_categories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sources.toml"),
            format!("[[source]]\nid = \"b\"\nname = \"Source B\"\nurl = \"{FEED_B}\"\n"),
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("events")).unwrap();
        std::fs::write(
            dir.path().join("events").join("python-sprint.toml"),
            "title = \"Python Sprint\"\ndate = \"2025-03-27\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("events").join("quiet-social.toml"),
            "title = \"Python Social\"\ndate = \"2025-03-28\"\ncategories = []\n",
        )
        .unwrap();

        let mut config = PipelineConfig::with_base_dir(dir.path());
        config
            .classifier
            .taxonomy
            .insert("python".into(), vec!["python".into()]);
        let mut pipeline = Pipeline::new(
            config,
            StubFetcher::default(),
            AddressNormalizer::new(StubLookup, Box::new(MemoryAddressCache::new())),
        );

        pipeline.run_cycle(today()).await.unwrap();

        let events = stored(dir.path());
        let sprint = events.iter().find(|e| e.identity == "python-sprint").unwrap();
        assert_eq!(sprint.categories, BTreeSet::from(["python".to_string()]));
        let social = events.iter().find(|e| e.identity == "quiet-social").unwrap();
        assert!(social.categories.is_empty());
    }
}
