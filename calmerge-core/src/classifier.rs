//! Category enrichment for events that resolve to no categories.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CalMergeResult;
use crate::event::CanonicalEvent;
use crate::storage::{read_json_lenient, write_json_atomic};

/// Suggests category tags for an event.
pub trait CategoryClassifier: Send + Sync {
    fn classify(
        &self,
        title: &str,
        source_name: &str,
        description: Option<&str>,
        url: Option<&str>,
    ) -> CalMergeResult<BTreeSet<String>>;
}

/// Case-insensitive keyword matching over title and description.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    taxonomy: BTreeMap<String, Vec<String>>,
}

impl KeywordClassifier {
    pub fn new(taxonomy: &BTreeMap<String, Vec<String>>) -> Self {
        let taxonomy = taxonomy
            .iter()
            .map(|(tag, keywords)| {
                let keywords: Vec<String> = keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                (tag.trim().to_lowercase(), keywords)
            })
            .filter(|(tag, _)| !tag.is_empty())
            .collect();

        KeywordClassifier { taxonomy }
    }

    pub fn is_empty(&self) -> bool {
        self.taxonomy.is_empty()
    }
}

impl CategoryClassifier for KeywordClassifier {
    fn classify(
        &self,
        title: &str,
        _source_name: &str,
        description: Option<&str>,
        _url: Option<&str>,
    ) -> CalMergeResult<BTreeSet<String>> {
        let haystack = format!("{}\n{}", title, description.unwrap_or_default()).to_lowercase();

        Ok(self
            .taxonomy
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k.as_str())))
            .map(|(tag, _)| tag.clone())
            .collect())
    }
}

/// md5 of the taxonomy with tags and keywords sorted and lowercased.
pub fn taxonomy_fingerprint(taxonomy: &BTreeMap<String, Vec<String>>) -> String {
    let mut hasher = Md5::new();
    let normalized: BTreeMap<String, BTreeSet<String>> = taxonomy
        .iter()
        .map(|(tag, keywords)| {
            (
                tag.trim().to_lowercase(),
                keywords.iter().map(|k| k.trim().to_lowercase()).collect(),
            )
        })
        .collect();

    for (tag, keywords) in &normalized {
        hasher.update(tag.as_bytes());
        hasher.update(b":");
        for keyword in keywords {
            hasher.update(keyword.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\n");
    }

    hex::encode(hasher.finalize())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    fingerprint: String,
    entries: BTreeMap<String, BTreeSet<String>>,
}

/// Identity to tags, invalidated wholesale when the taxonomy changes.
#[derive(Debug)]
pub struct ClassifierCache {
    path: Option<PathBuf>,
    data: CacheFile,
    dirty: bool,
}

impl ClassifierCache {
    pub fn load(path: &Path, fingerprint: &str) -> Self {
        let data = match read_json_lenient::<CacheFile>(path) {
            Some(data) if data.fingerprint == fingerprint => data,
            Some(_) => {
                info!("Taxonomy changed, discarding category cache");
                CacheFile::default()
            }
            None => CacheFile::default(),
        };

        ClassifierCache {
            path: Some(path.to_path_buf()),
            data: CacheFile {
                fingerprint: fingerprint.to_string(),
                entries: data.entries,
            },
            dirty: false,
        }
    }

    pub fn in_memory(fingerprint: &str) -> Self {
        ClassifierCache {
            path: None,
            data: CacheFile {
                fingerprint: fingerprint.to_string(),
                entries: BTreeMap::new(),
            },
            dirty: false,
        }
    }

    pub fn get(&self, identity: &str) -> Option<&BTreeSet<String>> {
        self.data.entries.get(identity)
    }

    pub fn insert(&mut self, identity: &str, tags: BTreeSet<String>) {
        self.data.entries.insert(identity.to_string(), tags);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    pub fn save(&self) -> CalMergeResult<()> {
        match &self.path {
            Some(path) if self.dirty => write_json_atomic(path, &self.data),
            _ => Ok(()),
        }
    }
}

/// Fill `event.categories` from the cache or the classifier.
///
/// Classifier errors are logged and leave the event untouched.
pub fn enrich<C: CategoryClassifier + ?Sized>(
    classifier: &C,
    cache: &mut ClassifierCache,
    event: &mut CanonicalEvent,
    source_name: &str,
) {
    if let Some(tags) = cache.get(&event.identity) {
        event.categories = tags.clone();
        return;
    }

    match classifier.classify(
        &event.title,
        source_name,
        event.description.as_deref(),
        event.url.as_deref(),
    ) {
        Ok(tags) => {
            debug!("Classified {event} as {tags:?}");
            cache.insert(&event.identity, tags.clone());
            event.categories = tags;
        }
        Err(e) => warn!("Category classification failed for {event}: {e}"),
    }
}
