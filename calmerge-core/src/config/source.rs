//! Feed source records (sources.toml).

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CalMergeError, CalMergeResult};

fn default_active() -> bool {
    true
}

/// One calendar feed and its per-source rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    /// iCal (or RSS/Atom wrapped iCal) feed URL
    pub url: String,
    /// Used for entries that carry no URL of their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub suppress_urls: BTreeSet<String>,
    #[serde(default)]
    pub suppress_guid: BTreeSet<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
}

impl Source {
    pub fn new(id: &str, name: &str, url: &str) -> Self {
        Source {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            fallback_url: None,
            active: true,
            suppress_urls: BTreeSet::new(),
            suppress_guid: BTreeSet::new(),
            categories: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default, rename = "source")]
    sources: Vec<Source>,
}

/// Load all sources from `sources.toml`.
///
/// Failing to read or parse this file aborts the run: without it the
/// pipeline cannot tell an empty feed from a broken deployment.
pub fn load_sources(path: &Path) -> CalMergeResult<Vec<Source>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CalMergeError::Config(format!(
            "Could not read sources file {}: {e}",
            path.display()
        ))
    })?;

    let file: SourcesFile = toml::from_str(&content).map_err(|e| {
        CalMergeError::Config(format!(
            "Could not parse sources file {}: {e}",
            path.display()
        ))
    })?;

    let mut seen = HashSet::new();
    for source in &file.sources {
        if source.id.trim().is_empty() {
            return Err(CalMergeError::Config(format!(
                "Source '{}' has an empty id",
                source.name
            )));
        }
        if !seen.insert(source.id.as_str()) {
            return Err(CalMergeError::Config(format!(
                "Duplicate source id '{}'",
                source.id
            )));
        }
    }

    Ok(file.sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_sources_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.toml");
        std::fs::write(
            &path,
            r#"
[[source]]
id = "dc-rust"
name = "DC Rust"
url = "https://example.com/rust.ics"
categories = ["rust"]
suppress_guid = ["abcd1234"]

[[source]]
id = "old"
name = "Old Group"
url = "https://example.com/old.ics"
active = false
"#,
        )
        .unwrap();

        let sources = load_sources(&path).unwrap();

        assert_eq!(sources.len(), 2);
        assert!(sources[0].active);
        assert!(sources[0].suppress_guid.contains("abcd1234"));
        assert!(sources[0].fallback_url.is_none());
        assert!(!sources[1].active);
    }

    #[test]
    fn test_missing_sources_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_sources(&dir.path().join("sources.toml")).unwrap_err();
        assert!(!err.is_contained());
    }

    #[test]
    fn test_malformed_sources_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.toml");
        std::fs::write(&path, "[[source]]\nname = 42\n").unwrap();

        assert!(matches!(
            load_sources(&path).unwrap_err(),
            CalMergeError::Config(_)
        ));
    }

    #[test]
    fn test_duplicate_source_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.toml");
        std::fs::write(
            &path,
            r#"
[[source]]
id = "a"
name = "A"
url = "https://example.com/a.ics"

[[source]]
id = "a"
name = "A again"
url = "https://example.com/a2.ics"
"#,
        )
        .unwrap();

        assert!(load_sources(&path).is_err());
    }
}
