//! Per-identity override records (overrides/<identity>.toml).

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::EventClock;

/// Partial event whose present fields replace the feed instance's values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeSet<String>>,
}

/// Load every override in `dir`, keyed by the file stem (the identity hash).
///
/// A missing directory means no overrides. Files that fail to read or parse
/// are logged and treated as absent.
pub fn load_overrides(dir: &Path) -> HashMap<String, OverrideRecord> {
    let mut overrides = HashMap::new();

    if !dir.exists() {
        debug!("No overrides directory at {}", dir.display());
        return overrides;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not read overrides directory {}: {e}", dir.display());
            return overrides;
        }
    };

    for path in entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|e| e == "toml"))
    {
        let Some(identity) = path.file_stem().map(|s| s.to_string_lossy().trim().to_lowercase())
        else {
            continue;
        };

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                toml::from_str::<OverrideRecord>(&content).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(record) => {
                overrides.insert(identity, record);
            }
            Err(e) => warn!("Ignoring override {}: {e}", path.display()),
        }
    }

    overrides
}
