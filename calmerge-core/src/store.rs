//! The persisted canonical collection.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CalMergeResult;
use crate::event::CanonicalEvent;
use crate::storage::{read_json, write_json_atomic};

pub struct CanonicalStore {
    path: PathBuf,
}

impl CanonicalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CanonicalStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The previous cycle's events. A missing store is an empty collection.
    ///
    /// A corrupt store is an error: retaining nothing would drop every event
    /// that the current fetch happens to miss.
    pub fn load(&self) -> CalMergeResult<Vec<CanonicalEvent>> {
        let events: Vec<CanonicalEvent> = read_json(&self.path)?.unwrap_or_default();
        debug!("Loaded {} canonical events from {}", events.len(), self.path.display());
        Ok(events)
    }

    pub fn save(&self, events: &[CanonicalEvent]) -> CalMergeResult<()> {
        write_json_atomic(&self.path, events)
    }
}
