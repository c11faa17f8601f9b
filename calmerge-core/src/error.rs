//! Error types for the calmerge pipeline.

use thiserror::Error;

/// Errors that can occur while collecting and merging events.
#[derive(Error, Debug)]
pub enum CalMergeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed fetch failed for {url}: {reason}")]
    FeedFetch { url: String, reason: String },

    #[error("Feed request timed out after {0}s")]
    FeedTimeout(u64),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("Recurrence error: {0}")]
    Recurrence(String),

    #[error("Address lookup failed: {0}")]
    Lookup(String),

    #[error("Address lookup timed out after {0}s")]
    LookupTimeout(u64),

    #[error("Missing credentials for {0}")]
    MissingCredentials(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CalMergeError {
    /// Whether the error only affects one source, entry or lookup.
    ///
    /// Configuration errors are the only ones that abort a run.
    pub fn is_contained(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

/// Result type alias for calmerge operations.
pub type CalMergeResult<T> = Result<T, CalMergeError>;
