//! Core of the calmerge event aggregation pipeline.
//!
//! This crate turns a set of calendar feeds into one canonical event list:
//! - `collector` fetches feeds and expands recurrences into instances
//! - `identity` and `suppress` key instances and drop unwanted ones
//! - `overrides`, `merge` and `direct` layer curated data on top
//! - `continuity` keeps events alive across missed fetches
//! - `address` normalizes locations through a cache-first lookup
//! - `pipeline` runs one cycle end to end

pub mod address;
pub mod aggregate;
pub mod categories;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod constants;
pub mod continuity;
pub mod direct;
pub mod error;
pub mod event;
pub mod ics;
pub mod identity;
pub mod merge;
pub mod overrides;
pub mod pipeline;
pub mod recurrence;
pub mod storage;
pub mod store;
pub mod suppress;
pub mod window;

// Re-export the event model at crate root for convenience
pub use event::*;

pub use config::{PipelineConfig, Source};
pub use error::{CalMergeError, CalMergeResult};
pub use pipeline::{CycleReport, Pipeline};
