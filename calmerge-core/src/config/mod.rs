//! Configuration for calmerge deployments.

pub mod pipeline_config;
pub mod source;

pub use pipeline_config::{ClassifierConfig, GeocoderConfig, PipelineConfig};
pub use source::{Source, load_sources};
