use anyhow::{Context, Result};
use calmerge_core::PipelineConfig;
use calmerge_core::config::load_sources;

use crate::render::Render;

pub fn run(config: &PipelineConfig) -> Result<()> {
    let path = config.sources_path();
    let sources = load_sources(&path)
        .with_context(|| format!("Failed to load sources from {}", path.display()))?;

    if sources.is_empty() {
        println!("No sources configured in {}", path.display());
        return Ok(());
    }

    for source in &sources {
        println!("{}", source.render());
    }

    Ok(())
}
