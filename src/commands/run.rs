use anyhow::Result;
use calmerge_core::window::CollectionWindow;
use calmerge_core::{Pipeline, PipelineConfig};
use chrono::NaiveDate;
use owo_colors::OwoColorize;

use crate::render::Render;

pub async fn run(config: PipelineConfig, date: Option<NaiveDate>) -> Result<()> {
    let today = match date {
        Some(date) => date,
        None => CollectionWindow::today_in(config.tz()?),
    };
    let store = config.store_file();
    let output = config.output_file();

    let mut pipeline = Pipeline::from_config(config)?;
    let report = pipeline.run_cycle(today).await?;

    println!("{}", report.render());
    println!("\nWrote {}", store.display().dimmed());
    if let Some(output) = output {
        println!("Wrote {}", output.display().dimmed());
    }

    Ok(())
}
