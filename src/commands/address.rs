use anyhow::Result;
use calmerge_core::PipelineConfig;
use calmerge_core::address::{AddressNormalizer, GeocodeClient, JsonAddressCache, Resolution};
use owo_colors::OwoColorize;

pub async fn run(config: PipelineConfig, raw: &str) -> Result<()> {
    let lookup = GeocodeClient::new(&config.geocoder)?;
    let cache = JsonAddressCache::load(&config.address_cache_file());
    let mut normalizer = AddressNormalizer::new(lookup, Box::new(cache));

    let (value, resolution) = normalizer.resolve(raw).await;
    normalizer.save()?;

    let how = match resolution {
        Resolution::Blank => "blank".dimmed().to_string(),
        Resolution::Cached => "cached".green().to_string(),
        Resolution::Primary => "lookup, cached".green().to_string(),
        Resolution::Fallback => "fallback, not cached".yellow().to_string(),
    };

    match value {
        Some(value) => println!("{value} ({how})"),
        None => println!("{}", "(no location)".dimmed()),
    }

    Ok(())
}
