mod commands;
mod render;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use calmerge_core::PipelineConfig;
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "calmerge")]
#[command(about = "Collect calendar feeds and merge them into one canonical event list")]
struct Cli {
    /// Path to calmerge.toml (defaults to ./calmerge.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one collection cycle
    Run {
        /// Cycle date (YYYY-MM-DD), defaults to today in the reference timezone
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the identity hash of an event, for writing overrides and suppressions
    Identity {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Start time (HH:MM), omit for all-day events
        #[arg(long, value_parser = parse_time)]
        time: Option<NaiveTime>,

        #[arg(long)]
        title: String,

        #[arg(long)]
        url: Option<String>,
    },
    /// Resolve one location through the address service
    Address { raw: String },
    /// List configured sources
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { date } => {
            let config = load_config(cli.config.as_deref())?;
            commands::run::run(config, date).await
        }
        Commands::Identity {
            date,
            time,
            title,
            url,
        } => commands::identity::run(date, time, &title, url.as_deref()),
        Commands::Address { raw } => {
            let config = load_config(cli.config.as_deref())?;
            commands::address::run(config, &raw).await
        }
        Commands::Sources => {
            let config = load_config(cli.config.as_deref())?;
            commands::sources::run(&config)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let path = PipelineConfig::locate(explicit)?;
    PipelineConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| format!("expected HH:MM, got '{value}'"))
}
