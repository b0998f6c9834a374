//! # Kinesis SLR CLI (`kinesis-slr`)
//!
//! ```bash
//! kinesis-slr --config ./kinesis-slr.toml check
//! kinesis-slr --config ./kinesis-slr.toml scrape
//! kinesis-slr --config ./kinesis-slr.toml replay
//! ```
//!
//! Logging follows `RUST_LOG` when set, otherwise the `log_level` key of the
//! configuration file.

use anyhow::Context;
use aws_config::{BehaviorVersion, Region};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kinesis_slr::{load_config, ConfigFile, Replayer, Scraper};

#[derive(Parser)]
#[command(
    name = "kinesis-slr",
    about = "Scrape Kinesis shards to disk and replay them to a Lambda function",
    version
)]
struct Cli {
    /// Path to the configuration file (TOML)
    #[arg(long, global = true, default_value = "./kinesis-slr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy records from the configured shards into the scraped events directory
    Scrape,
    /// Replay scraped records to the configured Lambda function
    Replay,
    /// Validate the configuration file without touching AWS or the disk
    Check,
}

fn init_tracing(file: &ConfigFile) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(file.log_level.map_or("info", |level| level.as_directive()))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn sdk_config(region: Option<&str>) -> aws_config::SdkConfig {
    let loader = aws_config::defaults(BehaviorVersion::latest());
    match region {
        Some(region) => loader.region(Region::new(region.to_string())).load().await,
        None => loader.load().await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_config(&cli.config)
        .with_context(|| format!("Loading {}", cli.config.display()))?;
    init_tracing(&file);

    match cli.command {
        Commands::Check => {
            if file.scrape.is_none() && file.replay.is_none() {
                anyhow::bail!("Neither a [scrape] nor a [replay] section is present");
            }
            if file.scrape.is_some() {
                println!("{:#?}", file.scrape_config()?);
            }
            if file.replay.is_some() {
                println!("{:#?}", file.replay_config()?);
            }
            println!("Configuration is valid");
        }
        Commands::Scrape => {
            let config = file.scrape_config()?;
            let sdk = sdk_config(config.region()).await;
            info!(stream = %config.stream_name(), "Loaded AWS configuration");

            let scraper = Scraper::new(aws_sdk_kinesis::Client::new(&sdk), config);
            let summary = scraper.begin_scraping().await.context("Scrape failed")?;
            println!("{}", summary);
        }
        Commands::Replay => {
            let config = file.replay_config()?;
            let sdk = sdk_config(Some(config.region())).await;
            info!(
                function = %config.function_name(),
                stream = %config.stream_name(),
                "Loaded AWS configuration"
            );

            let replayer = Replayer::new(aws_sdk_lambda::Client::new(&sdk), config);
            let summary = replayer.begin_processing().await.context("Replay failed")?;
            println!("{}", summary);
        }
    }

    Ok(())
}
