// tests/common/mod.rs
#![allow(dead_code)]

use kinesis_slr::config::{ReplaySettings, ScrapeSettings};
use kinesis_slr::{ReplayConfig, ScrapeConfig};
use std::path::{Path, PathBuf};
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kinesis_slr=debug")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn scraped_events_dir(root: &Path) -> PathBuf {
    root.join("scraped_events")
}

pub fn dlq_dir(root: &Path) -> PathBuf {
    root.join("dlq")
}

pub fn scrape_config(root: &Path, settings: ScrapeSettings) -> ScrapeConfig {
    ScrapeConfig::try_from(ScrapeSettings {
        stream_name: "user-activities".to_string(),
        poll_delay: 0.0,
        scraped_events_dir: scraped_events_dir(root),
        ..settings
    })
    .expect("valid scrape settings")
}

pub fn replay_config(root: &Path, settings: ReplaySettings) -> ReplayConfig {
    ReplayConfig::try_from(ReplaySettings {
        function_name: "kworker".to_string(),
        stream_name: "user-activities".to_string(),
        region: "us-east-1".to_string(),
        account_id: "443035303084".to_string(),
        scraped_events_dir: scraped_events_dir(root),
        dlq_dir: dlq_dir(root),
        dlq_events_dir: root.join("dlq_events"),
        ..settings
    })
    .expect("valid replay settings")
}
