//! Scrape engine
//!
//! Reads a range of records from each target shard and persists them under
//! the scraped events directory. Shards are scraped one after another and
//! every page fetch is awaited before the next one is issued:
//!
//! 1. Describe the stream and resolve the target shards
//! 2. Apply the existing-directory policy before any page is fetched
//! 3. Per shard: acquire an iterator, then sleep / fetch / admit / persist
//!    until the poll policy or the shard itself ends the loop

use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::client::KinesisClientTrait;
use crate::config::{ExistingShardDirPolicy, ScrapeConfig};
use crate::error::{Result, SlrError};
use crate::iterator::ShardIteratorManager;
use crate::poll::{PollPolicy, ShardIterationState, StopReason};
use crate::store::RecordStore;

/// Outcome of scraping one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardScrapeReport {
    pub shard_id: String,
    pub records_persisted: u64,
    pub polls: u64,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub shards: Vec<ShardScrapeReport>,
}

impl ScrapeSummary {
    pub fn total_records(&self) -> u64 {
        self.shards.iter().map(|s| s.records_persisted).sum()
    }

    pub fn shard(&self, shard_id: &str) -> Option<&ShardScrapeReport> {
        self.shards.iter().find(|s| s.shard_id == shard_id)
    }
}

impl fmt::Display for ScrapeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for shard in &self.shards {
            writeln!(
                f,
                "{}: {} records in {} polls ({:?})",
                shard.shard_id, shard.records_persisted, shard.polls, shard.stop_reason
            )?;
        }
        write!(f, "Total records persisted: {}", self.total_records())
    }
}

pub struct Scraper<C>
where
    C: KinesisClientTrait,
{
    client: C,
    config: ScrapeConfig,
    store: RecordStore,
    policy: PollPolicy,
}

impl<C> Scraper<C>
where
    C: KinesisClientTrait,
{
    pub fn new(client: C, config: ScrapeConfig) -> Self {
        let store = RecordStore::new(config.scraped_events_dir());
        let policy = PollPolicy::new(&config);
        Self {
            client,
            config,
            store,
            policy,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub async fn begin_scraping(&self) -> Result<ScrapeSummary> {
        info!(
            stream = %self.config.stream_name(),
            starting_position = %self.config.starting_position(),
            ending_position = ?self.config.ending_position(),
            "Starting scrape"
        );

        let targets = self.resolve_target_shards().await?;
        self.check_existing_shard_dirs(&targets).await?;

        let mut iterators = ShardIteratorManager::new(
            self.config.stream_name(),
            self.config.starting_position().clone(),
        );
        let mut summary = ScrapeSummary::default();

        for shard_id in &targets {
            let report = self
                .scrape_shard(&mut iterators, shard_id)
                .await
                .map_err(|e| {
                    error!(shard_id = %shard_id, error = %e, "Shard scrape failed");
                    e
                })?;

            info!(
                shard_id = %shard_id,
                records = report.records_persisted,
                polls = report.polls,
                stop_reason = ?report.stop_reason,
                "Finished scraping shard"
            );
            summary.shards.push(report);
        }

        info!(
            stream = %self.config.stream_name(),
            shards = summary.shards.len(),
            records = summary.total_records(),
            "Scrape complete"
        );
        Ok(summary)
    }

    /// Configured shards, or every detected shard when none are configured
    async fn resolve_target_shards(&self) -> Result<Vec<String>> {
        let detected = self
            .client
            .describe_stream(self.config.stream_name())
            .await?;
        debug!(shards = ?detected, "Detected shards");

        if self.config.shard_ids().is_empty() {
            return Ok(detected);
        }

        let known: HashSet<&str> = detected.iter().map(String::as_str).collect();
        if let Some(missing) = self
            .config
            .shard_ids()
            .iter()
            .find(|id| !known.contains(id.as_str()))
        {
            return Err(SlrError::config(format!(
                "Shard id \"{}\" was not found in stream {}. Detected shards: {:?}",
                missing,
                self.config.stream_name(),
                detected
            )));
        }
        Ok(self.config.shard_ids().to_vec())
    }

    async fn check_existing_shard_dirs(&self, targets: &[String]) -> Result<()> {
        for shard_id in targets {
            if !self.store.shard_dir_exists(shard_id).await? {
                continue;
            }
            match self.config.existing_shard_dir() {
                ExistingShardDirPolicy::Reject => {
                    return Err(SlrError::config(format!(
                        "Shard directory {} already exists. Move it away or set \
                         existing_shard_dir = \"continue\" to append after its files.",
                        self.store.shard_dir(shard_id).display()
                    )));
                }
                ExistingShardDirPolicy::Continue => {
                    warn!(
                        shard_id = %shard_id,
                        existing_files = self.store.count_files(shard_id).await?,
                        "Continuing into existing shard directory"
                    );
                }
            }
        }
        Ok(())
    }

    async fn scrape_shard(
        &self,
        iterators: &mut ShardIteratorManager,
        shard_id: &str,
    ) -> Result<ShardScrapeReport> {
        let iterator = iterators.initial_iterator(&self.client, shard_id).await?;
        let mut state = ShardIterationState::new(iterator);
        let mut stop_reason = StopReason::EndOfShard;
        let limit = self.config.poll_batch_size() as i32;

        while let Some(iterator) = state.iterator.take() {
            if !self.config.poll_delay().is_zero() {
                tokio::time::sleep(self.config.poll_delay()).await;
            }

            let page = self.client.get_records(&iterator, limit).await?;
            let admission = self
                .policy
                .admit_page(&mut state, &page.records, page.millis_behind_latest)?;

            debug!(
                shard_id = %shard_id,
                loop_count = state.loop_count,
                returned = page.records.len(),
                admitted = admission.admitted,
                total_found_records = state.total_found_records,
                consecutive_empty_polls = state.consecutive_empty_polls,
                millis_behind_latest = ?page.millis_behind_latest,
                "Polled shard"
            );

            if admission.admitted > 0 {
                self.store
                    .append_records(shard_id, &page.records[..admission.admitted])
                    .await?;
            }

            state.iterator = page.next_iterator.filter(|next| !next.is_empty());
            if admission.should_break {
                stop_reason = admission.reason.unwrap_or(StopReason::BoundReached);
                break;
            }
        }

        Ok(ShardScrapeReport {
            shard_id: shard_id.to_string(),
            records_persisted: state.total_found_records,
            polls: state.loop_count,
            stop_reason,
        })
    }
}
