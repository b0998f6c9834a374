//! Replay engine
//!
//! Replays scraped shard directories to a Lambda function in ordered
//! batches, the way an event source mapping would have delivered them.
//! The engine works purely from local state; no stream API is called.
//!
//! Per shard, every file is validated and decoded before anything is
//! invoked, so a corrupt directory is skipped as a whole instead of being
//! half replayed. A batch the function rejects is copied to the local
//! dead-letter directory and replay moves on to the next batch. A failure
//! to reach the function ends the run.

use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::ReplayConfig;
use crate::error::{Result, SlrError};
use crate::lambda::LambdaClientTrait;
use crate::record::StreamRecord;
use crate::store::{DeadLetterStore, RecordStore};

pub mod batch;
pub mod envelope;

pub use batch::{partition, ReplayBatch};
pub use envelope::{EventRecord, InvocationEnvelope};

/// Outcome of replaying one shard directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardReplayReport {
    pub shard_id: String,
    pub records_replayed: u64,
    pub batches_delivered: u64,
    pub batches_dead_lettered: u64,
    /// Set when a malformed record file stopped the shard
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub shards: Vec<ShardReplayReport>,
}

impl ReplaySummary {
    pub fn shard(&self, shard_id: &str) -> Option<&ShardReplayReport> {
        self.shards.iter().find(|s| s.shard_id == shard_id)
    }

    pub fn batches_delivered(&self) -> u64 {
        self.shards.iter().map(|s| s.batches_delivered).sum()
    }

    pub fn batches_dead_lettered(&self) -> u64 {
        self.shards.iter().map(|s| s.batches_dead_lettered).sum()
    }
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for shard in &self.shards {
            match &shard.skipped {
                Some(reason) => writeln!(f, "{}: skipped ({})", shard.shard_id, reason)?,
                None => writeln!(
                    f,
                    "{}: {} records, {} batches delivered, {} dead-lettered",
                    shard.shard_id,
                    shard.records_replayed,
                    shard.batches_delivered,
                    shard.batches_dead_lettered
                )?,
            }
        }
        write!(
            f,
            "Batches delivered: {}, dead-lettered: {}",
            self.batches_delivered(),
            self.batches_dead_lettered()
        )
    }
}

pub struct Replayer<L>
where
    L: LambdaClientTrait,
{
    client: L,
    config: ReplayConfig,
    store: RecordStore,
    dlq: DeadLetterStore,
}

impl<L> Replayer<L>
where
    L: LambdaClientTrait,
{
    pub fn new(client: L, config: ReplayConfig) -> Self {
        let store = RecordStore::new(config.scraped_events_dir());
        let dlq = DeadLetterStore::new(config.dlq_dir(), config.dlq_events_dir());
        Self {
            client,
            config,
            store,
            dlq,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub async fn begin_processing(&self) -> Result<ReplaySummary> {
        info!(
            function = %self.config.function_name(),
            source = %self.config.event_source_arn(),
            batch_size = self.config.batch_size(),
            "Starting replay"
        );
        if self.config.retry_attempts() > 0 {
            warn!(
                retry_attempts = self.config.retry_attempts(),
                "Automatic retries are not performed; failed batches go to the dead-letter directory"
            );
        }

        let shards = self.target_shards().await?;
        let mut summary = ReplaySummary::default();

        for shard_id in shards {
            let mut report = ShardReplayReport {
                shard_id: shard_id.clone(),
                ..Default::default()
            };

            match self.replay_shard(&shard_id, &mut report).await {
                Ok(()) => info!(
                    shard_id = %shard_id,
                    records = report.records_replayed,
                    delivered = report.batches_delivered,
                    dead_lettered = report.batches_dead_lettered,
                    "Finished replaying shard"
                ),
                Err(e @ SlrError::MalformedRecordFile { .. }) => {
                    error!(shard_id = %shard_id, error = %e, "Skipping shard");
                    report.skipped = Some(e.to_string());
                }
                Err(e) => {
                    error!(shard_id = %shard_id, error = %e, "Replay aborted");
                    return Err(e);
                }
            }
            summary.shards.push(report);
        }

        info!(
            delivered = summary.batches_delivered(),
            dead_lettered = summary.batches_dead_lettered(),
            "Replay complete"
        );
        Ok(summary)
    }

    async fn target_shards(&self) -> Result<Vec<String>> {
        if self.config.shard_ids().is_empty() {
            return self.store.list_shards().await;
        }

        for shard_id in self.config.shard_ids() {
            if !self.store.shard_dir_exists(shard_id).await? {
                return Err(SlrError::config(format!(
                    "No scraped events directory for shard {} under {}",
                    shard_id,
                    self.store.root().display()
                )));
            }
        }
        Ok(self.config.shard_ids().to_vec())
    }

    async fn replay_shard(&self, shard_id: &str, report: &mut ShardReplayReport) -> Result<()> {
        let files = self.store.list_shard_files(shard_id).await?;

        debug!(shard_id = %shard_id, files = files.len(), "Checking record files before replay");
        for file in &files {
            self.store.read_record(file).await?;
        }
        debug!(shard_id = %shard_id, files = files.len(), "All record files are valid");

        let batches = partition(shard_id, files, self.config.batch_size() as usize)?;
        for (index, batch) in batches.iter().enumerate() {
            let records = self.load_batch(batch).await?;
            let envelope = batch.build_envelope(
                &records,
                self.config.region(),
                &self.config.event_source_arn(),
            )?;
            let payload = serde_json::to_vec(&envelope).map_err(|e| {
                SlrError::Internal(format!("Failed to serialize invocation payload: {}", e))
            })?;

            debug!(
                shard_id = %shard_id,
                batch = index + 1,
                first = %batch.first_file(),
                last = %batch.last_file(),
                records = records.len(),
                "Invoking function"
            );

            let outcome = self
                .client
                .invoke(self.config.function_name(), payload.clone())
                .await?;

            match outcome.failure_reason() {
                None => {
                    report.batches_delivered += 1;
                    report.records_replayed += records.len() as u64;
                }
                Some(reason) => {
                    warn!(
                        shard_id = %shard_id,
                        batch = index + 1,
                        first = %batch.first_file(),
                        last = %batch.last_file(),
                        reason = %reason,
                        "Function failed to process batch"
                    );
                    self.dead_letter(batch, &records, &payload).await?;
                    report.batches_dead_lettered += 1;
                }
            }
        }
        Ok(())
    }

    async fn load_batch(&self, batch: &ReplayBatch) -> Result<Vec<StreamRecord>> {
        let mut records = Vec::with_capacity(batch.len());
        for file in batch.files() {
            records.push(self.store.read_record(file).await?);
        }
        Ok(records)
    }

    async fn dead_letter(
        &self,
        batch: &ReplayBatch,
        records: &[StreamRecord],
        payload: &[u8],
    ) -> Result<()> {
        if !self.config.local_dlq() {
            error!(
                shard_id = %batch.shard_id(),
                first = %batch.first_file(),
                last = %batch.last_file(),
                "Local dead-letter directory disabled, failed batch is not kept"
            );
            return Ok(());
        }

        self.dlq.copy_batch(batch.shard_id(), batch.files()).await?;

        if self.config.local_dlq_full_event() {
            if let (Some(first), Some(last)) = (records.first(), records.last()) {
                let path = self
                    .dlq
                    .write_event(
                        batch.shard_id(),
                        first.sequence_number(),
                        last.sequence_number(),
                        payload,
                    )
                    .await?;
                debug!(path = %path.display(), "Wrote failed event payload");
            }
        }
        Ok(())
    }
}
