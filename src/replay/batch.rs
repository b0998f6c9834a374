use super::envelope::{EventRecord, InvocationEnvelope};
use crate::error::{Result, SlrError};
use crate::record::StreamRecord;
use crate::store::PersistedRecordFile;

/// Consecutive record files of one shard, replayed in a single invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayBatch {
    shard_id: String,
    files: Vec<PersistedRecordFile>,
}

impl ReplayBatch {
    pub fn new(shard_id: impl Into<String>, files: Vec<PersistedRecordFile>) -> Result<Self> {
        let shard_id = shard_id.into();
        if files.is_empty() {
            return Err(SlrError::InvalidArgument(format!(
                "A replay batch for shard {} must hold at least one file",
                shard_id
            )));
        }
        if let Some(foreign) = files.iter().find(|f| f.shard_id() != shard_id) {
            return Err(SlrError::InvalidArgument(format!(
                "File {} belongs to shard {}, not {}",
                foreign.file_name(),
                foreign.shard_id(),
                shard_id
            )));
        }
        Ok(Self { shard_id, files })
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn files(&self) -> &[PersistedRecordFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn first_file(&self) -> &str {
        self.files.first().map_or("", |f| f.file_name())
    }

    pub fn last_file(&self) -> &str {
        self.files.last().map_or("", |f| f.file_name())
    }

    /// Envelope for this batch's decoded records, in batch order
    pub fn build_envelope(
        &self,
        records: &[StreamRecord],
        region: &str,
        event_source_arn: &str,
    ) -> Result<InvocationEnvelope> {
        if records.len() != self.files.len() {
            return Err(SlrError::Internal(format!(
                "Batch of {} files for shard {} decoded into {} records",
                self.files.len(),
                self.shard_id,
                records.len()
            )));
        }
        Ok(InvocationEnvelope {
            records: records
                .iter()
                .map(|record| EventRecord::new(&self.shard_id, record, region, event_source_arn))
                .collect(),
        })
    }
}

/// Split an ordered file list into consecutive batches of at most `batch_size`
pub fn partition(
    shard_id: &str,
    files: Vec<PersistedRecordFile>,
    batch_size: usize,
) -> Result<Vec<ReplayBatch>> {
    if batch_size == 0 {
        return Err(SlrError::InvalidArgument(
            "batch_size must be at least 1".to_string(),
        ));
    }
    files
        .chunks(batch_size)
        .map(|chunk| ReplayBatch::new(shard_id, chunk.to_vec()))
        .collect()
}
