use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

use super::{sanitize_shard_id, PersistedRecordFile};
use crate::error::{Result, SlrError};

/// Local dead-letter directory for batches the target function rejected
///
/// Record copies and full invocation payloads live under separate roots, so
/// `root` can be pointed at as a scraped events directory for a re-drive.
#[derive(Debug, Clone)]
pub struct DeadLetterStore {
    root: PathBuf,
    events_root: PathBuf,
}

impl DeadLetterStore {
    pub fn new(root: impl Into<PathBuf>, events_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            events_root: events_root.into(),
        }
    }

    pub fn shard_dir(&self, shard_id: &str) -> PathBuf {
        self.root.join(sanitize_shard_id(shard_id))
    }

    /// Copy record files byte for byte, keeping their names
    ///
    /// A file already present under the same name is replaced, so dead
    /// lettering the same batch twice leaves one copy.
    pub async fn copy_batch(
        &self,
        shard_id: &str,
        files: &[PersistedRecordFile],
    ) -> Result<Vec<PathBuf>> {
        let dir = self.shard_dir(shard_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SlrError::io(&dir, e))?;

        let mut copied = Vec::with_capacity(files.len());
        for file in files {
            let target = dir.join(file.file_name());
            if fs::try_exists(&target).await.unwrap_or(false) {
                warn!(
                    shard_id = %shard_id,
                    file = %file.file_name(),
                    "Replacing existing dead-letter copy"
                );
            }
            fs::copy(file.path(), &target)
                .await
                .map_err(|e| SlrError::io(file.path(), e))?;
            copied.push(target);
        }

        debug!(
            shard_id = %shard_id,
            files = copied.len(),
            dir = %dir.display(),
            "Copied batch to dead-letter directory"
        );
        Ok(copied)
    }

    /// Keep the full invocation payload of a failed batch
    pub async fn write_event(
        &self,
        shard_id: &str,
        first_sequence: &str,
        last_sequence: &str,
        payload: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.events_root.join(sanitize_shard_id(shard_id));
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SlrError::io(&dir, e))?;

        let path = dir.join(format!("{}-{}.json", first_sequence, last_sequence));
        fs::write(&path, payload)
            .await
            .map_err(|e| SlrError::io(&path, e))?;
        Ok(path)
    }
}
