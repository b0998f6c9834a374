use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use super::{record_file_name, sanitize_shard_id, PersistedRecordFile, MAX_ORDINAL};
use crate::error::{Result, SlrError};
use crate::record::{from_persisted_json, to_persistable_json, StreamRecord};

/// Append-only store of per-shard record files
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shard_dir(&self, shard_id: &str) -> PathBuf {
        self.root.join(sanitize_shard_id(shard_id))
    }

    pub async fn shard_dir_exists(&self, shard_id: &str) -> Result<bool> {
        let dir = self.shard_dir(shard_id);
        fs::try_exists(&dir)
            .await
            .map_err(|e| SlrError::io(dir, e))
    }

    /// Number of regular files in a shard directory; 0 when it does not exist
    pub async fn count_files(&self, shard_id: &str) -> Result<u64> {
        let dir = self.shard_dir(shard_id);
        if !self.shard_dir_exists(shard_id).await? {
            return Ok(0);
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| SlrError::io(&dir, e))?;
        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SlrError::io(&dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SlrError::io(entry.path(), e))?;
            if file_type.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Write each record to its own file, continuing the shard's ordinals
    ///
    /// Files are created exclusively; an existing file is never overwritten.
    pub async fn append_records(
        &self,
        shard_id: &str,
        records: &[StreamRecord],
    ) -> Result<Vec<PersistedRecordFile>> {
        let dir = self.shard_dir(shard_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SlrError::io(&dir, e))?;

        let mut ordinal = self.count_files(shard_id).await?;
        debug!(
            shard_id = %shard_id,
            existing_files = ordinal,
            records = records.len(),
            "Persisting records"
        );

        let mut written = Vec::with_capacity(records.len());
        for record in records {
            ordinal += 1;
            if ordinal > MAX_ORDINAL {
                return Err(SlrError::InvalidArgument(format!(
                    "Shard {} already holds {} record files",
                    shard_id, MAX_ORDINAL
                )));
            }

            let file_name = record_file_name(ordinal, &record.arrival_timestamp());
            let path = dir.join(&file_name);
            let contents = to_persistable_json(record)?;

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => SlrError::FileAlreadyExists {
                        path: path.clone(),
                    },
                    _ => SlrError::io(&path, e),
                })?;
            file.write_all(&contents)
                .await
                .map_err(|e| SlrError::io(&path, e))?;
            file.flush().await.map_err(|e| SlrError::io(&path, e))?;

            trace!(
                shard_id = %shard_id,
                file = %file_name,
                sequence = %record.sequence_number(),
                "Wrote record file"
            );

            written.push(PersistedRecordFile::parse(shard_id, &dir, &file_name)?);
        }

        Ok(written)
    }

    /// Names of every shard directory under the root, sorted
    pub async fn list_shards(&self) -> Result<Vec<String>> {
        if !fs::try_exists(&self.root)
            .await
            .map_err(|e| SlrError::io(&self.root, e))?
        {
            return Err(SlrError::InvalidArgument(format!(
                "Scraped events directory {} does not exist",
                self.root.display()
            )));
        }

        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| SlrError::io(&self.root, e))?;
        let mut shards = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SlrError::io(&self.root, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SlrError::io(entry.path(), e))?;
            if file_type.is_dir() {
                shards.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        shards.sort();
        Ok(shards)
    }

    /// Every record file of a shard in scrape order
    ///
    /// Only regular files are considered, the same entries `count_files`
    /// numbers. Fails with `MalformedRecordFile` on the first file that is not
    /// a record file, so a corrupt directory is never partially replayed.
    pub async fn list_shard_files(&self, shard_id: &str) -> Result<Vec<PersistedRecordFile>> {
        let dir = self.shard_dir(shard_id);
        if !self.shard_dir_exists(shard_id).await? {
            return Err(SlrError::InvalidArgument(format!(
                "Scraped shard directory {} does not exist",
                dir.display()
            )));
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| SlrError::io(&dir, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SlrError::io(&dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SlrError::io(entry.path(), e))?;
            if file_type.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        let mut files = names
            .iter()
            .map(|name| PersistedRecordFile::parse(shard_id, &dir, name))
            .collect::<Result<Vec<_>>>()?;
        files.sort_by(|a, b| {
            a.ordinal()
                .cmp(&b.ordinal())
                .then_with(|| a.file_name().cmp(b.file_name()))
        });
        Ok(files)
    }

    pub async fn read_bytes(&self, file: &PersistedRecordFile) -> Result<Vec<u8>> {
        fs::read(file.path())
            .await
            .map_err(|e| SlrError::io(file.path(), e))
    }

    /// Decode a record file, reporting failures against the file
    pub async fn read_record(&self, file: &PersistedRecordFile) -> Result<StreamRecord> {
        let bytes = self.read_bytes(file).await?;
        from_persisted_json(&bytes).map_err(|e| SlrError::MalformedRecordFile {
            shard_id: file.shard_id().to_string(),
            file_name: file.file_name().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestUtils;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const SHARD: &str = "shardId-000000000000";

    #[tokio::test]
    async fn test_append_continues_ordinals() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = RecordStore::new(dir.path());

        let first = store
            .append_records(SHARD, &TestUtils::create_test_records(1, 3))
            .await?;
        let second = store
            .append_records(SHARD, &TestUtils::create_test_records(4, 2))
            .await?;

        let ordinals: Vec<u64> = first.iter().chain(&second).map(|f| f.ordinal()).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.count_files(SHARD).await?, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_reproduces_write_order() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = RecordStore::new(dir.path());
        let records = TestUtils::create_test_records(1, 12);
        store.append_records(SHARD, &records).await?;

        let files = store.list_shard_files(SHARD).await?;
        // "10-..." sorts before "2-..." as text; ordinal order must win
        let mut read_back = Vec::new();
        for file in &files {
            read_back.push(store.read_record(file).await?);
        }
        assert_eq!(read_back, records);
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_file_is_never_overwritten() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = RecordStore::new(dir.path());
        let record = TestUtils::create_test_record("1", b"first");

        // One file present, so the next write targets ordinal 2
        let shard_dir = store.shard_dir(SHARD);
        std::fs::create_dir_all(&shard_dir)?;
        let colliding = shard_dir.join(record_file_name(2, &record.arrival_timestamp()));
        std::fs::write(&colliding, b"keep me")?;

        let result = store.append_records(SHARD, &[record]).await;
        match result {
            Err(SlrError::FileAlreadyExists { path }) => assert_eq!(path, colliding),
            other => panic!("expected FileAlreadyExists, got {:?}", other),
        }
        assert_eq!(std::fs::read(&colliding)?, b"keep me");
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_name_rejects_listing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = RecordStore::new(dir.path());
        store
            .append_records(SHARD, &TestUtils::create_test_records(1, 2))
            .await?;
        std::fs::write(store.shard_dir(SHARD).join("notes.txt"), b"hello")?;

        let result = store.list_shard_files(SHARD).await;
        assert!(matches!(
            result,
            Err(SlrError::MalformedRecordFile { ref file_name, .. }) if file_name == "notes.txt"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_skips_subdirectories() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = RecordStore::new(dir.path());
        store
            .append_records(SHARD, &TestUtils::create_test_records(1, 2))
            .await?;
        std::fs::create_dir(store.shard_dir(SHARD).join("events"))?;

        let files = store.list_shard_files(SHARD).await?;
        let ordinals: Vec<u64> = files.iter().map(|f| f.ordinal()).collect();
        assert_eq!(ordinals, vec![1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_directories() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = RecordStore::new(dir.path().join("absent"));
        assert_eq!(store.count_files(SHARD).await?, 0);
        assert!(!store.shard_dir_exists(SHARD).await?);
        assert!(matches!(
            store.list_shard_files(SHARD).await,
            Err(SlrError::InvalidArgument(_))
        ));
        assert!(matches!(store.list_shards().await, Err(SlrError::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_shards_ignores_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = RecordStore::new(dir.path());
        store
            .append_records("shardId-000000000001", &TestUtils::create_test_records(1, 1))
            .await?;
        store
            .append_records(SHARD, &TestUtils::create_test_records(1, 1))
            .await?;
        std::fs::write(dir.path().join(".DS_Store"), b"")?;

        assert_eq!(
            store.list_shards().await?,
            vec![SHARD.to_string(), "shardId-000000000001".to_string()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_read_record_reports_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = RecordStore::new(dir.path());
        let files = store
            .append_records(SHARD, &TestUtils::create_test_records(1, 1))
            .await?;
        std::fs::write(files[0].path(), b"{\"SequenceNumber\": 1}")?;

        match store.read_record(&files[0]).await {
            Err(SlrError::MalformedRecordFile { shard_id, file_name, .. }) => {
                assert_eq!(shard_id, SHARD);
                assert_eq!(file_name, files[0].file_name());
            }
            other => panic!("expected MalformedRecordFile, got {:?}", other),
        }
        Ok(())
    }
}
