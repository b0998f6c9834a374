//! Per-shard iterator resolution

use std::collections::HashMap;
use tracing::debug;

use crate::client::KinesisClientTrait;
use crate::config::StartingPosition;
use crate::error::Result;

/// Resolves the first iterator of each shard and keeps it for the session
///
/// Once a shard's poll loop is running it advances through the
/// `NextShardIterator` of each page, so the manager is consulted once per
/// shard.
#[derive(Debug, Clone)]
pub struct ShardIteratorManager {
    stream_name: String,
    position: StartingPosition,
    cursors: HashMap<String, String>,
}

impl ShardIteratorManager {
    pub fn new(stream_name: impl Into<String>, position: StartingPosition) -> Self {
        Self {
            stream_name: stream_name.into(),
            position,
            cursors: HashMap::new(),
        }
    }

    pub async fn initial_iterator<C>(&mut self, client: &C, shard_id: &str) -> Result<String>
    where
        C: KinesisClientTrait + ?Sized,
    {
        if let Some(cursor) = self.cursors.get(shard_id) {
            return Ok(cursor.clone());
        }

        let cursor = client
            .get_shard_iterator(
                &self.stream_name,
                shard_id,
                self.position.iterator_type(),
                self.position.sequence_number(),
                self.position.timestamp(),
            )
            .await?;

        debug!(
            shard_id = %shard_id,
            position = %self.position,
            "Acquired shard iterator"
        );

        self.cursors.insert(shard_id.to_string(), cursor.clone());
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::KinesisClientError;
    use crate::error::SlrError;
    use crate::test::mocks::MockKinesisClient;
    use aws_sdk_kinesis::types::ShardIteratorType;

    #[tokio::test]
    async fn test_iterator_is_cached_per_shard() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_get_iterator(Ok("iterator-a".to_string())).await;
        client.mock_get_iterator(Ok("iterator-b".to_string())).await;

        let mut manager = ShardIteratorManager::new("stream", StartingPosition::TrimHorizon);
        assert_eq!(manager.initial_iterator(&client, "shard-a").await?, "iterator-a");
        assert_eq!(manager.initial_iterator(&client, "shard-a").await?, "iterator-a");
        assert_eq!(manager.initial_iterator(&client, "shard-b").await?, "iterator-b");

        assert_eq!(client.get_iterator_request_count().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_position_arguments_are_forwarded() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        let mut manager = ShardIteratorManager::new(
            "stream",
            StartingPosition::AfterSequenceNumber("12345".to_string()),
        );
        manager.initial_iterator(&client, "shard-a").await?;

        let requests = client.get_iterator_requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].shard_id, "shard-a");
        assert_eq!(requests[0].iterator_type, ShardIteratorType::AfterSequenceNumber);
        assert_eq!(requests[0].sequence_number.as_deref(), Some("12345"));
        assert_eq!(requests[0].timestamp, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_iterator_is_unexpected_response() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client
            .mock_get_iterator(Err(KinesisClientError::MalformedResponse(
                "no ShardIterator".to_string(),
            )))
            .await;

        let mut manager = ShardIteratorManager::new("stream", StartingPosition::Latest);
        let result = manager.initial_iterator(&client, "shard-a").await;
        assert!(matches!(result, Err(SlrError::UnexpectedApiResponse(_))));

        // A failed lookup is not cached
        assert_eq!(manager.initial_iterator(&client, "shard-a").await?, "mock-iterator");
        assert_eq!(client.get_iterator_request_count().await, 2);
        Ok(())
    }
}
