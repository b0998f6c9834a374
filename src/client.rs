//! Kinesis API seam used by the scrape engine

use async_trait::async_trait;
use aws_sdk_kinesis::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::{Record, ShardIteratorType},
    Client,
};
use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, trace};

use crate::record::StreamRecord;

/// Failures reported by a Kinesis client implementation
#[derive(Debug, Clone, Error)]
pub enum KinesisClientError {
    #[error("Iterator expired")]
    ExpiredIterator,

    #[error("Throughput exceeded")]
    ThroughputExceeded,

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Other(String),
}

/// One `GetRecords` page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordsPage {
    pub records: Vec<StreamRecord>,
    pub next_iterator: Option<String>,
    pub millis_behind_latest: Option<i64>,
}

#[async_trait]
pub trait KinesisClientTrait: Send + Sync {
    /// Ids of every shard in the stream
    async fn describe_stream(&self, stream_name: &str) -> Result<Vec<String>, KinesisClientError>;

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        iterator_type: ShardIteratorType,
        sequence_number: Option<&str>,
        timestamp: Option<&DateTime<Utc>>,
    ) -> Result<String, KinesisClientError>;

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> Result<RecordsPage, KinesisClientError>;
}

fn classify<E, R>(err: SdkError<E, R>) -> KinesisClientError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::DispatchFailure(_) => KinesisClientError::ConnectionError(message),
        SdkError::TimeoutError(_) => KinesisClientError::Timeout(message),
        SdkError::ServiceError(ctx) => match ctx.err().code() {
            Some("ExpiredIteratorException") => KinesisClientError::ExpiredIterator,
            Some("ProvisionedThroughputExceededException") => {
                KinesisClientError::ThroughputExceeded
            }
            Some("AccessDeniedException") => KinesisClientError::AccessDenied,
            Some("ResourceNotFoundException") => KinesisClientError::ResourceNotFound(message),
            Some("InvalidArgumentException") => KinesisClientError::InvalidArgument(message),
            _ => KinesisClientError::Other(message),
        },
        _ => KinesisClientError::Other(message),
    }
}

fn convert_record(record: &Record) -> Result<StreamRecord, KinesisClientError> {
    let arrival = record
        .approximate_arrival_timestamp()
        .ok_or_else(|| {
            KinesisClientError::MalformedResponse(format!(
                "Record {} has no ApproximateArrivalTimestamp",
                record.sequence_number()
            ))
        })?
        .to_chrono_utc()
        .map_err(|e| {
            KinesisClientError::MalformedResponse(format!(
                "Record {} has an unrepresentable timestamp: {}",
                record.sequence_number(),
                e
            ))
        })?;

    StreamRecord::new(
        record.sequence_number(),
        arrival,
        Bytes::copy_from_slice(record.data().as_ref()),
        record.partition_key(),
    )
    .map_err(|e| KinesisClientError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl KinesisClientTrait for Client {
    async fn describe_stream(&self, stream_name: &str) -> Result<Vec<String>, KinesisClientError> {
        let mut shard_ids = Vec::new();
        let mut exclusive_start: Option<String> = None;

        loop {
            let response = self
                .describe_stream()
                .stream_name(stream_name)
                .set_exclusive_start_shard_id(exclusive_start.clone())
                .send()
                .await
                .map_err(classify)?;

            let description = response.stream_description().ok_or_else(|| {
                KinesisClientError::MalformedResponse(format!(
                    "describe_stream() for {} returned no StreamDescription",
                    stream_name
                ))
            })?;

            debug!(
                stream = %description.stream_name(),
                arn = %description.stream_arn(),
                "Described stream"
            );

            for shard in description.shards() {
                trace!(shard_id = %shard.shard_id(), "Detected shard");
                shard_ids.push(shard.shard_id().to_string());
            }

            if !description.has_more_shards() {
                break;
            }
            match shard_ids.last() {
                Some(last) => exclusive_start = Some(last.clone()),
                None => break,
            }
        }

        Ok(shard_ids)
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        iterator_type: ShardIteratorType,
        sequence_number: Option<&str>,
        timestamp: Option<&DateTime<Utc>>,
    ) -> Result<String, KinesisClientError> {
        let mut req = self
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id)
            .shard_iterator_type(iterator_type);

        if let Some(seq) = sequence_number {
            req = req.starting_sequence_number(seq);
        }

        if let Some(ts) = timestamp {
            let system_time: SystemTime = (*ts).into();
            req = req.timestamp(aws_smithy_types::DateTime::from(system_time));
        }

        let response = req.send().await.map_err(classify)?;
        response
            .shard_iterator()
            .filter(|iterator| !iterator.is_empty())
            .map(String::from)
            .ok_or_else(|| {
                KinesisClientError::MalformedResponse(format!(
                    "get_shard_iterator() returned no ShardIterator for shard {}",
                    shard_id
                ))
            })
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> Result<RecordsPage, KinesisClientError> {
        let response = self
            .get_records()
            .shard_iterator(iterator)
            .limit(limit)
            .send()
            .await
            .map_err(classify)?;

        let records = response
            .records()
            .iter()
            .map(convert_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RecordsPage {
            records,
            next_iterator: response.next_shard_iterator().map(String::from),
            millis_behind_latest: response.millis_behind_latest(),
        })
    }
}
