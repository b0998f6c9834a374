//! Event payload handed to the target function
//!
//! Field names and order follow the payload a native Kinesis event source
//! mapping delivers, so a handler cannot tell a replay from live traffic.

use serde::{Deserialize, Serialize};

use crate::record::StreamRecord;

pub const KINESIS_SCHEMA_VERSION: &str = "1.0";
pub const EVENT_SOURCE: &str = "aws:kinesis";
pub const EVENT_VERSION: &str = "1.0";
pub const EVENT_NAME: &str = "aws:kinesis:record";
pub const INVOKE_IDENTITY_ARN: &str = "local::replay-tool";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    #[serde(rename = "Records")]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisPayload {
    pub kinesis_schema_version: String,
    pub partition_key: String,
    pub sequence_number: String,
    /// Base64 text, identical to the `Data` of the record file
    pub data: String,
    /// Epoch seconds with millisecond precision
    pub approximate_arrival_timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub kinesis: KinesisPayload,
    pub event_source: String,
    pub event_version: String,
    #[serde(rename = "eventID")]
    pub event_id: String,
    pub event_name: String,
    pub invoke_identity_arn: String,
    pub aws_region: String,
    #[serde(rename = "eventSourceARN")]
    pub event_source_arn: String,
}

impl EventRecord {
    pub fn new(
        shard_id: &str,
        record: &StreamRecord,
        region: &str,
        event_source_arn: &str,
    ) -> Self {
        Self {
            kinesis: KinesisPayload {
                kinesis_schema_version: KINESIS_SCHEMA_VERSION.to_string(),
                partition_key: record.partition_key().to_string(),
                sequence_number: record.sequence_number().to_string(),
                data: record.data_base64(),
                approximate_arrival_timestamp: record.arrival_epoch_seconds(),
            },
            event_source: EVENT_SOURCE.to_string(),
            event_version: EVENT_VERSION.to_string(),
            event_id: format!("{}:{}", shard_id, record.sequence_number()),
            event_name: EVENT_NAME.to_string(),
            invoke_identity_arn: INVOKE_IDENTITY_ARN.to_string(),
            aws_region: region.to_string(),
            event_source_arn: event_source_arn.to_string(),
        }
    }
}
