//! Stream record model and its persisted JSON codec
//!
//! A [`StreamRecord`] is what a `GetRecords` page yields and what a record
//! file on disk holds. The on-disk form always carries `Data` as base64 text,
//! exactly as the Kinesis wire API delivers it before any client-side
//! decoding, so a replay can hand the same text to the target function.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SlrError};

/// A single record read from a shard
#[derive(Debug, Clone)]
pub struct StreamRecord {
    sequence_number: String,
    arrival_timestamp: DateTime<Utc>,
    data: Bytes,
    partition_key: String,
    /// Base64 text as delivered by the source, when the source delivered text
    encoded: Option<String>,
}

impl StreamRecord {
    /// Build a record from already-decoded payload bytes
    pub fn new(
        sequence_number: impl Into<String>,
        arrival_timestamp: DateTime<Utc>,
        data: impl Into<Bytes>,
        partition_key: impl Into<String>,
    ) -> Result<Self> {
        let record = Self {
            sequence_number: sequence_number.into(),
            arrival_timestamp,
            data: data.into(),
            partition_key: partition_key.into(),
            encoded: None,
        };
        record.check_identity()?;
        Ok(record)
    }

    /// Build a record whose payload is still base64 text
    pub fn from_base64(
        sequence_number: impl Into<String>,
        arrival_timestamp: DateTime<Utc>,
        data_base64: impl Into<String>,
        partition_key: impl Into<String>,
    ) -> Result<Self> {
        let text = data_base64.into();
        let sequence_number = sequence_number.into();
        let decoded = STANDARD.decode(text.as_bytes()).map_err(|e| {
            SlrError::MalformedRecord(format!(
                "Data of record {} is not valid base64: {}",
                sequence_number, e
            ))
        })?;

        let record = Self {
            sequence_number,
            arrival_timestamp,
            data: Bytes::from(decoded),
            partition_key: partition_key.into(),
            encoded: Some(text),
        };
        record.check_identity()?;
        Ok(record)
    }

    fn check_identity(&self) -> Result<()> {
        if self.sequence_number.is_empty() {
            return Err(SlrError::MalformedRecord(
                "SequenceNumber must be a non-empty string".to_string(),
            ));
        }
        if self.partition_key.is_empty() {
            return Err(SlrError::MalformedRecord(format!(
                "PartitionKey of record {} must be a non-empty string",
                self.sequence_number
            )));
        }
        Ok(())
    }

    pub fn sequence_number(&self) -> &str {
        &self.sequence_number
    }

    pub fn arrival_timestamp(&self) -> DateTime<Utc> {
        self.arrival_timestamp
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// Decoded payload bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether the payload was received as base64 text
    pub fn data_already_base64(&self) -> bool {
        self.encoded.is_some()
    }

    /// Payload as base64 text, encoded exactly once
    pub fn data_base64(&self) -> String {
        match &self.encoded {
            Some(text) => text.clone(),
            None => STANDARD.encode(&self.data),
        }
    }

    /// Arrival timestamp as fractional epoch seconds
    pub fn arrival_epoch_seconds(&self) -> f64 {
        self.arrival_timestamp.timestamp_millis() as f64 / 1000.0
    }
}

impl PartialEq for StreamRecord {
    fn eq(&self, other: &Self) -> bool {
        self.sequence_number == other.sequence_number
            && self.arrival_timestamp == other.arrival_timestamp
            && self.data == other.data
            && self.partition_key == other.partition_key
    }
}

impl Eq for StreamRecord {}

/// JSON shape of a record file
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PersistedRecord {
    sequence_number: String,
    approximate_arrival_timestamp: String,
    data: String,
    partition_key: String,
}

/// Decode a wire-format record given as JSON
///
/// `ApproximateArrivalTimestamp` may be an ISO-8601 string or epoch seconds.
pub fn decode(raw: &Value) -> Result<StreamRecord> {
    let object = raw
        .as_object()
        .ok_or_else(|| SlrError::MalformedRecord(format!("Expected a JSON object, got: {}", raw)))?;

    let sequence_number = required_str(object.get("SequenceNumber"), "SequenceNumber")?;
    let partition_key = required_str(object.get("PartitionKey"), "PartitionKey")?;
    let data = required_str(object.get("Data"), "Data")?;

    let arrival_timestamp = match object.get("ApproximateArrivalTimestamp") {
        Some(Value::String(text)) => parse_timestamp(text).ok_or_else(|| {
            SlrError::MalformedRecord(format!(
                "ApproximateArrivalTimestamp of record {} is not an ISO-8601 timestamp: {:?}",
                sequence_number, text
            ))
        })?,
        Some(Value::Number(number)) => number
            .as_f64()
            .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single())
            .ok_or_else(|| {
                SlrError::MalformedRecord(format!(
                    "ApproximateArrivalTimestamp of record {} is out of range: {}",
                    sequence_number, number
                ))
            })?,
        other => {
            return Err(SlrError::MalformedRecord(format!(
                "ApproximateArrivalTimestamp of record {} must be a timestamp or ISO-8601 string, got: {:?}",
                sequence_number, other
            )))
        }
    };

    StreamRecord::from_base64(sequence_number, arrival_timestamp, data, partition_key)
}

fn required_str<'a>(value: Option<&'a Value>, field: &str) -> Result<&'a str> {
    match value {
        Some(Value::String(text)) => Ok(text.as_str()),
        other => Err(SlrError::MalformedRecord(format!(
            "{} must be a string, got: {:?}",
            field, other
        ))),
    }
}

/// Serialize a record to the on-disk JSON form
pub fn to_persistable_json(record: &StreamRecord) -> Result<Vec<u8>> {
    let persisted = PersistedRecord {
        sequence_number: record.sequence_number.clone(),
        approximate_arrival_timestamp: format_timestamp(&record.arrival_timestamp),
        data: record.data_base64(),
        partition_key: record.partition_key.clone(),
    };
    serde_json::to_vec_pretty(&persisted).map_err(|e| {
        SlrError::Internal(format!(
            "Failed to serialize record {}: {}",
            record.sequence_number, e
        ))
    })
}

/// Parse a record file's contents
pub fn from_persisted_json(bytes: &[u8]) -> Result<StreamRecord> {
    let persisted: PersistedRecord = serde_json::from_slice(bytes)
        .map_err(|e| SlrError::MalformedRecord(format!("Record file schema mismatch: {}", e)))?;

    let arrival_timestamp = parse_timestamp(&persisted.approximate_arrival_timestamp)
        .ok_or_else(|| {
            SlrError::MalformedRecord(format!(
                "ApproximateArrivalTimestamp of record {} is not an ISO-8601 timestamp: {:?}",
                persisted.sequence_number, persisted.approximate_arrival_timestamp
            ))
        })?;

    StreamRecord::from_base64(
        persisted.sequence_number,
        arrival_timestamp,
        persisted.data,
        persisted.partition_key,
    )
}

pub(crate) fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse RFC 3339 or the `YYYY-MM-DD HH:MM:SS[.f][+HH:MM]` form; naive values are UTC
pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}
