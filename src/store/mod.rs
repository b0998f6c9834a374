//! On-disk storage for scraped records and dead-lettered batches
//!
//! Layout:
//!
//! ```text
//! scraped_events/<shardId>/<ordinal>-<YYYY-MM-DD_HH;MM;SS>.json
//! dlq/<shardId>/<same file names>
//! dlq_events/<shardId>/<firstSeq>-<lastSeq>.json
//! ```
//!
//! The leading ordinal of a record file is its position in scrape order, so
//! sorting a shard directory by ordinal reproduces arrival order.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::{Result, SlrError};

pub mod dlq;
pub mod persisted;

pub use dlq::DeadLetterStore;
pub use persisted::RecordStore;

/// Names of files written by the scrape engine
pub const RECORD_FILE_PATTERN: &str = "<ordinal>-YYYY-MM-DD_HH;MM;SS.json";

/// Largest ordinal that still fits the file name pattern
pub const MAX_ORDINAL: u64 = 9_999_999_999;

const MAX_ORDINAL_DIGITS: usize = 10;

/// `d` stands for one ASCII digit, every other byte must match as is
const TIMESTAMP_SHAPE: &str = "dddd-dd-dd_dd;dd;dd";

fn matches_shape(value: &str, shape: &str) -> bool {
    value.len() == shape.len()
        && value.bytes().zip(shape.bytes()).all(|(v, s)| match s {
            b'd' => v.is_ascii_digit(),
            _ => v == s,
        })
}

pub fn is_record_file_name(file_name: &str) -> bool {
    file_name
        .strip_suffix(".json")
        .and_then(|stem| stem.split_once('-'))
        .map_or(false, |(ordinal, timestamp)| {
            (1..=MAX_ORDINAL_DIGITS).contains(&ordinal.len())
                && ordinal.bytes().all(|b| b.is_ascii_digit())
                && matches_shape(timestamp, TIMESTAMP_SHAPE)
        })
}

/// Strip everything but `[A-Za-z0-9_-]` from a shard id before using it as a path
pub fn sanitize_shard_id(shard_id: &str) -> String {
    shard_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// `YYYY-MM-DD_HH;MM;SS`, portable on every filesystem
pub fn sanitize_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .format("%Y-%m-%d_%H:%M:%S")
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-'))
        .map(|c| if c == ':' { ';' } else { c })
        .collect()
}

pub fn record_file_name(ordinal: u64, arrival_timestamp: &DateTime<Utc>) -> String {
    format!("{}-{}.json", ordinal, sanitize_timestamp(arrival_timestamp))
}

/// A record file inside a shard directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecordFile {
    shard_id: String,
    ordinal: u64,
    file_name: String,
    path: PathBuf,
}

impl PersistedRecordFile {
    /// Validate `file_name` against the record file pattern
    pub fn parse(shard_id: &str, shard_dir: &Path, file_name: &str) -> Result<Self> {
        let malformed = |reason: String| SlrError::MalformedRecordFile {
            shard_id: shard_id.to_string(),
            file_name: file_name.to_string(),
            reason,
        };

        if !is_record_file_name(file_name) {
            return Err(malformed(format!(
                "File name does not match the pattern {} of a record file written by a scrape. \
                 Correct or remove the offending file to begin replaying events.",
                RECORD_FILE_PATTERN
            )));
        }

        let ordinal = file_name
            .split('-')
            .next()
            .and_then(|prefix| prefix.parse::<u64>().ok())
            .ok_or_else(|| malformed("Leading ordinal is not a number".to_string()))?;

        Ok(Self {
            shard_id: shard_id.to_string(),
            ordinal,
            file_name: file_name.to_string(),
            path: shard_dir.join(file_name),
        })
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
