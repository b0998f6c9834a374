//! Test utilities and mock implementations for the scrape and replay engines


use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Once;

use crate::config::{ReplaySettings, ScrapeSettings};
use crate::record::StreamRecord;

static INIT_LOGGING: Once = Once::new();

/// Install a test-writer subscriber once per test binary
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    pub fn base_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 11, 6, 8, 32, 58).unwrap() + Duration::milliseconds(271)
    }

    /// Create a test record with given sequence number and data
    pub fn create_test_record(sequence_number: &str, data: &[u8]) -> StreamRecord {
        StreamRecord::new(
            sequence_number,
            Self::base_timestamp(),
            data.to_vec(),
            "test-partition-key",
        )
        .expect("Failed to build test record")
    }

    /// Records with consecutive sequence numbers and arrival times one second apart
    pub fn create_test_records(first_sequence: u64, count: usize) -> Vec<StreamRecord> {
        (first_sequence..first_sequence + count as u64)
            .map(|sequence| {
                StreamRecord::new(
                    sequence.to_string(),
                    Self::base_timestamp() + Duration::seconds(sequence as i64),
                    format!("data-{}", sequence).into_bytes(),
                    "test-partition-key",
                )
                .expect("Failed to build test record")
            })
            .collect()
    }

    pub fn scrape_settings() -> ScrapeSettings {
        ScrapeSettings {
            stream_name: "test-stream".to_string(),
            poll_delay: 0.0,
            ..Default::default()
        }
    }

    pub fn replay_settings() -> ReplaySettings {
        ReplaySettings {
            function_name: "test-function".to_string(),
            stream_name: "test-stream".to_string(),
            region: "us-east-1".to_string(),
            account_id: "123456789012".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_records() {
        let records = TestUtils::create_test_records(5, 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence_number(), "5");
        assert_eq!(records[2].sequence_number(), "7");
        assert_eq!(records[1].data().as_ref(), b"data-6");
        assert!(records[0].arrival_timestamp() < records[1].arrival_timestamp());
    }
}
