//! Kinesis SLR - scrape, load and replay for AWS Kinesis streams
//!
//! Recovery tooling for Kinesis-to-Lambda pipelines. A scrape copies an
//! arbitrary range of records from one or more shards to local files; a
//! replay later feeds those files to a Lambda function in batches shaped
//! exactly like the events of a native event source mapping, keeping any
//! batch the function rejects in a local dead-letter directory.

pub mod client;
pub mod config;
pub mod error;
pub mod iterator;
pub mod lambda;
pub mod poll;
pub mod record;
pub mod replay;
pub mod scraper;
pub mod store;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;


pub use client::{KinesisClientError, KinesisClientTrait, RecordsPage};
pub use config::{
    load_config, ConfigFile, EndingPosition, ExistingShardDirPolicy, LogLevel, ReplayConfig,
    ScrapeConfig, StartingPosition,
};
pub use error::{Result, SlrError};
pub use lambda::{InvocationOutcome, LambdaClientError, LambdaClientTrait};
pub use poll::{PollPolicy, ShardIterationState, StopReason};
pub use record::StreamRecord;
pub use replay::{ReplaySummary, Replayer};
pub use scraper::{ScrapeSummary, Scraper};
