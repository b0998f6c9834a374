//! Error types for the scrape and replay engines

use std::path::PathBuf;
use thiserror::Error;

use crate::client::KinesisClientError;
use crate::lambda::LambdaClientError;

/// Main error type for scrape and replay operations
#[derive(Debug, Error)]
pub enum SlrError {
    #[error("Configuration error: {0}")]
    ConfigValidation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unexpected API response: {0}")]
    UnexpectedApiResponse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error(
        "The file \"{}\" already exists when trying to create an event record file. \
         Be sure scraping is not being run against a populated shard directory.",
        path.display()
    )]
    FileAlreadyExists { path: PathBuf },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Malformed record file \"{file_name}\" in shard {shard_id}: {reason}")]
    MalformedRecordFile {
        shard_id: String,
        file_name: String,
        reason: String,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SlrError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SlrError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SlrError::ConfigValidation(msg.into())
    }
}

impl From<KinesisClientError> for SlrError {
    fn from(err: KinesisClientError) -> Self {
        match err {
            KinesisClientError::ConnectionError(msg) => {
                SlrError::Connection(format!("Kinesis: {}", msg))
            }
            KinesisClientError::Timeout(msg) => {
                SlrError::Connection(format!("Kinesis timeout: {}", msg))
            }
            KinesisClientError::ExpiredIterator => {
                SlrError::UnexpectedApiResponse("Shard iterator expired".to_string())
            }
            KinesisClientError::ThroughputExceeded => {
                SlrError::UnexpectedApiResponse("Throughput exceeded".to_string())
            }
            KinesisClientError::AccessDenied => {
                SlrError::UnexpectedApiResponse("Access denied".to_string())
            }
            KinesisClientError::ResourceNotFound(msg) => {
                SlrError::UnexpectedApiResponse(format!("Resource not found: {}", msg))
            }
            KinesisClientError::InvalidArgument(msg) => {
                SlrError::UnexpectedApiResponse(format!("Invalid argument: {}", msg))
            }
            KinesisClientError::MalformedResponse(msg) => SlrError::UnexpectedApiResponse(msg),
            KinesisClientError::Other(msg) => SlrError::UnexpectedApiResponse(msg),
        }
    }
}

impl From<LambdaClientError> for SlrError {
    fn from(err: LambdaClientError) -> Self {
        match err {
            LambdaClientError::ConnectionError(msg) => {
                SlrError::Connection(format!("Lambda: {}", msg))
            }
            LambdaClientError::Timeout(msg) => {
                SlrError::Connection(format!("Lambda timeout: {}", msg))
            }
            LambdaClientError::Service(msg) => {
                SlrError::UnexpectedApiResponse(format!("Lambda: {}", msg))
            }
        }
    }
}

/// Result type for scrape and replay operations
pub type Result<T> = std::result::Result<T, SlrError>;
