//! Configuration for the scrape and replay engines
//!
//! A TOML file is read into plain [`ScrapeSettings`] / [`ReplaySettings`]
//! values, which are then validated into immutable [`ScrapeConfig`] /
//! [`ReplayConfig`] values. Validation happens before any network or disk
//! I/O; an invalid settings value never becomes a config.

use aws_sdk_kinesis::types::ShardIteratorType;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SlrError};
use crate::record::parse_timestamp;

pub const MAX_POLL_BATCH_SIZE: u32 = 500;
pub const MAX_POLL_DELAY_SECS: f64 = 10.0;
pub const MAX_EMPTY_POLLS: u32 = 2000;
pub const MAX_REPLAY_BATCH_SIZE: u32 = 10_000;
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Marker for configuration keys that are recognised but not supported
pub const NOT_SUPPORTED: &str = "N/A";

fn default_scraped_events_dir() -> PathBuf {
    PathBuf::from("scraped_events")
}

fn default_dlq_dir() -> PathBuf {
    PathBuf::from("dlq")
}

fn default_dlq_events_dir() -> PathBuf {
    PathBuf::from("dlq_events")
}

fn default_true() -> bool {
    true
}

fn default_replay_batch_size() -> u32 {
    100
}

/// Log verbosity, spelled the way the configuration file spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// What to do when a target shard directory already holds scraped files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingShardDirPolicy {
    /// Refuse to scrape before any page is fetched
    #[default]
    Reject,
    /// Continue numbering after the files already present
    Continue,
}

/// Contents of the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(default)]
    pub scrape: Option<ScrapeSettings>,
    #[serde(default)]
    pub replay: Option<ReplaySettings>,
}

impl ConfigFile {
    pub fn scrape_config(&self) -> Result<ScrapeConfig> {
        let settings = self
            .scrape
            .clone()
            .ok_or_else(|| SlrError::config("Missing [scrape] section"))?;
        ScrapeConfig::try_from(settings)
    }

    pub fn replay_config(&self) -> Result<ReplayConfig> {
        let settings = self
            .replay
            .clone()
            .ok_or_else(|| SlrError::config("Missing [replay] section"))?;
        ReplayConfig::try_from(settings)
    }
}

pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SlrError::config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    toml::from_str(content).map_err(|e| SlrError::config(format!("Failed to parse config: {}", e)))
}

/// Raw `[scrape]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeSettings {
    pub stream_name: String,
    /// Region of the stream; the SDK default chain is used when absent
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub shard_ids: Vec<String>,
    pub starting_position: String,
    #[serde(default)]
    pub starting_timestamp: Option<String>,
    #[serde(default)]
    pub starting_sequence_number: Option<String>,
    pub ending_position: String,
    #[serde(default)]
    pub ending_timestamp: Option<String>,
    #[serde(default)]
    pub ending_sequence_number: Option<String>,
    #[serde(default)]
    pub total_records_per_shard: Option<u64>,
    pub poll_batch_size: u32,
    pub poll_delay: f64,
    pub max_empty_polls: u32,
    #[serde(default)]
    pub existing_shard_dir: ExistingShardDirPolicy,
    #[serde(default = "default_scraped_events_dir")]
    pub scraped_events_dir: PathBuf,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            region: None,
            shard_ids: Vec::new(),
            starting_position: "TRIM_HORIZON".to_string(),
            starting_timestamp: None,
            starting_sequence_number: None,
            ending_position: "TOTAL_RECORDS_PER_SHARD".to_string(),
            ending_timestamp: None,
            ending_sequence_number: None,
            total_records_per_shard: Some(1000),
            poll_batch_size: 100,
            poll_delay: 0.5,
            max_empty_polls: 10,
            existing_shard_dir: ExistingShardDirPolicy::Reject,
            scraped_events_dir: default_scraped_events_dir(),
        }
    }
}

/// Where a shard's scrape begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartingPosition {
    AtSequenceNumber(String),
    AfterSequenceNumber(String),
    TrimHorizon,
    Latest,
    AtTimestamp(DateTime<Utc>),
}

impl StartingPosition {
    pub const NAMES: [&'static str; 5] = [
        "AT_SEQUENCE_NUMBER",
        "AFTER_SEQUENCE_NUMBER",
        "TRIM_HORIZON",
        "LATEST",
        "AT_TIMESTAMP",
    ];

    pub fn iterator_type(&self) -> ShardIteratorType {
        match self {
            StartingPosition::AtSequenceNumber(_) => ShardIteratorType::AtSequenceNumber,
            StartingPosition::AfterSequenceNumber(_) => ShardIteratorType::AfterSequenceNumber,
            StartingPosition::TrimHorizon => ShardIteratorType::TrimHorizon,
            StartingPosition::Latest => ShardIteratorType::Latest,
            StartingPosition::AtTimestamp(_) => ShardIteratorType::AtTimestamp,
        }
    }

    pub fn sequence_number(&self) -> Option<&str> {
        match self {
            StartingPosition::AtSequenceNumber(seq)
            | StartingPosition::AfterSequenceNumber(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            StartingPosition::AtTimestamp(ts) => Some(ts),
            _ => None,
        }
    }
}

impl fmt::Display for StartingPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartingPosition::AtSequenceNumber(seq) => write!(f, "AT_SEQUENCE_NUMBER {}", seq),
            StartingPosition::AfterSequenceNumber(seq) => {
                write!(f, "AFTER_SEQUENCE_NUMBER {}", seq)
            }
            StartingPosition::TrimHorizon => write!(f, "TRIM_HORIZON"),
            StartingPosition::Latest => write!(f, "LATEST"),
            StartingPosition::AtTimestamp(ts) => write!(f, "AT_TIMESTAMP {}", ts),
        }
    }
}

/// When a shard's scrape is considered done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndingPosition {
    TotalRecordsPerShard(u64),
    AtSequenceNumber(String),
    AfterSequenceNumber(String),
    BeforeSequenceNumber(String),
    AtTimestamp(DateTime<Utc>),
    BeforeTimestamp(DateTime<Utc>),
    AfterTimestamp(DateTime<Utc>),
    Latest,
}

impl EndingPosition {
    pub const NAMES: [&'static str; 8] = [
        "TOTAL_RECORDS_PER_SHARD",
        "AT_SEQUENCE_NUMBER",
        "AFTER_SEQUENCE_NUMBER",
        "BEFORE_SEQUENCE_NUMBER",
        "AT_TIMESTAMP",
        "BEFORE_TIMESTAMP",
        "AFTER_TIMESTAMP",
        "LATEST",
    ];
}

/// Validated scrape configuration
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    stream_name: String,
    region: Option<String>,
    shard_ids: Vec<String>,
    starting_position: StartingPosition,
    ending_position: EndingPosition,
    poll_batch_size: u32,
    poll_delay: Duration,
    max_empty_polls: u32,
    existing_shard_dir: ExistingShardDirPolicy,
    scraped_events_dir: PathBuf,
}

impl ScrapeConfig {
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Configured shard ids; empty means every shard of the stream
    pub fn shard_ids(&self) -> &[String] {
        &self.shard_ids
    }

    pub fn starting_position(&self) -> &StartingPosition {
        &self.starting_position
    }

    pub fn ending_position(&self) -> &EndingPosition {
        &self.ending_position
    }

    pub fn poll_batch_size(&self) -> u32 {
        self.poll_batch_size
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    pub fn max_empty_polls(&self) -> u32 {
        self.max_empty_polls
    }

    pub fn existing_shard_dir(&self) -> ExistingShardDirPolicy {
        self.existing_shard_dir
    }

    pub fn scraped_events_dir(&self) -> &Path {
        &self.scraped_events_dir
    }

    /// Per-shard record cap, when the ending position is a record count
    pub fn total_records_per_shard(&self) -> Option<u64> {
        match self.ending_position {
            EndingPosition::TotalRecordsPerShard(cap) => Some(cap),
            _ => None,
        }
    }
}

impl TryFrom<ScrapeSettings> for ScrapeConfig {
    type Error = SlrError;

    fn try_from(settings: ScrapeSettings) -> Result<Self> {
        validate_stream_name(&settings.stream_name, "scrape.stream_name")?;
        let shard_ids = validate_shard_ids(&settings.shard_ids)?;

        let starting_position = parse_starting_position(&settings)?;
        let ending_position = parse_ending_position(&settings)?;

        for (key, uses_sequence) in [
            (
                "starting_position",
                starting_position.sequence_number().is_some(),
            ),
            (
                "ending_position",
                matches!(
                    ending_position,
                    EndingPosition::AtSequenceNumber(_)
                        | EndingPosition::AfterSequenceNumber(_)
                        | EndingPosition::BeforeSequenceNumber(_)
                ),
            ),
        ] {
            // Sequence numbers are only unique within a shard
            if uses_sequence && shard_ids.len() != 1 {
                return Err(SlrError::config(format!(
                    "If \"{}\" is *_SEQUENCE_NUMBER, exactly 1 shard_id must be specified as \
                     sequence numbers are unique per shard. Value provided: {:?}",
                    key, shard_ids
                )));
            }
        }

        if settings.poll_batch_size == 0 || settings.poll_batch_size > MAX_POLL_BATCH_SIZE {
            return Err(SlrError::config(format!(
                "poll_batch_size must be between 1 and {}. Value provided: {}",
                MAX_POLL_BATCH_SIZE, settings.poll_batch_size
            )));
        }

        if !settings.poll_delay.is_finite()
            || !(0.0..=MAX_POLL_DELAY_SECS).contains(&settings.poll_delay)
        {
            return Err(SlrError::config(format!(
                "poll_delay must be between 0-{} seconds. Value provided: {}",
                MAX_POLL_DELAY_SECS, settings.poll_delay
            )));
        }

        if settings.max_empty_polls == 0 || settings.max_empty_polls > MAX_EMPTY_POLLS {
            return Err(SlrError::config(format!(
                "max_empty_polls must be between 1 and {}. Value provided: {}",
                MAX_EMPTY_POLLS, settings.max_empty_polls
            )));
        }

        Ok(Self {
            stream_name: settings.stream_name,
            region: settings.region.filter(|region| !region.trim().is_empty()),
            shard_ids,
            starting_position,
            ending_position,
            poll_batch_size: settings.poll_batch_size,
            poll_delay: Duration::from_secs_f64(settings.poll_delay),
            max_empty_polls: settings.max_empty_polls,
            existing_shard_dir: settings.existing_shard_dir,
            scraped_events_dir: settings.scraped_events_dir,
        })
    }
}

fn validate_stream_name(name: &str, key: &str) -> Result<()> {
    if name.trim().is_empty() || name == "stream_name_here" {
        return Err(SlrError::config(format!("{}: A stream name must be set.", key)));
    }
    Ok(())
}

/// Every shard id must be a populated string, listed once
pub fn validate_shard_ids(shard_ids: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::with_capacity(shard_ids.len());
    shard_ids
        .iter()
        .map(|shard_id| {
            if shard_id.trim().is_empty() {
                Err(SlrError::config(format!(
                    "Each shard_id must be a populated string. Value provided: {:?}",
                    shard_id
                )))
            } else if !seen.insert(shard_id.as_str()) {
                Err(SlrError::config(format!("shard_ids lists {} more than once.", shard_id)))
            } else {
                Ok(shard_id.clone())
            }
        })
        .collect()
}

fn require_sequence_number(value: Option<&String>, key: &str) -> Result<String> {
    match value {
        Some(seq) if !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()) => Ok(seq.clone()),
        other => Err(SlrError::config(format!(
            "\"{}\" must be a positive numeric string. Value provided: {:?}",
            key, other
        ))),
    }
}

fn require_timestamp(value: Option<&String>, key: &str) -> Result<DateTime<Utc>> {
    value
        .and_then(|text| parse_timestamp(text))
        .ok_or_else(|| {
            SlrError::config(format!(
                "Invalid format for config parameter \"{}\". Format should be \
                 YYYY-MM-DD HH:MM:SS. Value provided: {:?}",
                key, value
            ))
        })
}

fn parse_starting_position(settings: &ScrapeSettings) -> Result<StartingPosition> {
    let sequence = || {
        require_sequence_number(
            settings.starting_sequence_number.as_ref(),
            "starting_sequence_number",
        )
    };
    match settings.starting_position.as_str() {
        "AT_SEQUENCE_NUMBER" => Ok(StartingPosition::AtSequenceNumber(sequence()?)),
        "AFTER_SEQUENCE_NUMBER" => Ok(StartingPosition::AfterSequenceNumber(sequence()?)),
        "TRIM_HORIZON" => Ok(StartingPosition::TrimHorizon),
        "LATEST" => Ok(StartingPosition::Latest),
        "AT_TIMESTAMP" => Ok(StartingPosition::AtTimestamp(require_timestamp(
            settings.starting_timestamp.as_ref(),
            "starting_timestamp",
        )?)),
        other => Err(SlrError::config(format!(
            "starting_position must be one of: {:?}. Value provided: {:?}",
            StartingPosition::NAMES,
            other
        ))),
    }
}

fn parse_ending_position(settings: &ScrapeSettings) -> Result<EndingPosition> {
    let sequence = || {
        require_sequence_number(
            settings.ending_sequence_number.as_ref(),
            "ending_sequence_number",
        )
    };
    let timestamp = || require_timestamp(settings.ending_timestamp.as_ref(), "ending_timestamp");

    match settings.ending_position.as_str() {
        "TOTAL_RECORDS_PER_SHARD" => match settings.total_records_per_shard {
            Some(cap) if cap > 0 => Ok(EndingPosition::TotalRecordsPerShard(cap)),
            other => Err(SlrError::config(format!(
                "If ending_position is TOTAL_RECORDS_PER_SHARD, \"total_records_per_shard\" \
                 must be a positive integer. Value provided: {:?}",
                other
            ))),
        },
        "AT_SEQUENCE_NUMBER" => Ok(EndingPosition::AtSequenceNumber(sequence()?)),
        "AFTER_SEQUENCE_NUMBER" => Ok(EndingPosition::AfterSequenceNumber(sequence()?)),
        "BEFORE_SEQUENCE_NUMBER" => Ok(EndingPosition::BeforeSequenceNumber(sequence()?)),
        "AT_TIMESTAMP" => Ok(EndingPosition::AtTimestamp(timestamp()?)),
        "BEFORE_TIMESTAMP" => Ok(EndingPosition::BeforeTimestamp(timestamp()?)),
        "AFTER_TIMESTAMP" => Ok(EndingPosition::AfterTimestamp(timestamp()?)),
        "LATEST" => Ok(EndingPosition::Latest),
        other => Err(SlrError::config(format!(
            "ending_position must be one of: {:?}. Value provided: {:?}",
            EndingPosition::NAMES,
            other
        ))),
    }
}

/// Raw `[replay]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ReplaySettings {
    pub function_name: String,
    pub stream_name: String,
    pub region: String,
    pub account_id: String,
    #[serde(default)]
    pub shard_ids: Vec<String>,
    #[serde(default = "default_replay_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default = "default_true")]
    pub local_dlq: bool,
    #[serde(default)]
    pub local_dlq_full_event: bool,
    #[serde(default)]
    pub bisect_on_error: bool,
    #[serde(default)]
    pub tumbling_window_seconds: Option<toml::Value>,
    #[serde(default)]
    pub custom_checkpoints: Option<toml::Value>,
    #[serde(default = "default_scraped_events_dir")]
    pub scraped_events_dir: PathBuf,
    #[serde(default = "default_dlq_dir")]
    pub dlq_dir: PathBuf,
    #[serde(default = "default_dlq_events_dir")]
    pub dlq_events_dir: PathBuf,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            function_name: String::new(),
            stream_name: String::new(),
            region: String::new(),
            account_id: String::new(),
            shard_ids: Vec::new(),
            batch_size: default_replay_batch_size(),
            retry_attempts: 0,
            local_dlq: true,
            local_dlq_full_event: false,
            bisect_on_error: false,
            tumbling_window_seconds: None,
            custom_checkpoints: None,
            scraped_events_dir: default_scraped_events_dir(),
            dlq_dir: default_dlq_dir(),
            dlq_events_dir: default_dlq_events_dir(),
        }
    }
}

/// Validated replay configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    function_name: String,
    stream_name: String,
    region: String,
    account_id: String,
    shard_ids: Vec<String>,
    batch_size: u32,
    retry_attempts: u32,
    local_dlq: bool,
    local_dlq_full_event: bool,
    scraped_events_dir: PathBuf,
    dlq_dir: PathBuf,
    dlq_events_dir: PathBuf,
}

impl ReplayConfig {
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Shard directories to replay; empty means all of them
    pub fn shard_ids(&self) -> &[String] {
        &self.shard_ids
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Informational only, batches are never retried automatically
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn local_dlq(&self) -> bool {
        self.local_dlq
    }

    pub fn local_dlq_full_event(&self) -> bool {
        self.local_dlq_full_event
    }

    pub fn scraped_events_dir(&self) -> &Path {
        &self.scraped_events_dir
    }

    pub fn dlq_dir(&self) -> &Path {
        &self.dlq_dir
    }

    /// Root for full invocation payloads, kept apart from the record copies
    pub fn dlq_events_dir(&self) -> &Path {
        &self.dlq_events_dir
    }

    pub fn event_source_arn(&self) -> String {
        format!(
            "arn:aws:kinesis:{}:{}:stream/{}",
            self.region, self.account_id, self.stream_name
        )
    }
}

fn reject_unsupported(value: &Option<toml::Value>, key: &str) -> Result<()> {
    match value {
        None => Ok(()),
        Some(toml::Value::String(text)) if text == NOT_SUPPORTED => Ok(()),
        Some(other) => Err(SlrError::config(format!(
            "{} is not yet supported! Leave it unset or \"{}\". Value provided: {}",
            key, NOT_SUPPORTED, other
        ))),
    }
}

impl TryFrom<ReplaySettings> for ReplayConfig {
    type Error = SlrError;

    fn try_from(settings: ReplaySettings) -> Result<Self> {
        if settings.function_name.trim().is_empty()
            || settings.function_name == "function_name_here"
        {
            return Err(SlrError::config("replay.function_name: A function name must be set."));
        }
        validate_stream_name(&settings.stream_name, "replay.stream_name")?;
        if settings.region.trim().is_empty() {
            return Err(SlrError::config("replay.region must be set."));
        }
        if settings.account_id.trim().is_empty() {
            return Err(SlrError::config("replay.account_id must be set."));
        }
        let shard_ids = validate_shard_ids(&settings.shard_ids)?;

        if settings.batch_size == 0 || settings.batch_size > MAX_REPLAY_BATCH_SIZE {
            return Err(SlrError::config(format!(
                "batch_size must be between 1 and {}. Value provided: {}",
                MAX_REPLAY_BATCH_SIZE, settings.batch_size
            )));
        }
        if settings.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(SlrError::config(format!(
                "retry_attempts cannot exceed {}. Value provided: {}",
                MAX_RETRY_ATTEMPTS, settings.retry_attempts
            )));
        }
        if settings.bisect_on_error {
            return Err(SlrError::config("bisect_on_error is not yet supported!"));
        }
        reject_unsupported(&settings.tumbling_window_seconds, "tumbling_window_seconds")?;
        reject_unsupported(&settings.custom_checkpoints, "custom_checkpoints")?;

        Ok(Self {
            function_name: settings.function_name,
            stream_name: settings.stream_name,
            region: settings.region,
            account_id: settings.account_id,
            shard_ids,
            batch_size: settings.batch_size,
            retry_attempts: settings.retry_attempts,
            local_dlq: settings.local_dlq,
            local_dlq_full_event: settings.local_dlq_full_event,
            scraped_events_dir: settings.scraped_events_dir,
            dlq_dir: settings.dlq_dir,
            dlq_events_dir: settings.dlq_events_dir,
        })
    }
}
