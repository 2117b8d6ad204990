//! Indexer configuration
//!
//! A JSON file, every field optional:
//!
//! ```json
//! {
//!   "dataDir": "data/store",
//!   "sourceDir": "data/streams",
//!   "snapshotEvery": 1000,
//!   "streams": [
//!     { "name": "venue", "schema": "venue", "batchSize": 200 },
//!     { "name": "tokens", "schema": "token-registry", "malformed": "fail" }
//!   ],
//!   "retry": { "maxAttempts": 5, "initialBackoffMs": 100, "maxBackoffMs": 10000 }
//! }
//! ```
//!
//! The path comes from the first CLI argument, else `VENUE_INDEXER_CONFIG`,
//! else the defaults are used.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use venue_store::DurableConfig;

use crate::consumer::{ConsumerConfig, RetryPolicy};
use crate::decoder::{MalformedPolicy, StreamSchema};

pub const CONFIG_ENV: &str = "VENUE_INDEXER_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {error}")]
    Io { path: String, error: String },

    #[error("Cannot parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexerConfig {
    /// Durable store directory (journal and snapshots).
    pub data_dir: PathBuf,
    /// Root of the stream journals, one subdirectory per stream.
    pub source_dir: PathBuf,
    /// Snapshot every N commits (0 = never).
    pub snapshot_every: u64,
    pub compress_snapshots: bool,
    /// Poll interval once a stream is caught up; absent stops at the end.
    pub follow_ms: Option<u64>,
    pub streams: Vec<StreamConfig>,
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/store"),
            source_dir: PathBuf::from("data/streams"),
            snapshot_every: 1_000,
            compress_snapshots: true,
            follow_ms: Some(1_000),
            streams: vec![
                StreamConfig::new("venue", StreamSchema::Venue),
                StreamConfig::new("kandel", StreamSchema::Kandel),
                StreamConfig::new("resting-order", StreamSchema::RestingOrder),
                StreamConfig::new("token-registry", StreamSchema::TokenRegistry),
            ],
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub name: String,
    pub schema: StreamSchema,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Defaults to the schema's policy.
    #[serde(default)]
    pub malformed: Option<MalformedPolicy>,
}

fn default_batch_size() -> usize {
    100
}

fn default_high_water_mark() -> usize {
    1_000
}

fn default_batch_timeout_ms() -> u64 {
    30_000
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, schema: StreamSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            batch_size: default_batch_size(),
            high_water_mark: default_high_water_mark(),
            batch_timeout_ms: default_batch_timeout_ms(),
            malformed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Config path from the first CLI argument, else the environment.
pub fn resolve_path(arg: Option<String>) -> Option<PathBuf> {
    arg.or_else(|| std::env::var(CONFIG_ENV).ok())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

impl IndexerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or validated defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::Invalid("no streams configured".into()));
        }
        let mut names = BTreeSet::new();
        for stream in &self.streams {
            if stream.name.is_empty() {
                return Err(ConfigError::Invalid("stream with an empty name".into()));
            }
            if !names.insert(stream.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate stream {}",
                    stream.name
                )));
            }
            if stream.batch_size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "stream {}: batchSize must be positive",
                    stream.name
                )));
            }
            if stream.high_water_mark < stream.batch_size {
                return Err(ConfigError::Invalid(format!(
                    "stream {}: highWaterMark {} is below batchSize {}",
                    stream.name, stream.high_water_mark, stream.batch_size
                )));
            }
            if stream.batch_timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "stream {}: batchTimeoutMs must be positive",
                    stream.name
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.maxAttempts must be positive".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initialBackoffMs exceeds retry.maxBackoffMs".into(),
            ));
        }
        Ok(())
    }

    pub fn durable_config(&self) -> DurableConfig {
        DurableConfig {
            snapshot_every: self.snapshot_every,
            compress_snapshots: self.compress_snapshots,
            ..DurableConfig::new(&self.data_dir)
        }
    }

    pub fn consumer_config(&self, stream: &StreamConfig) -> ConsumerConfig {
        ConsumerConfig {
            batch_size: stream.batch_size,
            high_water_mark: stream.high_water_mark,
            batch_timeout: Duration::from_millis(stream.batch_timeout_ms),
            retry: RetryPolicy::from(&self.retry),
            malformed: stream
                .malformed
                .unwrap_or_else(|| stream.schema.default_policy()),
            follow: self.follow_ms.map(Duration::from_millis),
            ..ConsumerConfig::new(stream.name.clone(), stream.schema)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IndexerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.streams.len(), 4);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = IndexerConfig::from_json(
            r#"{
                "dataDir": "/var/lib/indexer",
                "streams": [
                    { "name": "venue", "schema": "venue", "batchSize": 10, "highWaterMark": 50 },
                    { "name": "tokens", "schema": "token-registry", "malformed": "fail" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/indexer"));
        assert_eq!(config.snapshot_every, 1_000);
        assert_eq!(config.streams[0].batch_size, 10);
        assert_eq!(config.streams[1].batch_size, 100);

        let tokens = config.consumer_config(&config.streams[1]);
        assert_eq!(tokens.malformed, MalformedPolicy::Fail);
        let venue = config.consumer_config(&config.streams[0]);
        assert_eq!(venue.malformed, MalformedPolicy::Fail);
        assert_eq!(venue.high_water_mark, 50);
        assert_eq!(venue.retry.max_attempts, 5);
    }

    #[test]
    fn test_registry_defaults_to_skip() {
        let config = IndexerConfig::default();
        let registry = config
            .streams
            .iter()
            .find(|s| s.schema == StreamSchema::TokenRegistry)
            .unwrap();
        assert_eq!(config.consumer_config(registry).malformed, MalformedPolicy::Skip);
    }

    #[test]
    fn test_validation_rejects_bad_streams() {
        let mut config = IndexerConfig::default();
        config.streams[1].name = "venue".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = IndexerConfig::default();
        config.streams[0].batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = IndexerConfig::default();
        config.streams[0].high_water_mark = 10;
        assert!(config.validate().is_err());

        let mut config = IndexerConfig::default();
        config.streams.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_schema_is_parse_error() {
        let err = IndexerConfig::from_json(r#"{ "streams": [{ "name": "x", "schema": "amm" }] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_resolve_path_prefers_argument() {
        assert_eq!(
            resolve_path(Some("indexer.json".into())),
            Some(PathBuf::from("indexer.json"))
        );
    }

    #[test]
    fn test_durable_config_carries_snapshot_settings() {
        let config = IndexerConfig {
            snapshot_every: 7,
            compress_snapshots: false,
            ..IndexerConfig::default()
        };
        let durable = config.durable_config();
        assert_eq!(durable.snapshot_every, 7);
        assert!(!durable.compress_snapshots);
        assert_eq!(durable.dir, PathBuf::from("data/store"));
    }
}
