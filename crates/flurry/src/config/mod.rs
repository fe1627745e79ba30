//! Configuration types for the flurry reader.
//!
//! Configuration is a single YAML file with environment variable expansion:
//!
//! ```yaml
//! storage:
//!   backend: azure
//!   account: myaccount
//!   container: insights-logs
//!   access_key: ${AZURE_STORAGE_KEY}
//! registry:
//!   path: data/registry.dat
//!   create_policy: resume
//! reader:
//!   id: reader-a
//!   interval_secs: 60
//! lease:
//!   duration_secs: 15
//! framing:
//!   head_bytes: 12
//!   tail_bytes: 2
//! json:
//!   split_policy: with_head_tail
//!   batch_size: 10
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use flurry_core::config::{MB, MetricsConfig, load_yaml, parse_yaml};
use flurry_core::error::PathFilterSnafu;
use flurry_core::storage::StorageConfig;
use flurry_core::tracing::LogFormat;

use crate::error::ConfigError;

/// Lease duration bounds in seconds, and the sentinel disabling the lease.
pub const MIN_LEASE_SECS: i64 = 15;
pub const MAX_LEASE_SECS: i64 = 60;
pub const LEASE_DISABLED: i64 = -1;

/// Upper bound for `framing.max_buffer_size`.
pub const MAX_BUFFER_LIMIT: usize = 256 * MB;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Container holding the blobs, the registry and the lock object.
    pub storage: StorageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub json: JsonConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// How blobs that already exist when the registry is first created are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePolicy {
    /// Existing content counts as already read; only appended bytes are tailed.
    #[default]
    Resume,
    /// Existing content is read from the beginning.
    StartOver,
}

/// Where the shared registry lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub path: String,
    /// Lock object guarding the registry. Defaults to `<path>.lock`.
    #[serde(default)]
    pub lock_path: Option<String>,
    #[serde(default)]
    pub create_policy: CreatePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            lock_path: None,
            create_policy: CreatePolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// Path of the lock object.
    pub fn lock_path(&self) -> String {
        self.lock_path
            .clone()
            .unwrap_or_else(|| format!("{}.lock", self.path))
    }
}

fn default_registry_path() -> String {
    "data/registry.dat".to_string()
}

/// Per-reader polling behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    /// Identifier written as the owner of claimed blobs.
    #[serde(default = "default_reader_id")]
    pub id: String,
    /// Idle interval between polls once caught up.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Random extra idle time (0 to N seconds).
    #[serde(default)]
    pub poll_jitter_secs: u64,
    /// Listing page size.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    /// Only blobs under this prefix are tracked.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Only blobs matching one of these regexes are tracked (all when empty).
    #[serde(default)]
    pub path_filters: Vec<String>,
    /// Claims held by other readers longer than this may be taken over.
    #[serde(default)]
    pub claim_timeout_secs: Option<u64>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            id: default_reader_id(),
            interval_secs: default_interval_secs(),
            poll_jitter_secs: 0,
            list_page_size: default_list_page_size(),
            prefix: None,
            path_filters: Vec::new(),
            claim_timeout_secs: None,
        }
    }
}

impl ReaderConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn claim_timeout(&self) -> Option<Duration> {
        self.claim_timeout_secs.map(Duration::from_secs)
    }

    /// Compile the path filters.
    pub fn compiled_filters(&self) -> Result<Vec<Regex>, ConfigError> {
        self.path_filters
            .iter()
            .map(|pattern| Regex::new(pattern).context(PathFilterSnafu { pattern }))
            .collect()
    }
}

fn default_reader_id() -> String {
    format!("reader-{}", Uuid::new_v4())
}

fn default_interval_secs() -> u64 {
    60
}

fn default_list_page_size() -> usize {
    5000
}

/// Registry lease behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaseConfig {
    /// Lease duration in seconds, or -1 to run without a lease.
    #[serde(default = "default_lease_secs")]
    pub duration_secs: i64,
    /// Retries after the first contended attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_lease_secs(),
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl LeaseConfig {
    /// Lease duration, or `None` when coordination is disabled.
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_secs != LEASE_DISABLED).then(|| Duration::from_secs(self.duration_secs as u64))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

fn default_lease_secs() -> i64 {
    MIN_LEASE_SECS
}

fn default_max_retries() -> u32 {
    30
}

fn default_retry_interval_ms() -> u64 {
    1000
}

/// Non-repeating framing and chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FramingConfig {
    /// Bytes at the start of every blob that appear only once (e.g. `{"records":[`).
    #[serde(default)]
    pub head_bytes: u64,
    /// Bytes at the end of every blob that appear only once (e.g. `]}`).
    #[serde(default)]
    pub tail_bytes: u64,
    /// Maximum bytes fetched per chunk.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            head_bytes: 0,
            tail_bytes: 0,
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

fn default_max_buffer_size() -> usize {
    4 * MB
}

/// How fetched chunks are turned into records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// One record per chunk, wrapped in the head/tail framing.
    #[default]
    DoNotBreak,
    /// One record per batch of JSON objects, wrapped in the head/tail framing.
    WithHeadTail,
    /// One record per JSON object, without framing.
    WithoutHeadTail,
}

impl SplitPolicy {
    /// Whether records are wrapped in the blob's head/tail bytes.
    pub fn is_framed(&self) -> bool {
        !matches!(self, SplitPolicy::WithoutHeadTail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonConfig {
    #[serde(default)]
    pub split_policy: SplitPolicy,
    /// Objects per extracted batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            split_policy: SplitPolicy::default(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

impl Config {
    /// Load and validate configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = parse_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_storage()?;

        if self.reader.id.trim().is_empty() {
            return Err(ConfigError::EmptyReaderId);
        }
        if self.reader.list_page_size == 0 {
            return Err(ConfigError::ZeroValue {
                field: "reader.list_page_size",
            });
        }
        self.reader.compiled_filters()?;

        let lock_path = self.registry.lock_path();
        if self.registry.path.is_empty() {
            return Err(ConfigError::EmptyStorageField {
                field: "registry.path",
            });
        }
        if lock_path == self.registry.path {
            return Err(ConfigError::RegistryLockCollision { path: lock_path });
        }

        let lease = self.lease.duration_secs;
        if lease != LEASE_DISABLED && !(MIN_LEASE_SECS..=MAX_LEASE_SECS).contains(&lease) {
            return Err(ConfigError::LeaseDuration {
                value: lease,
                min: MIN_LEASE_SECS,
                max: MAX_LEASE_SECS,
            });
        }

        let buffer = self.framing.max_buffer_size;
        if buffer == 0 || buffer > MAX_BUFFER_LIMIT {
            return Err(ConfigError::BufferSize {
                value: buffer,
                max: MAX_BUFFER_LIMIT,
            });
        }
        let framing = self.framing.head_bytes.saturating_add(self.framing.tail_bytes);
        if framing >= buffer as u64 {
            return Err(ConfigError::FramingTooLarge { framing, buffer });
        }

        if self.json.batch_size == 0 {
            return Err(ConfigError::ZeroValue {
                field: "json.batch_size",
            });
        }

        self.metrics.socket_addr()?;
        Ok(())
    }

    fn validate_storage(&self) -> Result<(), ConfigError> {
        let empty = match &self.storage {
            StorageConfig::Azure(azure) if azure.account.is_empty() => Some("account"),
            StorageConfig::Azure(azure) if azure.container.is_empty() => Some("container"),
            StorageConfig::S3(s3) if s3.bucket.is_empty() => Some("bucket"),
            StorageConfig::Gcs(gcs) if gcs.bucket.is_empty() => Some("bucket"),
            StorageConfig::Local(local) if local.path.is_empty() => Some("path"),
            _ => None,
        };
        match empty {
            Some(field) => Err(ConfigError::EmptyStorageField { field }),
            None => Ok(()),
        }
    }
}
