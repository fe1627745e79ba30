//! Common error types shared across flurry crates.
//!
//! This module defines error types for storage, lease, configuration and
//! metrics operations.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error: {source}"))]
    AzureConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Check if a conditional write lost because the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore {
                source: object_store::Error::AlreadyExists { .. }
            }
        )
    }

    /// Check if a conditional write lost because the object changed underneath it.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore {
                source: object_store::Error::Precondition { .. }
            }
        )
    }
}

// ============ Lease Errors ============

/// Errors returned by the lease primitive of a blob store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LeaseError {
    /// Another holder has an active lease on the resource.
    #[snafu(display("Lease already present on {path}"))]
    AlreadyPresent { path: String },

    /// The existing lease can neither be honoured nor taken over in place.
    #[snafu(display("Lease on {path} is stuck: {reason}"))]
    Stuck { path: String, reason: String },

    /// Storage failure while manipulating the lock object.
    #[snafu(display("Lease storage error on {path}: {source}"))]
    LeaseStorage { path: String, source: StorageError },
}

impl LeaseError {
    /// Contention is the only lease failure that waiting can fix.
    pub fn is_contention(&self) -> bool {
        matches!(self, LeaseError::AlreadyPresent { .. })
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Container or bucket name is empty.
    #[snafu(display("Storage {field} cannot be empty"))]
    EmptyStorageField { field: &'static str },

    /// Lease duration is neither the disabling sentinel nor within bounds.
    #[snafu(display("Lease duration must be -1 or between {min} and {max} seconds, got {value}"))]
    LeaseDuration { value: i64, min: i64, max: i64 },

    /// A size or count option that must be positive was zero.
    #[snafu(display("'{field}' must be greater than zero"))]
    ZeroValue { field: &'static str },

    /// Chunk buffer size is outside the supported range.
    #[snafu(display("max_buffer_size must be between 1 and {max} bytes, got {value}"))]
    BufferSize { value: usize, max: usize },

    /// Head/tail framing does not fit inside one chunk.
    #[snafu(display(
        "head_bytes + tail_bytes ({framing}) must be smaller than max_buffer_size ({buffer})"
    ))]
    FramingTooLarge { framing: u64, buffer: usize },

    /// A path filter is not a valid regular expression.
    #[snafu(display("Invalid path filter '{pattern}': {source}"))]
    PathFilter {
        pattern: String,
        source: regex::Error,
    },

    /// Registry and lock objects must be distinct.
    #[snafu(display("Registry path and lock path must differ (both '{path}')"))]
    RegistryLockCollision { path: String },

    /// Reader identifier is empty.
    #[snafu(display("Reader id cannot be empty"))]
    EmptyReaderId,

    /// Metrics address is not a socket address.
    #[snafu(display("Invalid metrics address '{address}': {source}"))]
    MetricsAddress {
        address: String,
        source: std::net::AddrParseError,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics server already initialized (double-init attempted).
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics server not initialized (controller accessed before init).
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}
