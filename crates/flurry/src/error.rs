//! Error types for the flurry tailing engine.

use snafu::prelude::*;

pub use flurry_core::error::{ConfigError, LeaseError, MetricsError, StorageError};

/// Errors from loading or saving the shared registry document.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RegistryError {
    /// The registry object does not exist yet.
    #[snafu(display("Registry not found at {path}"))]
    RegistryNotFound { path: String },

    /// The registry object exists but is not a valid registry document.
    #[snafu(display("Registry at {path} is corrupt: {source}"))]
    RegistryCorrupt {
        path: String,
        source: serde_json::Error,
    },

    /// The in-memory registry could not be encoded.
    #[snafu(display("Failed to encode registry for {path}: {source}"))]
    RegistryEncode {
        path: String,
        source: serde_json::Error,
    },

    /// Storage failure while reading or writing the registry.
    #[snafu(display("Registry storage error at {path}: {source}"))]
    RegistryStorage { path: String, source: StorageError },
}

/// Errors from fetching a chunk of a blob.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReadError {
    /// Storage failure while fetching blob bytes.
    #[snafu(display("Failed to read {path} at offset {offset}: {source}"))]
    Fetch {
        path: String,
        offset: u64,
        source: StorageError,
    },
}

/// Errors from the incremental JSON splitter.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SplitError {
    /// Braces do not balance.
    #[snafu(display("Malformed JSON structure at byte {position}: {reason}"))]
    MalformedStructure {
        position: usize,
        reason: &'static str,
    },
}

/// Errors from the downstream record sink.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// The consumer side of the sink has gone away.
    #[snafu(display("Record sink closed"))]
    SinkClosed,
}

/// Failure of one claim/read/commit cycle.
///
/// Cycle errors never stop the reader; the poll loop logs them and tries
/// again after the idle interval.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CycleError {
    /// The registry lease stayed contended for the whole retry budget.
    #[snafu(display("Registry lease on {path} not acquired after {attempts} attempts"))]
    LeaseTimeout { path: String, attempts: u32 },

    /// The lease could not be acquired, broken or released.
    #[snafu(display("Registry lease error: {source}"))]
    Lease { source: LeaseError },

    /// Registry load or save failed.
    #[snafu(display("Registry error: {source}"))]
    Registry { source: RegistryError },

    /// Listing the container failed.
    #[snafu(display("Failed to list blobs: {source}"))]
    Listing { source: StorageError },

    /// Reading blob bytes failed.
    #[snafu(display("Read error: {source}"))]
    Read { source: ReadError },

    /// The fetched chunk could not be split into JSON objects.
    #[snafu(display("Split error in {path}: {source}"))]
    Split { path: String, source: SplitError },

    /// The downstream sink rejected a record.
    #[snafu(display("Sink error: {source}"))]
    Sink { source: SinkError },
}

impl CycleError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::LeaseTimeout { .. } => "lease_contention",
            CycleError::Lease { source } if source.is_contention() => "lease_contention",
            CycleError::Lease { .. } => "lease_stuck",
            CycleError::Registry {
                source: RegistryError::RegistryCorrupt { .. },
            } => "registry_corrupt",
            CycleError::Registry { .. } => "registry",
            CycleError::Listing { .. } | CycleError::Read { .. } => "storage_transient",
            CycleError::Split { .. } => "malformed_structure",
            CycleError::Sink { .. } => "sink",
        }
    }
}

impl From<RegistryError> for CycleError {
    fn from(source: RegistryError) -> Self {
        CycleError::Registry { source }
    }
}

impl From<ReadError> for CycleError {
    fn from(source: ReadError) -> Self {
        CycleError::Read { source }
    }
}

impl From<SinkError> for CycleError {
    fn from(source: SinkError) -> Self {
        CycleError::Sink { source }
    }
}

impl From<LeaseError> for CycleError {
    fn from(source: LeaseError) -> Self {
        CycleError::Lease { source }
    }
}

/// Errors that stop the binary before or outside the poll loop.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage setup error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Metrics setup error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl From<ConfigError> for RunError {
    fn from(source: ConfigError) -> Self {
        RunError::Config { source }
    }
}
