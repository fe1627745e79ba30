//! Internal events for flurry metrics emission.
//!
//! Each event struct represents a measurable occurrence while tailing blobs.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.
//!
//! ## Reader Labels
//!
//! Several readers usually share one container, so per-reader events carry a
//! `reader` label with the reader id.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    List,
    Get,
    Head,
    Put,
    Delete,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::List => "list",
            StorageOperation::Get => "get",
            StorageOperation::Head => "head",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "flurry_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "flurry_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Lease events
// ============================================================================

/// Event emitted when the registry lease is acquired.
pub struct LeaseAcquired {
    /// Failed attempts before the lease was granted.
    pub attempts: u32,
    pub wait: Duration,
    pub reader: String,
}

impl InternalEvent for LeaseAcquired {
    fn emit(self) {
        trace!(
            attempts = self.attempts,
            wait_ms = self.wait.as_millis(),
            reader = %self.reader,
            "Lease acquired"
        );
        counter!("flurry_lease_acquired_total", "reader" => self.reader.clone()).increment(1);
        histogram!("flurry_lease_wait_seconds", "reader" => self.reader)
            .record(self.wait.as_secs_f64());
    }
}

/// Event emitted when an acquisition attempt finds the lease held elsewhere.
pub struct LeaseContention {
    pub reader: String,
}

impl InternalEvent for LeaseContention {
    fn emit(self) {
        trace!(reader = %self.reader, "Lease contention");
        counter!("flurry_lease_contention_total", "reader" => self.reader).increment(1);
    }
}

/// Event emitted when a stuck lease is forcibly broken.
pub struct LeaseBroken {
    pub reader: String,
}

impl InternalEvent for LeaseBroken {
    fn emit(self) {
        trace!(reader = %self.reader, "Lease broken");
        counter!("flurry_lease_broken_total", "reader" => self.reader).increment(1);
    }
}

/// Event emitted when the lease could not be obtained within the retry budget.
pub struct LeaseTimedOut {
    pub reader: String,
}

impl InternalEvent for LeaseTimedOut {
    fn emit(self) {
        trace!(reader = %self.reader, "Lease timed out");
        counter!("flurry_lease_timeouts_total", "reader" => self.reader).increment(1);
    }
}

// ============================================================================
// Registry events
// ============================================================================

/// Event emitted when the registry document is loaded.
pub struct RegistryLoaded {
    pub entries: usize,
    pub bytes: usize,
}

impl InternalEvent for RegistryLoaded {
    fn emit(self) {
        trace!(entries = self.entries, bytes = self.bytes, "Registry loaded");
        counter!("flurry_registry_loads_total").increment(1);
        gauge!("flurry_registry_entries").set(self.entries as f64);
    }
}

/// Event emitted when the registry document is saved.
pub struct RegistrySaved {
    pub entries: usize,
    pub bytes: usize,
}

impl InternalEvent for RegistrySaved {
    fn emit(self) {
        trace!(entries = self.entries, bytes = self.bytes, "Registry saved");
        counter!("flurry_registry_saves_total").increment(1);
        gauge!("flurry_registry_entries").set(self.entries as f64);
        gauge!("flurry_registry_bytes").set(self.bytes as f64);
    }
}

// ============================================================================
// Tailing events
// ============================================================================

/// Event emitted when listing finds blobs the registry did not know about.
pub struct BlobsDiscovered {
    pub count: u64,
    pub reader: String,
}

impl InternalEvent for BlobsDiscovered {
    fn emit(self) {
        trace!(count = self.count, reader = %self.reader, "Blobs discovered");
        counter!("flurry_blobs_discovered_total", "reader" => self.reader).increment(self.count);
    }
}

/// Event emitted when a reader claims a blob for a cycle.
pub struct BlobClaimed {
    pub reader: String,
}

impl InternalEvent for BlobClaimed {
    fn emit(self) {
        trace!(reader = %self.reader, "Blob claimed");
        counter!("flurry_blobs_claimed_total", "reader" => self.reader).increment(1);
    }
}

/// Event emitted to track blobs that still have unread bytes.
pub struct PendingBlobs {
    pub count: usize,
    pub reader: String,
}

impl InternalEvent for PendingBlobs {
    fn emit(self) {
        trace!(count = self.count, reader = %self.reader, "Pending blobs");
        gauge!("flurry_pending_blobs", "reader" => self.reader).set(self.count as f64);
    }
}

/// Event emitted when blob bytes are fetched for a chunk.
pub struct BytesRead {
    pub bytes: u64,
    pub reader: String,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, reader = %self.reader, "Bytes read");
        counter!("flurry_bytes_read_total", "reader" => self.reader).increment(self.bytes);
    }
}

/// Event emitted when records are handed to the sink.
pub struct RecordsEmitted {
    pub count: u64,
    pub reader: String,
}

impl InternalEvent for RecordsEmitted {
    fn emit(self) {
        trace!(count = self.count, reader = %self.reader, "Records emitted");
        counter!("flurry_records_emitted_total", "reader" => self.reader).increment(self.count);
    }
}

/// Event emitted when a chunk cannot be split into JSON objects.
pub struct MalformedChunk {
    pub reader: String,
}

impl InternalEvent for MalformedChunk {
    fn emit(self) {
        trace!(reader = %self.reader, "Malformed chunk");
        counter!("flurry_malformed_chunks_total", "reader" => self.reader).increment(1);
    }
}

/// Event emitted when a cycle fails, labelled by failure kind.
pub struct CycleFailed {
    pub kind: &'static str,
    pub reader: String,
}

impl InternalEvent for CycleFailed {
    fn emit(self) {
        trace!(kind = self.kind, reader = %self.reader, "Cycle failed");
        counter!(
            "flurry_cycle_failures_total",
            "kind" => self.kind,
            "reader" => self.reader
        )
        .increment(1);
    }
}

// ============================================================================
// Polling iteration events
// ============================================================================

/// Result type for iteration metrics.
#[derive(Debug, Clone, Copy)]
pub enum IterationResultType {
    MoreData,
    Drained,
    NoItems,
    Failed,
}

impl IterationResultType {
    fn as_str(&self) -> &'static str {
        match self {
            IterationResultType::MoreData => "more_data",
            IterationResultType::Drained => "drained",
            IterationResultType::NoItems => "no_items",
            IterationResultType::Failed => "failed",
        }
    }
}

/// Event emitted when a polling iteration completes.
pub struct IterationCompleted {
    pub result: IterationResultType,
    pub reader: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        trace!(
            result = self.result.as_str(),
            reader = %self.reader,
            "Iteration completed"
        );
        counter!(
            "flurry_polling_iterations_total",
            "result" => self.result.as_str(),
            "reader" => self.reader
        )
        .increment(1);
    }
}

/// Event emitted to track polling iteration duration.
///
/// Measures time spent in prepare + process phases.
pub struct IterationDuration {
    pub duration: Duration,
    pub reader: String,
}

impl InternalEvent for IterationDuration {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            reader = %self.reader,
            "Iteration duration"
        );
        histogram!(
            "flurry_polling_iteration_duration_seconds",
            "reader" => self.reader
        )
        .record(self.duration.as_secs_f64());
    }
}
