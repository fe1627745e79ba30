//! Blob-store client interface consumed by the tailing engine.

use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use flurry_core::storage::{BlobMeta, LeaseHandle, StorageProvider};

use crate::error::{LeaseError, StorageError};

/// A shared blob store handle.
pub type BlobStoreRef = Arc<dyn BlobStore>;

/// Operations the engine needs from the container holding the blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List every blob under `prefix`, sorted by path.
    async fn list_blobs(
        &self,
        prefix: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<BlobMeta>, StorageError>;

    /// Fetch `[range.start, range.end)` of a blob with its current metadata.
    async fn get_range(&self, path: &str, range: Range<u64>)
    -> Result<(BlobMeta, Bytes), StorageError>;

    /// Fetch a whole object.
    async fn get(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Create or replace an object.
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StorageError>;

    /// Try once to take the lease on `path`.
    async fn acquire_lease(
        &self,
        path: &str,
        holder: &str,
        duration: Option<Duration>,
    ) -> Result<LeaseHandle, LeaseError>;

    /// Release a lease; releasing a lease that is gone is not an error.
    async fn release_lease(&self, handle: &LeaseHandle) -> Result<bool, LeaseError>;

    /// Force-expire the lease on `path`.
    async fn break_lease(&self, path: &str) -> Result<(), LeaseError>;
}

#[async_trait]
impl BlobStore for StorageProvider {
    async fn list_blobs(
        &self,
        prefix: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<BlobMeta>, StorageError> {
        StorageProvider::list_blobs(self, prefix, page_size).await
    }

    async fn get_range(
        &self,
        path: &str,
        range: Range<u64>,
    ) -> Result<(BlobMeta, Bytes), StorageError> {
        StorageProvider::get_range(self, path, range).await
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        StorageProvider::get(self, path).await
    }

    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StorageError> {
        StorageProvider::put(self, path, bytes).await
    }

    async fn acquire_lease(
        &self,
        path: &str,
        holder: &str,
        duration: Option<Duration>,
    ) -> Result<LeaseHandle, LeaseError> {
        StorageProvider::acquire_lease(self, path, holder, duration).await
    }

    async fn release_lease(&self, handle: &LeaseHandle) -> Result<bool, LeaseError> {
        StorageProvider::release_lease(self, handle).await
    }

    async fn break_lease(&self, path: &str) -> Result<(), LeaseError> {
        StorageProvider::break_lease(self, path).await
    }
}
