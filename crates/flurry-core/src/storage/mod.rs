//! Multi-cloud blob container abstraction.
//!
//! Provides a unified interface over Azure Blob Storage, S3, GCS, the local
//! filesystem and an in-memory store, plus a lease primitive emulated on top
//! of conditional writes (see [`lease`]).

mod azure;
mod gcs;
pub mod lease;
mod local;
mod s3;

use bytes::Bytes;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetRange, ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload, PutResult,
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

pub use azure::AzureConfig;
pub use gcs::GcsConfig;
pub use lease::{LeaseHandle, LeaseRecord};
pub use local::LocalConfig;
pub use s3::S3Config;

/// Storage backend selection, tagged by `backend` in YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Azure(AzureConfig),
    S3(S3Config),
    Gcs(GcsConfig),
    Local(LocalConfig),
    /// Process-local store, useful for tests and dry runs.
    Memory,
}

impl StorageConfig {
    /// Name of the backend for logs.
    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::Azure(_) => "azure",
            StorageConfig::S3(_) => "s3",
            StorageConfig::Gcs(_) => "gcs",
            StorageConfig::Local(_) => "local",
            StorageConfig::Memory => "memory",
        }
    }
}

/// Listing entry for one blob in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    /// Container-relative path.
    pub path: String,
    /// Version tag reported by the store (empty when the backend has none).
    pub etag: String,
    /// Current content length in bytes.
    pub content_length: u64,
}

impl From<ObjectMeta> for BlobMeta {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            path: meta.location.to_string(),
            etag: meta.e_tag.unwrap_or_default(),
            content_length: meta.size,
        }
    }
}

/// Storage provider that abstracts over different blob container backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: StorageConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the configured backend.
    pub async fn for_config(config: &StorageConfig) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Azure(azure) => Self::construct_azure(azure.clone()),
            StorageConfig::S3(s3) => Self::construct_s3(s3.clone()),
            StorageConfig::Gcs(gcs) => Self::construct_gcs(gcs.clone()),
            StorageConfig::Local(local) => Self::construct_local(local.clone()).await,
            StorageConfig::Memory => Ok(Self::in_memory()),
        }
    }

    /// Create a provider backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self {
            config: StorageConfig::Memory,
            object_store: Arc::new(InMemory::new()),
            canonical_url: "memory://".to_string(),
        }
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Canonical URL of the container, for logs.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// List every blob under `prefix`.
    ///
    /// `object_store` follows continuation tokens with the backend's own
    /// request page size; `page_size` only groups the resulting stream into
    /// batches on the client side and is reported in the debug log. Results
    /// are sorted by path so callers see a stable order.
    pub async fn list_blobs(
        &self,
        prefix: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<BlobMeta>, StorageError> {
        let start = Instant::now();
        let prefix = prefix.filter(|p| !p.is_empty()).map(Path::from);
        let mut pages = self
            .object_store
            .list(prefix.as_ref())
            .chunks(page_size.max(1));

        let mut blobs = Vec::new();
        let mut page_count = 0usize;
        let mut failed = None;

        'pages: while let Some(page) = pages.next().await {
            page_count += 1;
            for entry in page {
                match entry {
                    Ok(meta) => blobs.push(BlobMeta::from(meta)),
                    Err(source) => {
                        failed = Some(source);
                        break 'pages;
                    }
                }
            }
        }

        observe(StorageOperation::List, start, failed.is_none());
        if let Some(source) = failed {
            return Err(StorageError::ObjectStore { source });
        }

        debug!(
            "Listed {} blobs in {} page(s) from {}",
            blobs.len(),
            page_count,
            self.canonical_url
        );

        blobs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(blobs)
    }

    /// Get the full contents of a blob.
    pub async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let (_, bytes) = self.fetch(path, GetOptions::default()).await?;
        Ok(bytes)
    }

    /// Get the byte range `[range.start, range.end)` of a blob with its metadata.
    ///
    /// An empty range issues a metadata-only request and returns no bytes.
    pub async fn get_range(
        &self,
        path: &str,
        range: Range<u64>,
    ) -> Result<(BlobMeta, Bytes), StorageError> {
        if range.start >= range.end {
            let meta = self.head(path).await?;
            return Ok((meta, Bytes::new()));
        }

        let options = GetOptions {
            range: Some(GetRange::Bounded(range)),
            ..Default::default()
        };
        let (meta, bytes) = self.fetch(path, options).await?;
        Ok((BlobMeta::from(meta), bytes))
    }

    /// Get metadata for a blob.
    pub async fn head(&self, path: &str) -> Result<BlobMeta, StorageError> {
        let start = Instant::now();
        let result = self.object_store.head(&Path::from(path)).await;
        observe(StorageOperation::Head, start, result.is_ok());
        Ok(BlobMeta::from(result.context(ObjectStoreSnafu)?))
    }

    /// Create or replace a blob with the given bytes.
    pub async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StorageError> {
        self.put_with_mode(path, bytes, PutMode::Overwrite).await?;
        Ok(())
    }

    /// Write a blob with an explicit conditional mode.
    pub async fn put_with_mode(
        &self,
        path: &str,
        bytes: Bytes,
        mode: PutMode,
    ) -> Result<PutResult, StorageError> {
        let options = PutOptions {
            mode,
            ..Default::default()
        };
        let start = Instant::now();
        let result = self
            .object_store
            .put_opts(&Path::from(path), PutPayload::from(bytes), options)
            .await;
        observe(StorageOperation::Put, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// Delete a blob.
    pub async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(&Path::from(path)).await;
        observe(StorageOperation::Delete, start, result.is_ok());
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Issue a GET and collect the body together with the raw object metadata.
    pub(crate) async fn fetch(
        &self,
        path: &str,
        options: GetOptions,
    ) -> Result<(ObjectMeta, Bytes), StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get_opts(&Path::from(path), options).await {
            Ok(response) => {
                let meta = response.meta.clone();
                response.bytes().await.map(|bytes| (meta, bytes))
            }
            Err(e) => Err(e),
        };
        observe(StorageOperation::Get, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }
}

fn observe(operation: StorageOperation, start: Instant, ok: bool) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_blobs_sorted_with_lengths() {
        let storage = StorageProvider::in_memory();
        storage
            .put("logs/b.log", Bytes::from_static(b"bb"))
            .await
            .unwrap();
        storage
            .put("logs/a.log", Bytes::from_static(b"aaaa"))
            .await
            .unwrap();

        let blobs = storage.list_blobs(None, 1).await.unwrap();

        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].path, "logs/a.log");
        assert_eq!(blobs[0].content_length, 4);
        assert_eq!(blobs[1].path, "logs/b.log");
        assert_eq!(blobs[1].content_length, 2);
    }

    #[tokio::test]
    async fn test_list_blobs_with_prefix() {
        let storage = StorageProvider::in_memory();
        storage.put("logs/a.log", Bytes::from_static(b"a")).await.unwrap();
        storage.put("data/registry.dat", Bytes::from_static(b"{}")).await.unwrap();

        let blobs = storage.list_blobs(Some("logs"), 100).await.unwrap();

        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].path, "logs/a.log");
    }

    #[tokio::test]
    async fn test_get_range_returns_slice_and_meta() {
        let storage = StorageProvider::in_memory();
        storage
            .put("a.log", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        let (meta, bytes) = storage.get_range("a.log", 2..5).await.unwrap();

        assert_eq!(bytes.as_ref(), b"234");
        assert_eq!(meta.content_length, 10);
        assert_eq!(meta.path, "a.log");
    }

    #[tokio::test]
    async fn test_get_range_empty_range_is_metadata_only() {
        let storage = StorageProvider::in_memory();
        storage.put("a.log", Bytes::from_static(b"abc")).await.unwrap();

        let (meta, bytes) = storage.get_range("a.log", 3..3).await.unwrap();

        assert!(bytes.is_empty());
        assert_eq!(meta.content_length, 3);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let storage = StorageProvider::in_memory();
        let err = storage.get("missing.dat").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_mode_rejects_existing() {
        let storage = StorageProvider::in_memory();
        storage
            .put_with_mode("lock", Bytes::from_static(b"1"), PutMode::Create)
            .await
            .unwrap();

        let err = storage
            .put_with_mode("lock", Bytes::from_static(b"2"), PutMode::Create)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_local_backend_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::Local(LocalConfig {
            path: temp_dir.path().to_str().unwrap().to_string(),
        });
        let storage = StorageProvider::for_config(&config).await.unwrap();

        storage
            .put("nested/a.log", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let content = storage.get("nested/a.log").await.unwrap();
        assert_eq!(content.as_ref(), b"hello");

        let blobs = storage.list_blobs(None, 10).await.unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].path, "nested/a.log");

        storage.delete("nested/a.log").await.unwrap();
        assert!(storage.get("nested/a.log").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_storage_config_yaml() {
        let yaml = r#"
backend: azure
account: myaccount
container: insights-logs
access_key: secret
"#;
        let config: StorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend_name(), "azure");
        match config {
            StorageConfig::Azure(azure) => {
                assert_eq!(azure.account, "myaccount");
                assert_eq!(azure.container, "insights-logs");
                assert_eq!(azure.access_key.as_deref(), Some("secret"));
            }
            other => panic!("unexpected backend: {other:?}"),
        }

        let memory: StorageConfig = serde_yaml::from_str("backend: memory").unwrap();
        assert_eq!(memory, StorageConfig::Memory);
    }
}
