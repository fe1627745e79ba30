//! S3 (and S3-compatible) backend implementation.

use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::{ObjectStore, RetryConfig};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{S3ConfigSnafu, StorageError};

use super::{StorageConfig, StorageProvider};

/// S3 configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, Ceph RadosGW).
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl StorageProvider {
    pub(super) fn construct_s3(config: S3Config) -> Result<Self, StorageError> {
        // Leases rely on If-Match/If-None-Match writes.
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_conditional_put(S3ConditionalPut::ETagMatch)
            .with_retry(RetryConfig::default());

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        let canonical_url = match &config.endpoint {
            Some(endpoint) => {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"));
                format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket)
            }
            None => format!("s3://{}", config.bucket),
        };

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(S3ConfigSnafu)?);

        Ok(Self {
            config: StorageConfig::S3(config),
            object_store,
            canonical_url,
        })
    }
}
