//! Azure Blob Storage backend implementation.

use object_store::azure::MicrosoftAzureBuilder;
use object_store::{ObjectStore, RetryConfig};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AzureConfigSnafu, StorageError};

use super::{StorageConfig, StorageProvider};

/// Azure Blob Storage configuration.
///
/// Credentials not given here are picked up from the `AZURE_*` environment
/// variables understood by `object_store`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Storage account name.
    pub account: String,
    /// Container holding the blobs, the registry and the lock object.
    pub container: String,
    /// Shared account access key.
    #[serde(default)]
    pub access_key: Option<String>,
    /// Talk to a local Azurite emulator instead of the public endpoint.
    #[serde(default)]
    pub use_emulator: bool,
}

impl StorageProvider {
    pub(super) fn construct_azure(config: AzureConfig) -> Result<Self, StorageError> {
        let mut builder = MicrosoftAzureBuilder::from_env()
            .with_account(&config.account)
            .with_container_name(&config.container)
            .with_retry(RetryConfig::default());

        if let Some(access_key) = &config.access_key {
            debug!("Constructing Azure builder with account access key");
            builder = builder.with_access_key(access_key);
        }

        if config.use_emulator {
            builder = builder.with_use_emulator(true);
        }

        let canonical_url = format!(
            "https://{}.blob.core.windows.net/{}",
            config.account, config.container
        );

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(AzureConfigSnafu)?);

        Ok(Self {
            config: StorageConfig::Azure(config),
            object_store,
            canonical_url,
        })
    }
}
