//! Registry persistence.
//!
//! The registry is a single JSON object stored next to the blobs. Loading and
//! saving perform no locking: callers hold the registry lease around every
//! load-mutate-save sequence.

pub mod state;

pub use state::{Registry, RegistryItem};

use bytes::Bytes;
use snafu::prelude::*;
use tracing::debug;

use flurry_core::emit;
use flurry_core::metrics::events::{RegistryLoaded, RegistrySaved};

use crate::error::{
    RegistryCorruptSnafu, RegistryEncodeSnafu, RegistryError, RegistryStorageSnafu,
};
use crate::store::BlobStoreRef;

/// Loads and saves the registry document.
pub struct RegistryStore {
    store: BlobStoreRef,
    path: String,
}

impl RegistryStore {
    pub fn new(store: BlobStoreRef, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    /// Path of the registry object.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Load the registry.
    ///
    /// Fails with [`RegistryError::RegistryNotFound`] when no registry has been
    /// created yet and [`RegistryError::RegistryCorrupt`] when the object is not
    /// a registry document.
    pub async fn load(&self) -> Result<Registry, RegistryError> {
        let bytes = match self.store.get(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                return Err(RegistryError::RegistryNotFound {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(RegistryError::RegistryStorage {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let registry: Registry =
            serde_json::from_slice(&bytes).context(RegistryCorruptSnafu { path: &self.path })?;

        emit!(RegistryLoaded {
            entries: registry.len(),
            bytes: bytes.len(),
        });
        debug!(path = %self.path, entries = registry.len(), "Loaded registry");

        Ok(registry)
    }

    /// Replace the stored registry.
    pub async fn save(&self, registry: &Registry) -> Result<(), RegistryError> {
        let json =
            serde_json::to_vec(registry).context(RegistryEncodeSnafu { path: &self.path })?;
        let bytes = json.len();

        self.store
            .put(&self.path, Bytes::from(json))
            .await
            .context(RegistryStorageSnafu { path: &self.path })?;

        emit!(RegistrySaved {
            entries: registry.len(),
            bytes,
        });
        debug!(path = %self.path, entries = registry.len(), "Saved registry");

        Ok(())
    }
}
