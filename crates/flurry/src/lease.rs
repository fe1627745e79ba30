//! Acquisition of the registry lease with bounded retry.
//!
//! Every load-mutate-save of the registry runs between [`LeaseManager::acquire`]
//! and [`LeaseManager::release`]. Contention is retried at a fixed interval up
//! to the configured budget. Any other acquisition failure means the lock
//! object is in a state nobody can take over in place, so the lease is broken
//! and acquisition starts again.

use std::time::Instant;

use tracing::{debug, warn};

use flurry_core::emit;
use flurry_core::metrics::events::{LeaseAcquired, LeaseBroken, LeaseContention, LeaseTimedOut};
use flurry_core::storage::LeaseHandle;

use crate::config::LeaseConfig;
use crate::error::CycleError;
use crate::store::BlobStoreRef;

/// Takes and gives back the lease guarding the registry.
pub struct LeaseManager {
    store: BlobStoreRef,
    lock_path: String,
    holder: String,
    config: LeaseConfig,
}

impl LeaseManager {
    pub fn new(
        store: BlobStoreRef,
        lock_path: impl Into<String>,
        holder: impl Into<String>,
        config: LeaseConfig,
    ) -> Self {
        Self {
            store,
            lock_path: lock_path.into(),
            holder: holder.into(),
            config,
        }
    }

    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    /// Whether registry access is serialized at all.
    pub fn is_enabled(&self) -> bool {
        self.config.duration().is_some()
    }

    /// Acquire the lease, waiting out contention.
    ///
    /// Returns `Ok(None)` when the lease is disabled. Fails with
    /// [`CycleError::LeaseTimeout`] once `max_retries` retries have all found
    /// the lease held.
    pub async fn acquire(&self) -> Result<Option<LeaseHandle>, CycleError> {
        let Some(duration) = self.config.duration() else {
            return Ok(None);
        };

        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            let error = match self
                .store
                .acquire_lease(&self.lock_path, &self.holder, Some(duration))
                .await
            {
                Ok(handle) => {
                    emit!(LeaseAcquired {
                        attempts,
                        wait: started.elapsed(),
                        reader: self.holder.clone(),
                    });
                    debug!(path = %self.lock_path, attempts, "Acquired registry lease");
                    return Ok(Some(handle));
                }
                Err(e) => e,
            };

            attempts += 1;

            if error.is_contention() {
                emit!(LeaseContention {
                    reader: self.holder.clone(),
                });
                if attempts > self.config.max_retries {
                    emit!(LeaseTimedOut {
                        reader: self.holder.clone(),
                    });
                    return Err(CycleError::LeaseTimeout {
                        path: self.lock_path.clone(),
                        attempts,
                    });
                }
                tokio::time::sleep(self.config.retry_interval()).await;
                continue;
            }

            warn!(
                path = %self.lock_path,
                error = %error,
                attempts,
                "Registry lease unusable, breaking it"
            );
            if attempts > self.config.max_retries {
                return Err(CycleError::Lease { source: error });
            }
            self.store
                .break_lease(&self.lock_path)
                .await
                .map_err(|source| CycleError::Lease { source })?;
            emit!(LeaseBroken {
                reader: self.holder.clone(),
            });
        }
    }

    /// Release a lease taken by [`acquire`](Self::acquire).
    ///
    /// Failures are logged only; the lease lapses on its own.
    pub async fn release(&self, handle: Option<LeaseHandle>) {
        let Some(handle) = handle else {
            return;
        };
        match self.store.release_lease(&handle).await {
            Ok(true) => debug!(path = %handle.path, "Released registry lease"),
            Ok(false) => warn!(path = %handle.path, "Registry lease was no longer ours at release"),
            Err(e) => warn!(path = %handle.path, error = %e, "Failed to release registry lease"),
        }
    }
}
