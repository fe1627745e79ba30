//! Time-bounded exclusive leases emulated on top of conditional writes.
//!
//! A lease is a small JSON record stored in a dedicated lock object. Taking a
//! free lease is a create-if-absent write; taking over an expired lease is an
//! update guarded by the e-tag observed when the record was read. Releasing
//! deletes the record if it still carries the caller's lease id.
//!
//! Deletion is not conditional in `object_store`, so a release racing with a
//! takeover of an already expired lease can remove the new holder's record.
//! Leases are expected to be released well before they expire.

use bytes::Bytes;
use chrono::Utc;
use object_store::{GetOptions, PutMode, UpdateVersion};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LeaseError, StorageError};

use super::StorageProvider;

/// Persisted content of a lock object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub lease_id: String,
    /// Free-form identifier of the holder, for operators.
    #[serde(default)]
    pub holder: String,
    /// Unix milliseconds when the lease was taken.
    pub acquired_at: i64,
    /// Unix milliseconds after which the lease may be taken over.
    /// `None` never expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl LeaseRecord {
    fn new(holder: &str, duration: Option<Duration>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            lease_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: duration.map(|d| now.saturating_add(d.as_millis() as i64)),
        }
    }

    /// Whether the lease has lapsed at `now_ms`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now_ms)
    }
}

/// Handle proving ownership of a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHandle {
    pub path: String,
    pub lease_id: String,
}

impl StorageProvider {
    /// Try once to acquire the lease on `path`.
    ///
    /// Fails with [`LeaseError::AlreadyPresent`] while another holder's lease
    /// is live, and with [`LeaseError::Stuck`] when the lock object holds a
    /// record that cannot be interpreted or replaced in place.
    pub async fn acquire_lease(
        &self,
        path: &str,
        holder: &str,
        duration: Option<Duration>,
    ) -> Result<LeaseHandle, LeaseError> {
        let record = LeaseRecord::new(holder, duration);
        let body = encode(path, &record)?;

        match self
            .put_with_mode(path, body.clone(), PutMode::Create)
            .await
        {
            Ok(_) => {
                debug!(path, lease_id = %record.lease_id, "Lease acquired");
                Ok(handle(path, &record))
            }
            Err(e) if e.is_already_exists() => self.take_over_expired(path, record, body).await,
            Err(source) => Err(storage_failure(path, source)),
        }
    }

    /// Release a lease. Missing lock objects and foreign leases are not errors.
    ///
    /// Returns `true` when this call removed the caller's lease.
    pub async fn release_lease(&self, handle: &LeaseHandle) -> Result<bool, LeaseError> {
        let path = handle.path.as_str();
        let (_, bytes) = match self.fetch(path, GetOptions::default()).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(source) => return Err(storage_failure(path, source)),
        };

        let current: LeaseRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(path, error = %e, "Lock object is unreadable, leaving it in place");
                return Ok(false);
            }
        };

        if current.lease_id != handle.lease_id {
            warn!(
                path,
                holder = %current.holder,
                "Lease was taken over before release"
            );
            return Ok(false);
        }

        match self.delete(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(source) => Err(storage_failure(path, source)),
        }
    }

    /// Force-expire whatever lease is held on `path`.
    pub async fn break_lease(&self, path: &str) -> Result<(), LeaseError> {
        match self.delete(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(source) => Err(storage_failure(path, source)),
        }
    }

    /// Read the current lease record, if the lock object exists.
    pub async fn read_lease(&self, path: &str) -> Result<Option<LeaseRecord>, LeaseError> {
        match self.fetch(path, GetOptions::default()).await {
            Ok((_, bytes)) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                LeaseError::Stuck {
                    path: path.to_string(),
                    reason: format!("unreadable lease record: {e}"),
                }
            }),
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(storage_failure(path, source)),
        }
    }

    async fn take_over_expired(
        &self,
        path: &str,
        record: LeaseRecord,
        body: Bytes,
    ) -> Result<LeaseHandle, LeaseError> {
        let (meta, bytes) = match self.fetch(path, GetOptions::default()).await {
            Ok(found) => found,
            // Released between our create and this read; retrying will win.
            Err(e) if e.is_not_found() => {
                return Err(LeaseError::AlreadyPresent {
                    path: path.to_string(),
                });
            }
            Err(source) => return Err(storage_failure(path, source)),
        };

        let current: LeaseRecord =
            serde_json::from_slice(&bytes).map_err(|e| LeaseError::Stuck {
                path: path.to_string(),
                reason: format!("unreadable lease record: {e}"),
            })?;

        if !current.is_expired_at(Utc::now().timestamp_millis()) {
            return Err(LeaseError::AlreadyPresent {
                path: path.to_string(),
            });
        }

        debug!(
            path,
            previous_holder = %current.holder,
            "Taking over expired lease"
        );

        let version = UpdateVersion {
            e_tag: meta.e_tag,
            version: meta.version,
        };
        match self.put_with_mode(path, body, PutMode::Update(version)).await {
            Ok(_) => Ok(handle(path, &record)),
            Err(e) if e.is_precondition_failed() || e.is_already_exists() => {
                Err(LeaseError::AlreadyPresent {
                    path: path.to_string(),
                })
            }
            Err(StorageError::ObjectStore {
                source: object_store::Error::NotImplemented,
            }) => Err(LeaseError::Stuck {
                path: path.to_string(),
                reason: "expired lease cannot be replaced in place on this backend".to_string(),
            }),
            Err(source) => Err(storage_failure(path, source)),
        }
    }
}

fn encode(path: &str, record: &LeaseRecord) -> Result<Bytes, LeaseError> {
    serde_json::to_vec(record)
        .map(Bytes::from)
        .map_err(|e| LeaseError::Stuck {
            path: path.to_string(),
            reason: format!("cannot encode lease record: {e}"),
        })
}

fn handle(path: &str, record: &LeaseRecord) -> LeaseHandle {
    LeaseHandle {
        path: path.to_string(),
        lease_id: record.lease_id.clone(),
    }
}

fn storage_failure(path: &str, source: StorageError) -> LeaseError {
    LeaseError::LeaseStorage {
        path: path.to_string(),
        source,
    }
}
