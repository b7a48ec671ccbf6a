use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use fastshot_osa::ObjectStore;
use fastshot_types::{keys, ManifestEntry, MetadataIndex, OverallManifest};
use log::warn;

use crate::error::Error;
use crate::lock::CacheLock;
use crate::manager::CacheManager;

/// Backoff parameters for the manifest CAS retry loop (§4.3 step 5,
/// §6 `sync.retry_max`). Mirrors `peoci::ocidist::Client::auth_and_retry`'s
/// single-retry-on-401 shape, generalized to N attempts with growing delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), factor: 2, max_attempts: 5 }
    }
}

impl CacheManager {
    /// §4.3 "Atomic publish of a new session": upload body, then index,
    /// then CAS the manifest, retrying only the manifest step on a lost
    /// race; any permanent failure rolls back whichever of (body, index)
    /// made it to the remote (P3: never a partial publish survives).
    pub async fn publish(
        &self,
        osa: &dyn ObjectStore,
        filename: &str,
        body: Bytes,
        mut index: MetadataIndex,
        retry: &RetryPolicy,
    ) -> Result<(), Error> {
        let _lock = CacheLock::acquire_exclusive(&self.layout().lock_path())?;
        index.filename = filename.to_string();

        osa.put(&keys::body(filename), body, None).await?;

        let index_bytes = serde_json::to_vec(&index)?;
        if let Err(e) = osa.put(&keys::index(filename), Bytes::from(index_bytes), None).await {
            rollback(osa, filename, true, false).await;
            return Err(e.into());
        }

        let mut delay = retry.base;
        for attempt in 0..retry.max_attempts {
            let last_attempt = attempt + 1 == retry.max_attempts;
            match self.try_publish_manifest(osa, &index).await {
                Ok(()) => {
                    self.put_metadata_locked(index)?;
                    return Ok(());
                }
                Err(Error::ObjectStore(fastshot_osa::Error::PreconditionFailed)) if !last_attempt => {
                    warn!("manifest CAS lost for {filename}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    delay *= retry.factor;
                }
                Err(e) => {
                    rollback(osa, filename, true, true).await;
                    return Err(e);
                }
            }
        }

        rollback(osa, filename, true, true).await;
        Err(Error::ObjectStore(fastshot_osa::Error::PreconditionFailed))
    }

    async fn try_publish_manifest(&self, osa: &dyn ObjectStore, index: &MetadataIndex) -> Result<(), Error> {
        let (manifest, etag) = match osa.get(keys::MANIFEST).await? {
            Some(result) => {
                let manifest = serde_json::from_slice::<OverallManifest>(&result.bytes)
                    .unwrap_or_else(|_| OverallManifest::empty(Utc::now()));
                (manifest, result.etag.unwrap_or_default())
            }
            None => (OverallManifest::empty(Utc::now()), String::new()),
        };

        let mut updated = manifest;
        updated.upsert(ManifestEntry::from(index), Utc::now());
        osa.put(keys::MANIFEST, Bytes::from(serde_json::to_vec(&updated)?), Some(&etag))
            .await?;
        Ok(())
    }
}

async fn rollback(osa: &dyn ObjectStore, filename: &str, body: bool, index: bool) {
    if body {
        if let Err(e) = osa.delete(&keys::body(filename)).await {
            warn!("rollback: failed to delete body for {filename}: {e}");
        }
    }
    if index {
        if let Err(e) = osa.delete(&keys::index(filename)).await {
            warn!("rollback: failed to delete index for {filename}: {e}");
        }
    }
}
