use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use fastshot_cache::CacheManager;
use fastshot_codec::{derive_index, encode, ImageFiles, Session};
use fastshot_ops::{JobError, OperationManager, Progress, RetryPolicy as JobRetryPolicy};
use fastshot_osa::{ObjectStore, S3Config, S3ObjectStore};
use fastshot_types::{
    Checksum, IntegrityReport, MetadataIndex, OperationId, OperationKind, OperationRecord,
    OrphanPolicy,
};
use log::info;

use crate::config::Config;
use crate::error::Error;

/// Wires OSA, AC, MCM and AOM into the single object the rest of an
/// application talks to (§9 "Initialization order": config, then object
/// store, then cache manager, then operation manager). Grounded on
/// `peserver::worker`'s `main()`, which builds its adapter and pool in the
/// same fixed order before taking requests.
pub struct Facade {
    config: Config,
    object_store: Option<Arc<dyn ObjectStore>>,
    cache: Arc<CacheManager>,
    operations: OperationManager,
}

impl Facade {
    pub async fn new(config: Config) -> Result<Self, Error> {
        let object_store: Option<Arc<dyn ObjectStore>> = if config.object_store_configured() {
            let s3_config = S3Config {
                endpoint: config.object_store.endpoint.clone(),
                bucket: config.object_store.bucket.clone().unwrap_or_default(),
                region: config.object_store.region.clone().unwrap_or_else(|| "us-east-1".to_string()),
                access_key: config.object_store.access_key.clone().unwrap_or_default(),
                secret_key: config.object_store.secret_key.clone().unwrap_or_default(),
                proxy_url: config.object_store.proxy_url.clone(),
                tls_verify: config.object_store.tls_verify,
                op_timeout: std::time::Duration::from_secs(config.sync.op_timeout_s),
            };
            Some(Arc::new(S3ObjectStore::connect(s3_config).await))
        } else {
            info!("object_store not configured; running with a local-only cache");
            None
        };
        Self::with_object_store(config, object_store)
    }

    /// Builds a `Facade` around a caller-supplied object store rather than
    /// one built from `config.object_store` -- the injection seam a test
    /// uses to drive the worker-pool jobs below against a
    /// [`fastshot_osa::MemoryObjectStore`] instead of a real S3 bucket,
    /// mirroring `peoci::ocidist_cache`'s builder-style split between
    /// "build the real client" and "take one I was handed".
    pub fn with_object_store(config: Config, object_store: Option<Arc<dyn ObjectStore>>) -> Result<Self, Error> {
        let cache = Arc::new(CacheManager::open(&config.cache.root_dir, config.cache.max_body_bytes)?);

        let operations = OperationManager::new(
            config.sync.workers,
            std::time::Duration::from_secs(3600),
            JobRetryPolicy {
                base: std::time::Duration::from_secs(1),
                factor: 2,
                max_attempts: config.sync.retry_max,
            },
        );

        Ok(Self { config, object_store, cache, operations })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    fn object_store(&self) -> Result<Arc<dyn ObjectStore>, Error> {
        self.object_store.clone().ok_or(Error::NotConfigured)
    }

    pub fn list_metadata(&self) -> Vec<MetadataIndex> {
        self.cache.list_metadata()
    }

    pub fn get_metadata(&self, filename: &str) -> Result<MetadataIndex, Error> {
        Ok(self.cache.get_metadata(filename)?)
    }

    pub fn validate_integrity(&self) -> Result<IntegrityReport, Error> {
        Ok(self.cache.validate_integrity()?)
    }

    /// Encrypts and uploads one session synchronously -- used by callers
    /// that want to await the result directly rather than poll an
    /// operation, e.g. a CLI one-shot invocation.
    pub async fn publish_now(
        &self,
        filename: &str,
        session: &Session,
        image_files: &ImageFiles,
    ) -> Result<(), Error> {
        let passphrase = self
            .config
            .security
            .encryption_key
            .as_deref()
            .ok_or(Error::NotConfigured)?;
        let body = encode(session, image_files, passphrase.as_bytes())?;
        let checksum = Checksum::of(&body);
        let index = derive_index(session, filename, checksum, body.len() as u64, Utc::now());
        let osa = self.object_store()?;
        self.cache
            .publish(
                osa.as_ref(),
                filename,
                Bytes::from(body),
                index,
                &fastshot_cache::RetryPolicy {
                    base: std::time::Duration::from_secs(1),
                    factor: 2,
                    max_attempts: self.config.sync.retry_max,
                },
            )
            .await?;
        Ok(())
    }

    /// Submits a background publish; progress and the final result are
    /// retrieved through [`Facade::status`] (§4.4).
    pub fn submit_publish(
        &self,
        filename: String,
        session: Session,
        image_files: ImageFiles,
    ) -> OperationId {
        let cache = self.cache.clone();
        let object_store = self.object_store.clone();
        let passphrase = self.config.security.encryption_key.clone();
        let retry_max = self.config.sync.retry_max;

        self.operations.submit(
            OperationKind::PublishSession,
            Box::new(move |token, progress| {
                let cache = cache.clone();
                let object_store = object_store.clone();
                let passphrase = passphrase.clone();
                let filename = filename.clone();
                let session = session.clone();
                let image_files = image_files.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return Err(JobError::cancelled());
                    }
                    let osa = object_store.ok_or_else(|| {
                        JobError::new(fastshot_types::ErrorKind::NotConfigured, "object store not configured")
                    })?;
                    let passphrase = passphrase.ok_or_else(|| {
                        JobError::new(fastshot_types::ErrorKind::NotConfigured, "security.encryption_key not set")
                    })?;
                    let body = encode(&session, &image_files, passphrase.as_bytes())
                        .map_err(|e| JobError::from_classify(&e))?;
                    let checksum = Checksum::of(&body);
                    let index = derive_index(&session, &filename, checksum, body.len() as u64, Utc::now());
                    let _ = progress.send(Progress {
                        operation_id: OperationId(0),
                        progress: 0.5,
                        message: Some("uploading".to_string()),
                    });
                    cache
                        .publish(
                            osa.as_ref(),
                            &filename,
                            Bytes::from(body),
                            index,
                            &fastshot_cache::RetryPolicy {
                                base: std::time::Duration::from_secs(1),
                                factor: 2,
                                max_attempts: retry_max,
                            },
                        )
                        .await
                        .map_err(|e| JobError::from_classify(&e))?;
                    Ok(serde_json::Value::Null)
                })
            }),
        )
    }

    pub fn submit_sync(&self, orphan_policy: OrphanPolicy) -> OperationId {
        let cache = self.cache.clone();
        let object_store = self.object_store.clone();
        self.operations.submit(
            OperationKind::SyncWithRemote,
            Box::new(move |token, _progress| {
                let cache = cache.clone();
                let object_store = object_store.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return Err(JobError::cancelled());
                    }
                    let osa = object_store.ok_or_else(|| {
                        JobError::new(fastshot_types::ErrorKind::NotConfigured, "object store not configured")
                    })?;
                    let report = cache
                        .sync_with_remote(osa.as_ref(), orphan_policy)
                        .await
                        .map_err(|e| JobError::from_classify(&e))?;
                    Ok(serde_json::to_value(format!(
                        "fetched={} revalidated={} orphans={}",
                        report.fetched,
                        report.revalidated,
                        report.orphans.len()
                    ))
                    .unwrap())
                })
            }),
        )
    }

    pub fn submit_repair(&self) -> OperationId {
        let cache = self.cache.clone();
        let object_store = self.object_store.clone();
        self.operations.submit(
            OperationKind::Repair,
            Box::new(move |token, _progress| {
                let cache = cache.clone();
                let object_store = object_store.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return Err(JobError::cancelled());
                    }
                    let osa = object_store.ok_or_else(|| {
                        JobError::new(fastshot_types::ErrorKind::NotConfigured, "object store not configured")
                    })?;
                    let report = cache
                        .repair_cloud_structure(osa.as_ref())
                        .await
                        .map_err(|e| JobError::from_classify(&e))?;
                    Ok(serde_json::to_value(report).unwrap())
                })
            }),
        )
    }

    pub fn submit_rebuild_manifest(&self) -> OperationId {
        let cache = self.cache.clone();
        let object_store = self.object_store.clone();
        self.operations.submit(
            OperationKind::RebuildManifest,
            Box::new(move |token, _progress| {
                let cache = cache.clone();
                let object_store = object_store.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return Err(JobError::cancelled());
                    }
                    let osa = object_store.ok_or_else(|| {
                        JobError::new(fastshot_types::ErrorKind::NotConfigured, "object store not configured")
                    })?;
                    let report = cache
                        .recover_from_corruption(Some(osa.as_ref()))
                        .await
                        .map_err(|e| JobError::from_classify(&e))?;
                    Ok(serde_json::to_value(report).unwrap())
                })
            }),
        )
    }

    /// Rebuilds every index from its remote body from scratch (§4.1
    /// `RebuildIndexes`, spec scenario 6). Indexes are rewritten one body
    /// at a time with no manifest write in between, so a cancellation mid
    /// pass leaves every already-rebuilt index in place and commits
    /// nothing partial; only a full, uncancelled pass calls
    /// `commit_rebuilt_manifest`.
    pub fn submit_rebuild_indexes(&self) -> OperationId {
        let cache = self.cache.clone();
        let object_store = self.object_store.clone();
        self.operations.submit(
            OperationKind::RebuildIndexes,
            Box::new(move |token, progress| {
                let cache = cache.clone();
                let object_store = object_store.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return Err(JobError::cancelled());
                    }
                    let osa = object_store.ok_or_else(|| {
                        JobError::new(fastshot_types::ErrorKind::NotConfigured, "object store not configured")
                    })?;
                    let filenames = cache
                        .list_remote_body_filenames(osa.as_ref())
                        .await
                        .map_err(|e| JobError::from_classify(&e))?;
                    let total = filenames.len().max(1);
                    for (done, filename) in filenames.iter().enumerate() {
                        if token.is_cancelled() {
                            return Err(JobError::cancelled());
                        }
                        cache
                            .rebuild_index_for_body(osa.as_ref(), filename)
                            .await
                            .map_err(|e| JobError::from_classify(&e))?;
                        let _ = progress.send(Progress {
                            operation_id: OperationId(0),
                            progress: (done + 1) as f32 / total as f32,
                            message: Some(format!("rebuilt {filename}")),
                        });
                    }
                    if token.is_cancelled() {
                        return Err(JobError::cancelled());
                    }
                    cache.commit_rebuilt_manifest(osa.as_ref()).await.map_err(|e| JobError::from_classify(&e))?;
                    Ok(serde_json::json!({ "rebuilt": filenames.len() }))
                })
            }),
        )
    }

    /// Downloads and caches the body for every filename in `filenames`
    /// (§4.1 `BulkDownload`), reporting progress after each one and
    /// leaving already-downloaded bodies cached if cancelled partway.
    pub fn submit_bulk_download(&self, filenames: Vec<String>) -> OperationId {
        let cache = self.cache.clone();
        let object_store = self.object_store.clone();
        self.operations.submit(
            OperationKind::BulkDownload,
            Box::new(move |token, progress| {
                let cache = cache.clone();
                let object_store = object_store.clone();
                let filenames = filenames.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return Err(JobError::cancelled());
                    }
                    let osa = object_store.ok_or_else(|| {
                        JobError::new(fastshot_types::ErrorKind::NotConfigured, "object store not configured")
                    })?;
                    let total = filenames.len().max(1);
                    for (done, filename) in filenames.iter().enumerate() {
                        if token.is_cancelled() {
                            return Err(JobError::cancelled());
                        }
                        cache.fetch_body(osa.as_ref(), filename).await.map_err(|e| JobError::from_classify(&e))?;
                        let _ = progress.send(Progress {
                            operation_id: OperationId(0),
                            progress: (done + 1) as f32 / total as f32,
                            message: Some(format!("downloaded {filename}")),
                        });
                    }
                    Ok(serde_json::json!({ "downloaded": filenames.len() }))
                })
            }),
        )
    }

    pub fn submit_clear(&self) -> OperationId {
        let cache = self.cache.clone();
        self.operations.submit(
            OperationKind::Clear,
            Box::new(move |token, _progress| {
                let cache = cache.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return Err(JobError::cancelled());
                    }
                    cache.clear().map_err(|e| JobError::from_classify(&e))?;
                    Ok(serde_json::Value::Null)
                })
            }),
        )
    }

    pub fn cancel(&self, id: OperationId) -> bool {
        self.operations.cancel(id)
    }

    pub fn status(&self, id: OperationId) -> Option<OperationRecord> {
        self.operations.status(id)
    }

    pub fn cleanup(&self) {
        self.operations.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fastshot_osa::{GetResult, ListPage, MemoryObjectStore, ObjectSummary};
    use fastshot_types::{keys, OperationState};
    use std::time::Duration;

    /// Wraps a [`MemoryObjectStore`] with a small per-call delay so a test
    /// can land a `cancel()` call mid-pass deterministically instead of
    /// racing an in-memory store that finishes a 100-item loop in
    /// microseconds.
    struct ThrottledStore {
        inner: MemoryObjectStore,
        delay: Duration,
    }

    #[async_trait]
    impl ObjectStore for ThrottledStore {
        async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage, fastshot_osa::Error> {
            tokio::time::sleep(self.delay).await;
            self.inner.list_page(prefix, token).await
        }

        async fn get(&self, key: &str) -> Result<Option<GetResult>, fastshot_osa::Error> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, body: Bytes, if_match: Option<&str>) -> Result<String, fastshot_osa::Error> {
            tokio::time::sleep(self.delay).await;
            self.inner.put(key, body, if_match).await
        }

        async fn delete(&self, key: &str) -> Result<(), fastshot_osa::Error> {
            self.inner.delete(key).await
        }

        async fn head(&self, key: &str) -> Result<Option<ObjectSummary>, fastshot_osa::Error> {
            self.inner.head(key).await
        }
    }

    fn test_config(root_dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.cache.root_dir = root_dir.to_path_buf();
        config.sync.workers = 1;
        config
    }

    #[tokio::test]
    async fn cancelling_a_rebuild_mid_pass_keeps_already_rebuilt_indexes_and_skips_the_manifest() {
        let store = ThrottledStore { inner: MemoryObjectStore::new(), delay: Duration::from_millis(5) };
        for i in 0..100 {
            store
                .inner
                .put(&keys::body(&format!("{i:03}.fastshot")), Bytes::from_static(b"body"), None)
                .await
                .unwrap();
        }
        let osa: Arc<dyn ObjectStore> = Arc::new(store);

        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::with_object_store(test_config(dir.path()), Some(osa.clone())).unwrap();

        let id = facade.submit_rebuild_indexes();
        // each body costs ~2 throttled calls (get + put) at 5ms: the 10th
        // body finishes around the 100ms mark.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(facade.cancel(id));

        for _ in 0..200 {
            if facade.status(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let record = facade.status(id).unwrap();
        assert_eq!(record.state, OperationState::Cancelled);
        assert!(
            (0.05..=0.20).contains(&record.progress),
            "expected progress near 0.10, got {}",
            record.progress
        );

        let rebuilt = facade.list_metadata().len();
        assert!(rebuilt >= 5 && rebuilt < 100, "expected a partial rebuild, got {rebuilt}");
        assert!(
            osa.get(keys::MANIFEST).await.unwrap().is_none(),
            "a cancelled rebuild must not commit a manifest"
        );
    }

    #[tokio::test]
    async fn bulk_download_caches_every_requested_body() {
        let osa = MemoryObjectStore::new();
        for i in 0..5 {
            osa.put(&keys::body(&format!("{i}.fastshot")), Bytes::from_static(b"body bytes"), None)
                .await
                .unwrap();
        }
        let osa: Arc<dyn ObjectStore> = Arc::new(osa);

        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::with_object_store(test_config(dir.path()), Some(osa.clone())).unwrap();
        for i in 0..5 {
            facade.cache().put_metadata(fastshot_types::MetadataIndex {
                version: "1.0".to_string(),
                filename: format!("{i}.fastshot"),
                metadata: fastshot_types::SessionMetadata {
                    name: "t".to_string(),
                    desc: String::new(),
                    tags: vec![],
                    color: String::new(),
                    class: String::new(),
                    image_count: 0,
                    created_at: Utc::now(),
                    file_size: 10,
                },
                checksum: Checksum::of(b"body bytes"),
                created_at: Utc::now(),
                last_updated: Utc::now(),
            }).unwrap();
        }

        let filenames: Vec<String> = (0..5).map(|i| format!("{i}.fastshot")).collect();
        let id = facade.submit_bulk_download(filenames.clone());

        for _ in 0..200 {
            if facade.status(id).unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let record = facade.status(id).unwrap();
        assert_eq!(record.state, OperationState::Completed);
    }
}
