//! Meta Cache Manager: owns `<cache-root>`, the local mirror of remote
//! metadata indexes and the manifest, cross-process locking, smart sync,
//! and corruption recovery (§4.3).

mod atomic;
mod error;
mod layout;
mod lock;
mod manager;
mod publish;
mod snapshot;

pub use error::Error;
pub use layout::Layout;
pub use lock::CacheLock;
pub use manager::{CacheManager, SyncReport};
pub use publish::RetryPolicy;
pub use snapshot::CacheSnapshot;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use fastshot_osa::{MemoryObjectStore, ObjectStore};
    use fastshot_types::{keys, Checksum, ManifestEntry, MetadataIndex, OrphanPolicy, OverallManifest, SessionMetadata};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 21, 11, 46, 15).unwrap()
    }

    fn sample_index(filename: &str) -> MetadataIndex {
        MetadataIndex {
            version: "1.0".to_string(),
            filename: filename.to_string(),
            metadata: SessionMetadata {
                name: "Test".to_string(),
                desc: String::new(),
                tags: vec!["t1".to_string()],
                color: String::new(),
                class: String::new(),
                image_count: 3,
                created_at: now(),
                file_size: 100,
            },
            checksum: Checksum::of(filename.as_bytes()),
            created_at: now(),
            last_updated: now(),
        }
    }

    #[test]
    fn put_then_list_returns_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();
        cache.put_metadata(sample_index("a.fastshot")).unwrap();
        cache.put_metadata(sample_index("b.fastshot")).unwrap();
        let listed = cache.list_metadata();
        assert_eq!(listed.len(), 2);
        assert_eq!(cache.stats().total_meta_files, 2);
    }

    #[test]
    fn validate_integrity_flags_flipped_byte() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();
        cache.put_metadata(sample_index("a.fastshot")).unwrap();
        assert!(cache.validate_integrity().unwrap().is_valid());

        let path = cache.layout().index_path("a.fastshot");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let report = cache.validate_integrity().unwrap();
        assert!(!report.is_valid());
        assert!(report.corrupted_files.contains(&"a.fastshot".to_string()));
    }

    #[tokio::test]
    async fn recover_from_corruption_restores_from_remote() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();
        let index = sample_index("a.fastshot");
        cache.put_metadata(index.clone()).unwrap();

        let osa = MemoryObjectStore::new();
        osa.put(&keys::index("a.fastshot"), Bytes::from(serde_json::to_vec(&index).unwrap()), None)
            .await
            .unwrap();

        let path = cache.layout().index_path("a.fastshot");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let report = cache.recover_from_corruption(Some(&osa)).await.unwrap();
        assert!(report.is_valid());
        assert_eq!(cache.get_metadata("a.fastshot").unwrap(), index);
    }

    #[tokio::test]
    async fn cold_start_sync_downloads_all_indexes_and_no_bodies() {
        let osa = MemoryObjectStore::new();
        let mut manifest = OverallManifest::empty(now());
        for i in 0..8 {
            let filename = format!("{i:02}.fastshot");
            let index = sample_index(&filename);
            osa.put(&keys::index(&filename), Bytes::from(serde_json::to_vec(&index).unwrap()), None)
                .await
                .unwrap();
            manifest.upsert(ManifestEntry::from(&index), now());
        }
        osa.put(keys::MANIFEST, Bytes::from(serde_json::to_vec(&manifest).unwrap()), None)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();
        let report = cache.sync_with_remote(&osa, OrphanPolicy::Prompt).await.unwrap();
        assert_eq!(report.fetched, 8);
        assert_eq!(cache.stats().total_meta_files, 8);
    }

    #[tokio::test]
    async fn sync_with_delete_policy_drops_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();
        cache.put_metadata(sample_index("stale.fastshot")).unwrap();

        let osa = MemoryObjectStore::new();
        osa.put(keys::MANIFEST, Bytes::from(serde_json::to_vec(&OverallManifest::empty(now())).unwrap()), None)
            .await
            .unwrap();

        let report = cache.sync_with_remote(&osa, OrphanPolicy::Delete).await.unwrap();
        assert_eq!(report.orphans, vec!["stale.fastshot".to_string()]);
        assert_eq!(report.orphans_removed, 1);
        assert!(cache.get_metadata("stale.fastshot").is_err());
    }

    #[tokio::test]
    async fn repair_cloud_structure_reconstructs_missing_index_and_drops_body_orphan() {
        let osa = MemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();

        // a body with no index at all -- e.g. a crash between body upload
        // and index upload, and never locally cached either.
        osa.put(&keys::body("crashed.fastshot"), Bytes::from_static(b"body bytes"), None)
            .await
            .unwrap();

        // an index whose body no longer exists on the remote.
        let orphan_index = sample_index("gone.fastshot");
        osa.put(&keys::index("gone.fastshot"), Bytes::from(serde_json::to_vec(&orphan_index).unwrap()), None)
            .await
            .unwrap();

        let report = cache.repair_cloud_structure(&osa).await.unwrap();
        assert!(report.is_valid());

        assert!(osa.get(&keys::index("crashed.fastshot")).await.unwrap().is_some());
        assert!(cache.get_metadata("crashed.fastshot").is_ok());

        assert!(osa.get(&keys::index("gone.fastshot")).await.unwrap().is_none());
        assert!(cache.get_metadata("gone.fastshot").is_err());
    }

    #[tokio::test]
    async fn rebuild_index_for_body_then_commit_manifest_rebuilds_remote_state() {
        let osa = MemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();

        for i in 0..3 {
            osa.put(&keys::body(&format!("{i}.fastshot")), Bytes::from_static(b"body"), None)
                .await
                .unwrap();
        }

        let filenames = cache.list_remote_body_filenames(&osa).await.unwrap();
        assert_eq!(filenames.len(), 3);
        for filename in &filenames {
            cache.rebuild_index_for_body(&osa, filename).await.unwrap();
        }
        cache.commit_rebuilt_manifest(&osa).await.unwrap();

        assert_eq!(cache.list_metadata().len(), 3);
        let remote_manifest: OverallManifest =
            serde_json::from_slice(&osa.get(keys::MANIFEST).await.unwrap().unwrap().bytes).unwrap();
        assert!(remote_manifest.is_self_consistent());
        assert_eq!(remote_manifest.total_sessions, 3);
    }

    #[tokio::test]
    async fn fetch_body_rejects_a_body_that_does_not_match_the_cached_checksum() {
        let osa = MemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();
        let index = sample_index("mismatched.fastshot");
        cache.put_metadata(index).unwrap();
        osa.put(&keys::body("mismatched.fastshot"), Bytes::from_static(b"not the expected body"), None)
            .await
            .unwrap();

        let err = cache.fetch_body(&osa, "mismatched.fastshot").await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[tokio::test]
    async fn publish_uploads_body_index_and_manifest() {
        let osa = MemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();
        let index = sample_index("new.fastshot");

        cache
            .publish(&osa, "new.fastshot", Bytes::from_static(b"body"), index.clone(), &RetryPolicy::default())
            .await
            .unwrap();

        assert!(osa.get(&keys::body("new.fastshot")).await.unwrap().is_some());
        assert!(osa.get(&keys::index("new.fastshot")).await.unwrap().is_some());
        assert_eq!(cache.list_metadata()[0].filename, "new.fastshot");
    }

    #[tokio::test]
    async fn idempotent_publish_keeps_one_manifest_entry() {
        let osa = MemoryObjectStore::new();
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::open(dir.path(), 1024 * 1024).unwrap();
        let index = sample_index("dup.fastshot");

        for _ in 0..2 {
            cache
                .publish(&osa, "dup.fastshot", Bytes::from_static(b"body"), index.clone(), &RetryPolicy::default())
                .await
                .unwrap();
        }
        assert_eq!(cache.list_metadata().len(), 1);
    }
}
