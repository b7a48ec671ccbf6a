use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::RwLock;

use bytes::Bytes;
use chrono::Utc;
use fastshot_osa::ObjectStore;
use fastshot_types::{
    keys, CacheInfo, Checksum, IntegrityCheck, IntegrityReport, IntegrityStatus, ManifestEntry,
    MetadataIndex, OrphanPolicy, OverallManifest,
};
use log::{info, warn};
use moka::sync::Cache as MokaCache;

use crate::atomic::{remove_best_effort, write_atomic};
use crate::error::Error;
use crate::layout::{ensure_dirs, Layout};
use crate::lock::CacheLock;
use crate::snapshot::{new_body_cache, CacheSnapshot};

/// Summary of one `sync_with_remote` run, surfaced to AOM as the
/// operation's progress/result (§4.3 step 6).
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub fetched: usize,
    pub revalidated: usize,
    pub orphans: Vec<String>,
    pub orphans_removed: usize,
}

/// Owns `<cache-root>` end to end: the local mirror, the writer lock, and
/// the sync/repair protocols (§4.3). The single entry point every other
/// crate in the workspace talks to instead of touching the filesystem or
/// OSA directly -- the same relationship `peoci::ocidist_cache::Client`
/// has to `ocidist::Client` and the on-disk blob store.
pub struct CacheManager {
    layout: Layout,
    snapshot: RwLock<CacheSnapshot>,
    body_cache: MokaCache<String, std::sync::Arc<Vec<u8>>>,
}

impl CacheManager {
    pub fn open(root: impl Into<PathBuf>, max_body_bytes: u64) -> Result<Self, Error> {
        let layout = Layout::new(root.into());
        ensure_dirs(&layout)?;
        let snapshot = load_snapshot(&layout)?;
        Ok(Self {
            layout,
            snapshot: RwLock::new(snapshot),
            body_cache: new_body_cache(max_body_bytes),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// §4.3: pure read, no network, O(n) over cached entries.
    pub fn list_metadata(&self) -> Vec<MetadataIndex> {
        self.snapshot.read().unwrap().list_in_manifest_order()
    }

    pub fn get_metadata(&self, filename: &str) -> Result<MetadataIndex, Error> {
        self.snapshot
            .read()
            .unwrap()
            .indexes
            .get(filename)
            .cloned()
            .ok_or_else(|| Error::NotFound(filename.to_string()))
    }

    /// Caches a body's bytes after an on-demand fetch (§9's LRU body
    /// cache). Eviction is handled by `moka`; this crate never evicts the
    /// *index* mirror the same way (see [`crate::snapshot::CacheSnapshot`]).
    pub fn cache_body(&self, filename: &str, bytes: std::sync::Arc<Vec<u8>>) {
        self.body_cache.insert(filename.to_string(), bytes);
    }

    pub fn cached_body(&self, filename: &str) -> Option<std::sync::Arc<Vec<u8>>> {
        self.body_cache.get(filename)
    }

    pub fn put_metadata(&self, index: MetadataIndex) -> Result<(), Error> {
        let _lock = CacheLock::acquire_exclusive(&self.layout.lock_path())?;
        self.put_metadata_locked(index)
    }

    pub(crate) fn put_metadata_locked(&self, index: MetadataIndex) -> Result<(), Error> {
        let now = Utc::now();
        let index = if index.needs_upgrade() { index.upgraded() } else { index };
        let index_bytes = serde_json::to_vec_pretty(&index)?;
        write_atomic(&self.layout.index_path(&index.filename), &index_bytes)?;

        let mut snapshot = self.snapshot.write().unwrap();
        snapshot.index_hashes.insert(index.filename.clone(), Checksum::of(&index_bytes));
        snapshot.manifest.upsert(ManifestEntry::from(&index), now);
        self.write_manifest_locked(&mut snapshot)?;
        snapshot.indexes.insert(index.filename.clone(), index);
        self.refresh_info_locked(&mut snapshot, now)?;
        Ok(())
    }

    pub fn remove_metadata(&self, filename: &str) -> Result<(), Error> {
        let _lock = CacheLock::acquire_exclusive(&self.layout.lock_path())?;
        self.remove_metadata_locked(filename)
    }

    fn remove_metadata_locked(&self, filename: &str) -> Result<(), Error> {
        let now = Utc::now();
        let mut snapshot = self.snapshot.write().unwrap();
        if snapshot.indexes.remove(filename).is_none() {
            return Err(Error::NotFound(filename.to_string()));
        }
        snapshot.index_hashes.remove(filename);
        remove_best_effort(&self.layout.index_path(filename));
        remove_best_effort(&self.layout.body_path(filename));
        snapshot.manifest.remove(filename, now);
        self.write_manifest_locked(&mut snapshot)?;
        self.refresh_info_locked(&mut snapshot, now)?;
        Ok(())
    }

    /// §4.3: recompute each on-disk index's content hash and compare
    /// against the hash recorded at its last successful write/load (I4),
    /// then validate the manifest's own canonical checksum and flag
    /// indexes the manifest no longer lists.
    pub fn validate_integrity(&self) -> Result<IntegrityReport, Error> {
        let now = Utc::now();
        let mut report = IntegrityReport::default();
        let mut snapshot = self.snapshot.write().unwrap();

        let filenames: Vec<String> = snapshot.indexes.keys().cloned().collect();
        for filename in &filenames {
            let path = self.layout.index_path(filename);
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let expected = snapshot.index_hashes.get(filename);
                    if expected != Some(&Checksum::of(&bytes)) {
                        report.corrupted_files.push(filename.clone());
                    }
                }
                Err(_) => report.missing_files.push(filename.clone()),
            }
        }

        let manifest_filenames: HashSet<&str> =
            snapshot.manifest.sessions.iter().map(|e| e.filename.as_str()).collect();
        for filename in &filenames {
            if !manifest_filenames.contains(filename.as_str()) {
                report.orphaned_files.push(filename.clone());
            }
        }

        if !snapshot.manifest.is_self_consistent() {
            report.corrupted_files.push(keys::MANIFEST.to_string());
        }

        report.status = if report.corrupted_files.is_empty() && report.missing_files.is_empty() {
            IntegrityStatus::Valid
        } else {
            IntegrityStatus::Corrupted
        };

        snapshot.info.integrity_check = IntegrityCheck {
            last_validated: Some(now),
            status: report.status,
            corrupted_files: report.corrupted_files.clone(),
        };
        self.write_info_locked(&snapshot.info)?;

        Ok(report)
    }

    /// §4.3 "Smart synchronization protocol".
    pub async fn sync_with_remote(
        &self,
        osa: &dyn ObjectStore,
        orphan_policy: OrphanPolicy,
    ) -> Result<SyncReport, Error> {
        let _lock = CacheLock::acquire_exclusive(&self.layout.lock_path())?;
        let now = Utc::now();

        let remote_manifest = match osa.get(keys::MANIFEST).await? {
            Some(result) => match serde_json::from_slice::<OverallManifest>(&result.bytes) {
                Ok(m) if m.is_self_consistent() => m,
                _ => self.rebuild_remote_manifest(osa, now).await?,
            },
            None => self.rebuild_remote_manifest(osa, now).await?,
        };

        let (local_filenames, remote_filenames): (HashSet<String>, HashSet<String>) = {
            let snapshot = self.snapshot.read().unwrap();
            (
                snapshot.indexes.keys().cloned().collect(),
                remote_manifest.sessions.iter().map(|e| e.filename.clone()).collect(),
            )
        };
        let remote_checksum: std::collections::HashMap<&str, &Checksum> = remote_manifest
            .sessions
            .iter()
            .map(|e| (e.filename.as_str(), &e.checksum))
            .collect();

        let to_fetch: Vec<String> =
            remote_filenames.difference(&local_filenames).cloned().collect();
        let to_revalidate: Vec<String> = {
            let snapshot = self.snapshot.read().unwrap();
            remote_filenames
                .intersection(&local_filenames)
                .filter(|f| {
                    snapshot
                        .indexes
                        .get(f.as_str())
                        .map(|idx| Some(&idx.checksum) != remote_checksum.get(f.as_str()).copied())
                        .unwrap_or(true)
                })
                .cloned()
                .collect()
        };
        let orphans: Vec<String> =
            local_filenames.difference(&remote_filenames).cloned().collect();

        let mut report = SyncReport { orphans: orphans.clone(), ..Default::default() };

        for filename in to_fetch.iter().chain(to_revalidate.iter()) {
            let expected = remote_checksum.get(filename.as_str()).copied();
            self.fetch_index_into_cache(osa, filename, expected).await?;
        }
        report.fetched = to_fetch.len();
        report.revalidated = to_revalidate.len();

        if matches!(orphan_policy, OrphanPolicy::Delete) {
            // `sync_with_remote` already holds `_lock` for its whole
            // duration, so this must go through the `_locked` variant --
            // the public `remove_metadata` would try to acquire the same
            // exclusive flock again and block forever on itself.
            for filename in &orphans {
                if self.remove_metadata_locked(filename).is_ok() {
                    report.orphans_removed += 1;
                }
            }
        }
        // `Keep` leaves orphans in place; `Prompt` is surfaced to the
        // caller via `report.orphans` for a decision hook one layer up --
        // MCM itself never blocks on user input.

        {
            let mut snapshot = self.snapshot.write().unwrap();
            snapshot.manifest = remote_manifest;
            self.refresh_info_locked(&mut snapshot, now)?;
        }

        info!(
            "sync complete: {} fetched, {} revalidated, {} orphans ({} removed)",
            report.fetched,
            report.revalidated,
            report.orphans.len(),
            report.orphans_removed
        );
        Ok(report)
    }

    /// Downloads and caches one index, verifying `filename` matches and,
    /// when `expected_checksum` is given (the remote manifest's entry for
    /// this filename), that the index's own `checksum` field agrees with it
    /// before it is ever written locally (§4.3 step 3, I1).
    async fn fetch_index_into_cache(
        &self,
        osa: &dyn ObjectStore,
        filename: &str,
        expected_checksum: Option<&Checksum>,
    ) -> Result<(), Error> {
        let bytes = osa
            .get(&keys::index(filename))
            .await?
            .ok_or_else(|| Error::NotFound(filename.to_string()))?
            .bytes;
        let index: MetadataIndex = serde_json::from_slice(&bytes)?;
        if index.filename != filename {
            return Err(Error::Integrity(format!(
                "index for {filename} declares filename {}",
                index.filename
            )));
        }
        if let Some(expected) = expected_checksum {
            if &index.checksum != expected {
                return Err(Error::Integrity(format!(
                    "index checksum for {filename} does not match the manifest entry"
                )));
            }
        }
        self.put_metadata_locked(index)
    }

    async fn rebuild_remote_manifest(
        &self,
        osa: &dyn ObjectStore,
        now: chrono::DateTime<Utc>,
    ) -> Result<OverallManifest, Error> {
        warn!("remote manifest missing or corrupt, rebuilding from meta_indexes/");
        let mut manifest = OverallManifest::empty(now);
        for object in osa.list_all(keys::INDEX_PREFIX).await? {
            let Some(filename) = keys::filename_from_index_key(&object.key) else { continue };
            let Some(result) = osa.get(&object.key).await? else { continue };
            let index: MetadataIndex = match serde_json::from_slice(&result.bytes) {
                Ok(idx) => idx,
                Err(_) => continue,
            };
            manifest.upsert(ManifestEntry::from(&index), now);
            let _ = filename;
        }
        osa.put(keys::MANIFEST, Bytes::from(serde_json::to_vec(&manifest)?), None)
            .await?;
        Ok(manifest)
    }

    /// §4.3 "recover_from_corruption": with an OSA, re-download corrupted
    /// entries; without one, quarantine them locally so reads never see
    /// corrupt bytes.
    pub async fn recover_from_corruption(
        &self,
        osa: Option<&dyn ObjectStore>,
    ) -> Result<IntegrityReport, Error> {
        let report = self.validate_integrity()?;
        let _lock = CacheLock::acquire_exclusive(&self.layout.lock_path())?;
        match osa {
            Some(osa) => {
                for filename in &report.corrupted_files {
                    if filename == keys::MANIFEST {
                        let now = Utc::now();
                        let rebuilt = self.rebuild_remote_manifest(osa, now).await?;
                        let mut snapshot = self.snapshot.write().unwrap();
                        snapshot.manifest = rebuilt;
                        self.write_manifest_locked(&mut snapshot)?;
                        continue;
                    }
                    let expected = {
                        let snapshot = self.snapshot.read().unwrap();
                        snapshot
                            .manifest
                            .sessions
                            .iter()
                            .find(|e| &e.filename == filename)
                            .map(|e| e.checksum.clone())
                    };
                    self.fetch_index_into_cache(osa, filename, expected.as_ref()).await?;
                }
            }
            None => {
                let mut snapshot = self.snapshot.write().unwrap();
                for filename in &report.corrupted_files {
                    snapshot.indexes.remove(filename);
                    snapshot.index_hashes.remove(filename);
                    remove_best_effort(&self.layout.index_path(filename));
                }
            }
        }
        self.validate_integrity()
    }

    /// §4.3 `repair_cloud_structure`: reconcile the *remote* structure
    /// directly, comparing `sessions/` against `meta_indexes/` on `osa`,
    /// rather than reusing `validate_integrity`'s locally scoped report.
    /// A body crashed mid-`publish` (body uploaded, index upload never
    /// happened) gets a reconstructed index; an index whose body is gone
    /// (the manifest-entry-without-a-body orphan from spec.md:141) is
    /// dropped rather than republished, since there is no body left to
    /// derive a reconstruction from. `validate_integrity`'s local-disk
    /// signal (`missing_files`/`orphaned_files`) cannot see either case for
    /// a body that was never locally cached, so it is the wrong report to
    /// drive this from.
    pub async fn repair_cloud_structure(&self, osa: &dyn ObjectStore) -> Result<IntegrityReport, Error> {
        let _lock = CacheLock::acquire_exclusive(&self.layout.lock_path())?;
        let now = Utc::now();
        let bodies: HashSet<String> = osa
            .list_all(keys::BODY_PREFIX)
            .await?
            .into_iter()
            .filter_map(|o| o.key.strip_prefix(keys::BODY_PREFIX).map(String::from))
            .collect();
        let indexed: HashSet<String> = osa
            .list_all(keys::INDEX_PREFIX)
            .await?
            .into_iter()
            .filter_map(|o| keys::filename_from_index_key(&o.key).map(String::from))
            .collect();

        let mut reconstructed = 0usize;
        for filename in bodies.difference(&indexed) {
            if let Some(body) = osa.get(&keys::body(filename)).await? {
                let checksum = Checksum::of(&body.bytes);
                let index = fastshot_codec::derive_legacy_index(filename, checksum, body.bytes.len() as u64, now);
                osa.put(&keys::index(filename), Bytes::from(serde_json::to_vec(&index)?), None)
                    .await?;
                self.put_metadata_locked(index)?;
                reconstructed += 1;
            }
        }

        let mut dropped = 0usize;
        for filename in indexed.difference(&bodies) {
            osa.delete(&keys::index(filename)).await?;
            let _ = self.remove_metadata_locked(filename);
            dropped += 1;
        }

        if reconstructed > 0 || dropped > 0 {
            info!("repair_cloud_structure: reconstructed {reconstructed} index(es), dropped {dropped} orphan(s)");
            self.rebuild_remote_manifest(osa, now).await?;
        }

        self.validate_integrity()
    }

    /// Lists every body filename under `sessions/` on the remote, the work
    /// list a `rebuild_all_indexes` operation iterates one entry at a time
    /// so the caller can observe cancellation and report progress between
    /// entries (§4.4 suspension points).
    pub async fn list_remote_body_filenames(&self, osa: &dyn ObjectStore) -> Result<Vec<String>, Error> {
        Ok(osa
            .list_all(keys::BODY_PREFIX)
            .await?
            .into_iter()
            .filter_map(|o| o.key.strip_prefix(keys::BODY_PREFIX).map(String::from))
            .collect())
    }

    /// Re-derives and republishes the index for one remote body -- one step
    /// of a `rebuild_all_indexes` operation. Does not touch the overall
    /// manifest; the caller commits it once via
    /// [`CacheManager::commit_rebuilt_manifest`] after the whole pass
    /// completes uncancelled, so a cancelled rebuild leaves every
    /// already-processed index in place without a partial manifest rewrite.
    pub async fn rebuild_index_for_body(&self, osa: &dyn ObjectStore, filename: &str) -> Result<(), Error> {
        let _lock = CacheLock::acquire_exclusive(&self.layout.lock_path())?;
        let body = osa
            .get(&keys::body(filename))
            .await?
            .ok_or_else(|| Error::NotFound(filename.to_string()))?;
        let checksum = Checksum::of(&body.bytes);
        let index =
            fastshot_codec::derive_legacy_index(filename, checksum, body.bytes.len() as u64, Utc::now());
        osa.put(&keys::index(filename), Bytes::from(serde_json::to_vec(&index)?), None)
            .await?;
        self.put_metadata_locked(index)
    }

    /// Final step of `rebuild_all_indexes`: commits one manifest built from
    /// every index currently in the local mirror, both to the remote and to
    /// the local cache. Only called by a caller that has walked the whole
    /// body list without being cancelled.
    pub async fn commit_rebuilt_manifest(&self, osa: &dyn ObjectStore) -> Result<(), Error> {
        let _lock = CacheLock::acquire_exclusive(&self.layout.lock_path())?;
        let now = Utc::now();
        let mut manifest = OverallManifest::empty(now);
        {
            let snapshot = self.snapshot.read().unwrap();
            for index in snapshot.indexes.values() {
                manifest.upsert(ManifestEntry::from(index), now);
            }
        }
        osa.put(keys::MANIFEST, Bytes::from(serde_json::to_vec(&manifest)?), None)
            .await?;
        let mut snapshot = self.snapshot.write().unwrap();
        snapshot.manifest = manifest;
        self.write_manifest_locked(&mut snapshot)
    }

    /// Fetches one body on demand (§9 "on-demand body cache"), verifying it
    /// against the locally cached index's checksum before caching the
    /// bytes. Also the per-entry step of a `bulk_download` operation.
    pub async fn fetch_body(&self, osa: &dyn ObjectStore, filename: &str) -> Result<std::sync::Arc<Vec<u8>>, Error> {
        if let Some(bytes) = self.cached_body(filename) {
            return Ok(bytes);
        }
        let index = self.get_metadata(filename)?;
        let result = osa
            .get(&keys::body(filename))
            .await?
            .ok_or_else(|| Error::NotFound(filename.to_string()))?;
        if !index.checksum.matches(&result.bytes) {
            return Err(Error::Integrity(format!("body checksum mismatch for {filename}")));
        }
        let bytes = std::sync::Arc::new(result.bytes.to_vec());
        self.cache_body(filename, bytes.clone());
        Ok(bytes)
    }

    pub fn clear(&self) -> Result<(), Error> {
        let _lock = CacheLock::acquire_exclusive(&self.layout.lock_path())?;
        let now = Utc::now();
        let mut snapshot = self.snapshot.write().unwrap();
        for path in [self.layout.meta_indexes_dir(), self.layout.sessions_dir()] {
            if path.exists() {
                std::fs::remove_dir_all(&path)?;
            }
        }
        ensure_dirs(&self.layout)?;
        *snapshot = CacheSnapshot::empty(OverallManifest::empty(now), CacheInfo::new());
        self.write_manifest_locked(&mut snapshot)?;
        self.write_info_locked(&snapshot.info)?;
        self.body_cache.invalidate_all();
        Ok(())
    }

    pub fn stats(&self) -> CacheInfo {
        self.snapshot.read().unwrap().info.clone()
    }

    fn write_manifest_locked(&self, snapshot: &mut CacheSnapshot) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(&snapshot.manifest)?;
        write_atomic(&self.layout.manifest_path(), &bytes)?;
        Ok(())
    }

    fn write_info_locked(&self, info: &CacheInfo) -> Result<(), Error> {
        write_atomic(&self.layout.cache_info_path(), &serde_json::to_vec_pretty(info)?)?;
        Ok(())
    }

    fn refresh_info_locked(
        &self,
        snapshot: &mut CacheSnapshot,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), Error> {
        snapshot.info.total_meta_files = snapshot.indexes.len() as u64;
        snapshot.info.cache_size_bytes =
            snapshot.indexes.values().map(|i| i.metadata.file_size).sum();
        snapshot.info.last_sync = Some(now);
        self.write_info_locked(&snapshot.info)
    }
}

fn load_snapshot(layout: &Layout) -> Result<CacheSnapshot, Error> {
    let now = Utc::now();
    let manifest = match std::fs::read(layout.manifest_path()) {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => OverallManifest::empty(now),
        Err(e) => return Err(e.into()),
    };
    let info = match std::fs::read(layout.cache_info_path()) {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheInfo::new(),
        Err(e) => return Err(e.into()),
    };

    let mut snapshot = CacheSnapshot::empty(manifest, info);
    if layout.meta_indexes_dir().is_dir() {
        for entry in std::fs::read_dir(layout.meta_indexes_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            let index: MetadataIndex = match serde_json::from_slice(&bytes) {
                Ok(idx) => idx,
                Err(e) => {
                    warn!("skipping unreadable index {}: {e}", path.display());
                    continue;
                }
            };
            snapshot.index_hashes.insert(index.filename.clone(), Checksum::of(&bytes));
            snapshot.indexes.insert(index.filename.clone(), index);
        }
    }
    Ok(snapshot)
}
