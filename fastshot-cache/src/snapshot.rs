use std::collections::HashMap;

use fastshot_types::{CacheInfo, Checksum, MetadataIndex, OverallManifest};
use moka::sync::Cache as MokaCache;

/// The in-memory mirror of `<cache-root>/meta_cache/*`, invalidated and
/// rebuilt on every write. Plain `HashMap`s, not `moka`: this must be a
/// *complete* mirror (I3), never an LRU sample, unlike
/// `peoci::ocidist_cache::Client`'s `ref_cache`/`manifest_cache`/
/// `blob_cache` fields, which are all bounded-eviction caches by design.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub indexes: HashMap<String, MetadataIndex>,
    pub manifest: OverallManifest,
    pub info: CacheInfo,
    /// Content hash of each index file's bytes as of the last successful
    /// write or load (I4). Schema §6 only carries a checksum of the
    /// *body*, not of the index file's own bytes, so corruption of the
    /// index file on disk (e.g. a flipped byte from outside this crate)
    /// has nothing to compare against without tracking this separately;
    /// see DESIGN.md for the recorded decision.
    pub index_hashes: HashMap<String, Checksum>,
}

impl CacheSnapshot {
    pub fn empty(manifest: OverallManifest, info: CacheInfo) -> Self {
        Self {
            indexes: HashMap::new(),
            manifest,
            info,
            index_hashes: HashMap::new(),
        }
    }

    /// Insertion order of the manifest's `sessions` array, the order
    /// `list_metadata` must return (§4.3: "insertion order of the
    /// manifest").
    pub fn list_in_manifest_order(&self) -> Vec<MetadataIndex> {
        self.manifest
            .sessions
            .iter()
            .filter_map(|entry| self.indexes.get(&entry.filename).cloned())
            .collect()
    }
}

/// The optional on-demand body cache (§9 "On-demand body cache"): bounded
/// by byte size, eviction is correct here because bodies are immutable and
/// re-fetchable, exactly the role `peoci::ocidist_cache`'s `blob_cache`
/// plays for OCI layer blobs.
pub fn new_body_cache(max_body_bytes: u64) -> MokaCache<String, std::sync::Arc<Vec<u8>>> {
    MokaCache::builder()
        .weigher(|_key: &String, value: &std::sync::Arc<Vec<u8>>| -> u32 {
            value.len().try_into().unwrap_or(u32::MAX)
        })
        .max_capacity(max_body_bytes)
        .build()
}
