use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;

pub const INDEX_SCHEMA_VERSION: &str = "1.0";
pub const LEGACY_SCHEMA_VERSION: &str = "0.9";

/// The `metadata` block embedded in both the session JSON and the
/// `MetadataIndex` (§6). `#[serde(default)]` on every field is what lets
/// `derive_index` synthesize one of these for a pre-metadata-era artifact
/// without a bespoke "legacy" struct -- same field set, just defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub image_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub file_size: u64,
}

impl SessionMetadata {
    /// Best-effort metadata for an artifact whose schema predates the
    /// metadata block entirely (§4.2 "Backward compatibility").
    pub fn synthesize(created_at: DateTime<Utc>, file_size: u64) -> Self {
        Self {
            name: String::new(),
            desc: String::new(),
            tags: Vec::new(),
            color: String::new(),
            class: String::new(),
            image_count: 0,
            created_at,
            file_size,
        }
    }
}

/// One entry under `meta_indexes/<filename>.meta.json` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataIndex {
    pub version: String,
    pub filename: String,
    pub metadata: SessionMetadata,
    pub checksum: Checksum,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl MetadataIndex {
    /// True when this index predates the current schema version and should
    /// be transparently rewritten on next write (§4.3 backward
    /// compatibility: "upgrade the on-disk file to version 1.0 on next
    /// write").
    pub fn needs_upgrade(&self) -> bool {
        self.version != INDEX_SCHEMA_VERSION
    }

    pub fn upgraded(mut self) -> Self {
        self.version = INDEX_SCHEMA_VERSION.to_string();
        self
    }
}

/// One row of the overall manifest's `sessions` array (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub file_size: u64,
    pub checksum: Checksum,
}

impl From<&MetadataIndex> for ManifestEntry {
    fn from(index: &MetadataIndex) -> Self {
        Self {
            filename: index.filename.clone(),
            created_at: index.created_at,
            file_size: index.metadata.file_size,
            checksum: index.checksum.clone(),
        }
    }
}

/// `overall_meta.json` (§6). `checksum` covers the canonical form of every
/// other field, computed by [`OverallManifest::canonical_checksum`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallManifest {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub total_sessions: u64,
    pub sessions: Vec<ManifestEntry>,
    pub checksum: Checksum,
}

impl OverallManifest {
    pub fn empty(now: DateTime<Utc>) -> Self {
        let mut m = Self {
            version: INDEX_SCHEMA_VERSION.to_string(),
            last_updated: now,
            total_sessions: 0,
            sessions: Vec::new(),
            checksum: Checksum::of(b""),
        };
        m.checksum = m.canonical_checksum();
        m
    }

    /// Checksum over the manifest's own canonical form "with `checksum`
    /// set to null" (§6). We achieve this by hashing a copy with the
    /// checksum field replaced by a fixed sentinel rather than `null`,
    /// since `Checksum` can't deserialize from null; the sentinel is never
    /// a value `Checksum::of` can produce by construction (it isn't
    /// 64 lowercase hex chars), so it can't collide with a real checksum.
    pub fn canonical_checksum(&self) -> Checksum {
        #[derive(Serialize)]
        struct Canonical<'a> {
            version: &'a str,
            last_updated: DateTime<Utc>,
            total_sessions: u64,
            sessions: &'a [ManifestEntry],
            checksum: &'static str,
        }
        let canonical = Canonical {
            version: &self.version,
            last_updated: self.last_updated,
            total_sessions: self.total_sessions,
            sessions: &self.sessions,
            checksum: "null",
        };
        let bytes = serde_json::to_vec(&canonical).expect("manifest always serializes");
        Checksum::of(bytes)
    }

    pub fn is_self_consistent(&self) -> bool {
        self.checksum == self.canonical_checksum()
            && self.total_sessions as usize == self.sessions.len()
    }

    pub fn recompute_checksum(&mut self) {
        self.checksum = self.canonical_checksum();
    }

    pub fn upsert(&mut self, entry: ManifestEntry, now: DateTime<Utc>) {
        if let Some(existing) = self.sessions.iter_mut().find(|e| e.filename == entry.filename) {
            *existing = entry;
        } else {
            self.sessions.push(entry);
        }
        self.total_sessions = self.sessions.len() as u64;
        self.last_updated = now;
        self.recompute_checksum();
    }

    pub fn remove(&mut self, filename: &str, now: DateTime<Utc>) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|e| e.filename != filename);
        let removed = self.sessions.len() != before;
        if removed {
            self.total_sessions = self.sessions.len() as u64;
            self.last_updated = now;
            self.recompute_checksum();
        }
        removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Valid,
    Corrupted,
    Unknown,
}

/// `cache_info.json`'s `integrity_check` block (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub last_validated: Option<DateTime<Utc>>,
    pub status: IntegrityStatus,
    pub corrupted_files: Vec<String>,
}

impl Default for IntegrityCheck {
    fn default() -> Self {
        Self {
            last_validated: None,
            status: IntegrityStatus::Unknown,
            corrupted_files: Vec::new(),
        }
    }
}

/// `cache_info.json` (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub version: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub cache_size_bytes: u64,
    pub total_meta_files: u64,
    pub integrity_check: IntegrityCheck,
}

impl CacheInfo {
    pub fn new() -> Self {
        Self {
            version: INDEX_SCHEMA_VERSION.to_string(),
            last_sync: None,
            cache_size_bytes: 0,
            total_meta_files: 0,
            integrity_check: IntegrityCheck::default(),
        }
    }
}

impl Default for CacheInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// The report returned by `validate_integrity` (§4.3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub status: IntegrityStatus,
    pub corrupted_files: Vec<String>,
    pub missing_files: Vec<String>,
    pub orphaned_files: Vec<String>,
}

impl Default for IntegrityStatus {
    fn default() -> Self {
        IntegrityStatus::Unknown
    }
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.status == IntegrityStatus::Valid
            && self.corrupted_files.is_empty()
            && self.missing_files.is_empty()
    }
}

/// What to do with a locally cached entry the remote manifest no longer
/// lists (§4.3 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    Keep,
    Delete,
    Prompt,
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        OrphanPolicy::Prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 21, 11, 46, 15).unwrap()
    }

    #[test]
    fn empty_manifest_is_self_consistent() {
        let m = OverallManifest::empty(now());
        assert!(m.is_self_consistent());
        assert_eq!(m.total_sessions, 0);
    }

    #[test]
    fn upsert_then_remove_round_trips_consistency() {
        let mut m = OverallManifest::empty(now());
        let entry = ManifestEntry {
            filename: "20250621114615_tt1.fastshot".to_string(),
            created_at: now(),
            file_size: 1234,
            checksum: Checksum::of(b"body"),
        };
        m.upsert(entry.clone(), now());
        assert!(m.is_self_consistent());
        assert_eq!(m.total_sessions, 1);

        // idempotent: publishing the same entry twice yields one entry
        m.upsert(entry, now());
        assert_eq!(m.total_sessions, 1);
        assert!(m.is_self_consistent());

        assert!(m.remove("20250621114615_tt1.fastshot", now()));
        assert!(m.is_self_consistent());
        assert_eq!(m.total_sessions, 0);
    }

    #[test]
    fn tamper_breaks_self_consistency() {
        let mut m = OverallManifest::empty(now());
        m.total_sessions = 5;
        assert!(!m.is_self_consistent());
    }
}
