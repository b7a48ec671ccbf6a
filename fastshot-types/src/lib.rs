//! Shared schema and error taxonomy for the cloud metadata cache and
//! synchronization core. Every other crate in the workspace depends on
//! this one and nothing else in the workspace; it has no I/O of its own,
//! the way `peoci::spec` is the dependency-free schema crate sitting
//! under `ocidist`/`ocidist_cache`.

pub mod checksum;
pub mod error;
pub mod model;
pub mod operation;

pub use checksum::{Checksum, ChecksumError};
pub use error::{Classify, ErrorKind};
pub use model::{
    CacheInfo, IntegrityCheck, IntegrityReport, IntegrityStatus, ManifestEntry, MetadataIndex,
    OrphanPolicy, OverallManifest, SessionMetadata, INDEX_SCHEMA_VERSION, LEGACY_SCHEMA_VERSION,
};
pub use operation::{OperationId, OperationKind, OperationRecord, OperationState};

/// Remote key layout (§6), centralized so OSA callers never hand-format a
/// path differently from one another.
pub mod keys {
    pub fn body(filename: &str) -> String {
        format!("sessions/{filename}")
    }

    pub fn index(filename: &str) -> String {
        format!("meta_indexes/{filename}.meta.json")
    }

    pub const MANIFEST: &str = "overall_meta.json";

    pub const BODY_PREFIX: &str = "sessions/";
    pub const INDEX_PREFIX: &str = "meta_indexes/";

    /// Recovers `filename` from a `meta_indexes/<filename>.meta.json` key.
    pub fn filename_from_index_key(key: &str) -> Option<&str> {
        key.strip_prefix(INDEX_PREFIX)?.strip_suffix(".meta.json")
    }
}
