//! Object Store Adapter (OSA): the five-operation capability surface
//! (§4.1) every higher layer depends on instead of a concrete backend.
//! Modeled on `peoci::ocidist::Client`, which plays the same role for the
//! teacher (the rest of the workspace never touches `reqwest` directly,
//! only `ocidist::Client`'s typed methods) -- here the trait boundary is
//! explicit rather than a single concrete struct, since the spec calls
//! for swappable backends (S3 in production, an in-memory double in
//! tests).

mod error;
mod memory;
mod s3;

pub use error::Error;
pub use memory::MemoryObjectStore;
pub use s3::{S3Config, S3ObjectStore};

use async_trait::async_trait;
use bytes::Bytes;

/// One entry returned by `list`/`head` (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// One page of a `list` call. OSA implementations must not eagerly collect
/// an entire bucket -- callers page through with `continuation_token`
/// until `None` is returned, keeping `list` lazy as required by §4.1.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<ObjectSummary>,
    pub continuation_token: Option<String>,
}

/// Result of a `get` (§4.1): the body bytes plus the backend's current
/// etag for that key, needed by MCM's checksum-mismatch-after-read retry
/// (§4.3 "Cross-process locking").
#[derive(Debug, Clone)]
pub struct GetResult {
    pub bytes: Bytes,
    pub etag: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches one page of keys under `prefix`. Pass the previous page's
    /// `continuation_token` to `list_page` again to advance; `None` means
    /// there is nothing more.
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error>;

    async fn get(&self, key: &str) -> Result<Option<GetResult>, Error>;

    /// Uploads `body` under `key`. When `if_match` is `Some`, the write
    /// only succeeds if the backend's current etag for `key` equals it
    /// (compare-and-swap), used exclusively for the manifest (§4.3).
    /// Returns the new etag on success.
    async fn put(&self, key: &str, body: Bytes, if_match: Option<&str>) -> Result<String, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    async fn head(&self, key: &str) -> Result<Option<ObjectSummary>, Error>;

    /// Convenience wrapper over `list_page` that drains every page. Only
    /// safe to use for prefixes known to be bounded (tests, and the
    /// rebuild path's already-small `meta_indexes/` enumeration); MCM's
    /// hot paths should page explicitly instead.
    async fn list_all(&self, prefix: &str) -> Result<Vec<ObjectSummary>, Error> {
        let mut items = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_page(prefix, token.as_deref()).await?;
            items.extend(page.items);
            token = page.continuation_token;
            if token.is_none() {
                break;
            }
        }
        Ok(items)
    }
}
