use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{Error, GetResult, ListPage, ObjectStore, ObjectSummary};

struct Entry {
    bytes: Bytes,
    etag: String,
}

/// In-memory `ObjectStore` used by every unit test in the workspace
/// instead of mocking S3 over the network -- the role
/// `peoci::ocidist_cache`'s tests would need a `MemoryObjectStore`-shaped
/// double for too, had that crate needed one; nothing in the pack mocks
/// HTTP, so a plain struct behind a lock is the idiom to reach for.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Entry>>,
    etag_counter: AtomicU64,
    page_size: usize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            etag_counter: AtomicU64::new(0),
            page_size: 100,
        }
    }

    /// Constructs a store that pages after `n` items, used to exercise
    /// `list_all`'s pagination loop deterministically in tests without a
    /// 1000-object fixture.
    pub fn with_page_size(n: usize) -> Self {
        Self {
            page_size: n,
            ..Self::new()
        }
    }

    fn next_etag(&self) -> String {
        format!("etag-{}", self.etag_counter.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error> {
        let objects = self.objects.read().await;
        let start_after = continuation_token.unwrap_or("").to_string();
        let mut items: Vec<ObjectSummary> = objects
            .range(start_after.clone()..)
            .filter(|(k, _)| k.starts_with(prefix) && k.as_str() != start_after)
            .map(|(k, v)| ObjectSummary {
                key: k.clone(),
                size: v.bytes.len() as u64,
                etag: Some(v.etag.clone()),
            })
            .collect();

        let continuation_token = if items.len() > self.page_size {
            let next = items[self.page_size].key.clone();
            items.truncate(self.page_size);
            Some(next)
        } else {
            None
        };

        Ok(ListPage {
            items,
            continuation_token,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<GetResult>, Error> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|e| GetResult {
            bytes: e.bytes.clone(),
            etag: Some(e.etag.clone()),
        }))
    }

    async fn put(&self, key: &str, body: Bytes, if_match: Option<&str>) -> Result<String, Error> {
        let mut objects = self.objects.write().await;
        if let Some(expected) = if_match {
            match objects.get(key) {
                Some(existing) if existing.etag == expected => {}
                None if expected.is_empty() => {}
                _ => return Err(Error::PreconditionFailed),
            }
        }
        let etag = self.next_etag();
        objects.insert(
            key.to_string(),
            Entry {
                bytes: body,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectSummary>, Error> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|e| ObjectSummary {
            key: key.to_string(),
            size: e.bytes.len() as u64,
            etag: Some(e.etag.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = MemoryObjectStore::new();
        store.put("a", Bytes::from_static(b"1"), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().bytes, Bytes::from_static(b"1"));
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn if_match_enforces_cas() {
        let store = MemoryObjectStore::new();
        let etag1 = store.put("m", Bytes::from_static(b"v1"), Some("")).await.unwrap();
        // stale etag should fail
        let err = store
            .put("m", Bytes::from_static(b"v2"), Some("stale"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed));
        // correct etag succeeds
        store
            .put("m", Bytes::from_static(b"v2"), Some(&etag1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn list_all_pages_through_everything() {
        let store = MemoryObjectStore::with_page_size(3);
        for i in 0..10 {
            store
                .put(&format!("meta_indexes/{i:02}.json"), Bytes::new(), None)
                .await
                .unwrap();
        }
        let all = store.list_all("meta_indexes/").await.unwrap();
        assert_eq!(all.len(), 10);
    }
}
