//! In-memory [`ObjectStore`] double used across the lock/run-status/
//! compaction test suites instead of a live bucket.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{ObjectStore, ObjectStoreError};

#[derive(Debug, Clone)]
struct Object {
    body: Bytes,
    etag: String,
}

/// A process-local, mutex-guarded object store. ETags are random UUIDs
/// minted on every write, the same "opaque identity that changes on every
/// write" contract a real S3-compatible store provides.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Object>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.lock().expect("lock poisoned");
        objects.insert(
            key.to_string(),
            Object {
                body,
                etag: Uuid::new_v4().to_string(),
            },
        );
        Ok(())
    }

    async fn put_if_match(
        &self,
        key: &str,
        body: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<bool, ObjectStoreError> {
        let mut objects = self.objects.lock().expect("lock poisoned");
        let current = objects.get(key).map(|o| o.etag.clone());
        let matches = match (&current, expected_etag) {
            (None, None) => true,
            (Some(etag), Some(expected)) => etag == expected,
            _ => false,
        };
        if !matches {
            return Ok(false);
        }
        objects.insert(
            key.to_string(),
            Object {
                body,
                etag: Uuid::new_v4().to_string(),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, String)>, ObjectStoreError> {
        let objects = self.objects.lock().expect("lock poisoned");
        Ok(objects.get(key).map(|o| (o.body.clone(), o.etag.clone())))
    }

    async fn head(&self, key: &str) -> Result<Option<String>, ObjectStoreError> {
        let objects = self.objects.lock().expect("lock poisoned");
        Ok(objects.get(key).map(|o| o.etag.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.lock().expect("lock poisoned");
        objects.remove(key);
        Ok(())
    }

    async fn list_direct(
        &self,
        prefix: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let objects = self.objects.lock().expect("lock poisoned");
        // Mirrors S3's `CommonPrefixes`: the full prefix up to and
        // including the next `/`, not the bare leaf segment.
        let mut names: Vec<String> = objects
            .keys()
            .filter_map(|key| key.strip_prefix(prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|segment| !segment.is_empty())
            .map(|segment| format!("{prefix}{segment}/"))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn list_files(
        &self,
        prefix: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let objects = self.objects.lock().expect("lock poisoned");
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryObjectStore::new();
        store.put("a/b.txt", Bytes::from_static(b"hi")).await.unwrap();
        let (body, _etag) = store.get("a/b.txt").await.unwrap().unwrap();
        assert_eq!(body, Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn get_missing_key_is_none_not_error() {
        let store = InMemoryObjectStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_missing_key_succeeds() {
        let store = InMemoryObjectStore::new();
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn put_if_match_none_requires_absence() {
        let store = InMemoryObjectStore::new();
        assert!(store
            .put_if_match("k", Bytes::from_static(b"v1"), None)
            .await
            .unwrap());
        assert!(!store
            .put_if_match("k", Bytes::from_static(b"v2"), None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn put_if_match_requires_current_etag() {
        let store = InMemoryObjectStore::new();
        store.put("k", Bytes::from_static(b"v1")).await.unwrap();
        let etag = store.head("k").await.unwrap().unwrap();
        assert!(!store
            .put_if_match("k", Bytes::from_static(b"v2"), Some("stale-etag"))
            .await
            .unwrap());
        assert!(store
            .put_if_match("k", Bytes::from_static(b"v2"), Some(&etag))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn list_direct_returns_immediate_children_only() {
        let store = InMemoryObjectStore::new();
        store.put("raw/2023/11/14/a.parquet", Bytes::new()).await.unwrap();
        store.put("raw/2023/12/01/b.parquet", Bytes::new()).await.unwrap();
        let cancel = CancellationToken::new();
        let mut years = store.list_direct("raw/", &cancel).await.unwrap();
        years.sort();
        assert_eq!(years, vec!["raw/2023/".to_string()]);
    }

    #[tokio::test]
    async fn list_files_returns_everything_under_prefix() {
        let store = InMemoryObjectStore::new();
        store.put("raw/2023/11/14/a.parquet", Bytes::new()).await.unwrap();
        store.put("raw/2023/11/14/b.parquet", Bytes::new()).await.unwrap();
        let cancel = CancellationToken::new();
        let files = store.list_files("raw/2023/11/14/", &cancel).await.unwrap();
        assert_eq!(files.len(), 2);
    }
}
