//! Run status document with two write paths: cheap in-process `Notify`
//! (a watch channel carrying the latest snapshot) and durable `Save`
//! (a full-document JSON PUT that also piggy-backs a lock extension).

mod document;
mod error;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use sgarchive_lock::{LockHandle, LockService};
use sgarchive_objectstore::ObjectStore;
use sgarchive_paths::PathCodec;
use tokio::sync::watch;
use tracing::{debug, warn};

pub use document::RunStatus;
pub use error::RunStatusError;

/// Holds the single mutex-guarded document, a watch channel for `Notify`
/// subscribers, and the object-store/lock handles `Save` needs.
pub struct RunStatusStore<S: ObjectStore> {
    document: Mutex<RunStatus>,
    notifier: watch::Sender<RunStatus>,
    store: Arc<S>,
    key: String,
}

impl<S: ObjectStore> RunStatusStore<S> {
    pub fn new(store: Arc<S>, paths: &PathCodec, initial: RunStatus) -> Self {
        let (notifier, _rx) = watch::channel(initial.clone());
        Self { document: Mutex::new(initial), notifier, store, key: paths.run_status_key() }
    }

    /// Subscribe to the latest document snapshot. Each receiver only ever
    /// sees the most recent value, never a backlog (spec.md §6: "a simple
    /// `broadcast(channel) -> latest` semantics is sufficient").
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.notifier.subscribe()
    }

    /// Read-only snapshot of the current document.
    pub fn snapshot(&self) -> RunStatus {
        #[allow(clippy::unwrap_used)]
        self.document.lock().unwrap().clone()
    }

    /// Apply `mutate` under the single document mutex, then Notify. Cheap,
    /// synchronous, never touches the object store.
    pub fn mutate(&self, mutate: impl FnOnce(&mut RunStatus, chrono::DateTime<Utc>)) {
        let now = Utc::now();
        let snapshot = {
            #[allow(clippy::unwrap_used)]
            let mut guard = self.document.lock().unwrap();
            mutate(&mut guard, now);
            guard.clone()
        };
        let _ = self.notifier.send(snapshot);
    }

    /// Serialize the current document and PUT it to `run.json`, then
    /// opportunistically extend the lock under `handle`. A lock-extend
    /// failure is logged, not propagated: the run document itself is the
    /// durable truth (spec.md §4.5, §4.6 "Lock extension cadence").
    pub async fn save(&self, lock: &LockService<S>, handle: &LockHandle) -> Result<(), RunStatusError> {
        let body = {
            #[allow(clippy::unwrap_used)]
            let guard = self.document.lock().unwrap();
            serde_json::to_vec(&*guard)?
        };
        self.store.put(&self.key, body.into()).await?;

        match lock.extend(handle, Utc::now()).await {
            Ok(true) => debug!("piggy-backed lock extension on run-status save"),
            Ok(false) => warn!("lock extension during run-status save found a mismatched epoch"),
            Err(error) => warn!(%error, "lock extension during run-status save failed"),
        }
        Ok(())
    }

    /// Save under a context that must not observe cancellation, used for
    /// the terminal save in the compaction engine's finalize step.
    /// Identical to [`Self::save`] today; kept distinct so callers document
    /// intent at the call site.
    pub async fn save_uncancellable(&self, lock: &LockService<S>, handle: &LockHandle) -> Result<(), RunStatusError> {
        self.save(lock, handle).await
    }

    /// Load an existing `run.json`, if present.
    pub async fn load(store: &S, paths: &PathCodec) -> Result<Option<RunStatus>, RunStatusError> {
        match store.get(&paths.run_status_key()).await? {
            None => Ok(None),
            Some((bytes, _etag)) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgarchive_objectstore::memory::InMemoryObjectStore;

    fn paths() -> PathCodec {
        PathCodec::new("raw/v1", "compacted/v1")
    }

    fn store_with(doc: RunStatus) -> (Arc<InMemoryObjectStore>, RunStatusStore<InMemoryObjectStore>) {
        let objects = Arc::new(InMemoryObjectStore::new());
        let run_store = RunStatusStore::new(Arc::clone(&objects), &paths(), doc);
        (objects, run_store)
    }

    fn fresh_doc() -> RunStatus {
        RunStatus::new("lock-1".into(), vec!["2023-11-14".into()], vec!["raw/v1".into()], Utc::now())
    }

    #[tokio::test]
    async fn mutate_notifies_subscribers() {
        let (_objects, run_store) = store_with(fresh_doc());
        let mut rx = run_store.subscribe();

        run_store.mutate(|doc, now| doc.record_deleted_original(now));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().deleted_original_files, 1);
    }

    #[tokio::test]
    async fn save_writes_full_document_to_store() {
        let (objects, run_store) = store_with(fresh_doc());
        let lock = LockService::new(Arc::clone(&objects), &paths(), "owner-1".to_string(), "host".to_string());
        let handle = match lock.try_acquire("lock-1".to_string(), Utc::now()).await.unwrap() {
            sgarchive_lock::AcquireOutcome::Acquired(h) => h,
            _ => panic!("expected acquired"),
        };

        run_store.save(&lock, &handle).await.unwrap();

        let loaded = RunStatusStore::load(&*objects, &paths()).await.unwrap().unwrap();
        assert_eq!(loaded.lock_id, "lock-1");
    }

    #[tokio::test]
    async fn save_extends_the_lock() {
        let (objects, run_store) = store_with(fresh_doc());
        let lock = LockService::new(Arc::clone(&objects), &paths(), "owner-1".to_string(), "host".to_string());
        let now = Utc::now();
        let handle = match lock.try_acquire("lock-1".to_string(), now).await.unwrap() {
            sgarchive_lock::AcquireOutcome::Acquired(h) => h,
            _ => panic!("expected acquired"),
        };

        let before = lock.current().await.unwrap().unwrap().expires_at;
        run_store.save(&lock, &handle).await.unwrap();
        let after = lock.current().await.unwrap().unwrap().expires_at;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let objects = InMemoryObjectStore::new();
        let loaded = RunStatusStore::load(&objects, &paths()).await.unwrap();
        assert!(loaded.is_none());
    }
}
