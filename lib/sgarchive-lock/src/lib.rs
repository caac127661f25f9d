//! Distributed lock over `<compacted-prefix>/run.lock`, arbitrated by CAS
//! on the object's ETag. States: `Absent -> Held -> Expired -> Absent`.

mod error;

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sgarchive_objectstore::ObjectStore;
use sgarchive_paths::PathCodec;
use tracing::{debug, info, warn};

pub use error::LockError;

/// Lock lease length. A holder must extend before this elapses or another
/// instance may acquire the lock out from under it.
pub const LOCK_DURATION: ChronoDuration = ChronoDuration::minutes(30);

/// A run with `endTime == null` whose last observed activity is older than
/// this is considered stalled and its lock is force-released.
pub const STALLED_RUN_THRESHOLD: ChronoDuration = ChronoDuration::hours(24);

/// The document stored at `<compacted-prefix>/run.lock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockDocument {
    pub lock_id: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub host_name: String,
}

/// The `(lockId, ownerId, acquiredAt)` triple that identifies one lock
/// epoch. A restarted instance gets a new `ownerId` and so can never
/// extend or release an epoch it did not itself acquire (spec.md §4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct LockHandle {
    pub lock_id: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    etag: String,
}

impl LockHandle {
    fn matches(&self, doc: &LockDocument) -> bool {
        self.lock_id == doc.lock_id && self.owner_id == doc.owner_id
    }
}

/// Outcome of [`LockService::try_acquire`].
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(LockHandle),
    HeldBy { owner_id: String, expires_at: DateTime<Utc> },
}

/// Acquires, extends, and releases the single run lock, backed by
/// read-then-CAS operations against an [`ObjectStore`].
pub struct LockService<S: ObjectStore> {
    store: Arc<S>,
    key: String,
    owner_id: String,
    host_name: String,
}

impl<S: ObjectStore> LockService<S> {
    /// `owner_id` is the process-wide `instanceId` (spec.md §6: `hostname +
    /// random UUID`), fixed for the process lifetime.
    pub fn new(store: Arc<S>, paths: &PathCodec, owner_id: String, host_name: String) -> Self {
        Self { store, key: paths.run_lock_key(), owner_id, host_name }
    }

    async fn read(&self) -> Result<Option<(LockDocument, String)>, LockError> {
        match self.store.get(&self.key).await? {
            None => Ok(None),
            Some((bytes, etag)) => {
                let doc: LockDocument = serde_json::from_slice(&bytes)?;
                Ok(Some((doc, etag)))
            }
        }
    }

    /// Reads the current lock document without attempting to acquire it.
    pub async fn current(&self) -> Result<Option<LockDocument>, LockError> {
        Ok(self.read().await?.map(|(doc, _)| doc))
    }

    /// `TryAcquire`: fails with [`AcquireOutcome::HeldBy`] if the stored
    /// lock has not yet expired; otherwise CAS-writes a fresh lock body,
    /// requiring `If-Match` on the observed ETag or `If-None-Match: *` when
    /// the object was absent.
    pub async fn try_acquire(&self, lock_id: String, now: DateTime<Utc>) -> Result<AcquireOutcome, LockError> {
        let existing = self.read().await?;

        let expected_etag = match &existing {
            Some((doc, _etag)) if now < doc.expires_at => {
                return Ok(AcquireOutcome::HeldBy {
                    owner_id: doc.owner_id.clone(),
                    expires_at: doc.expires_at,
                });
            }
            Some((_, etag)) => Some(etag.clone()),
            None => None,
        };

        let body = LockDocument {
            lock_id: lock_id.clone(),
            owner_id: self.owner_id.clone(),
            acquired_at: now,
            expires_at: now + LOCK_DURATION,
            host_name: self.host_name.clone(),
        };
        let bytes = serde_json::to_vec(&body)?;

        let wrote = self
            .store
            .put_if_match(&self.key, bytes.into(), expected_etag.as_deref())
            .await?;
        if !wrote {
            debug!(lock_id, "lock CAS lost the race to another acquirer");
            return Ok(AcquireOutcome::HeldBy {
                owner_id: existing.map(|(doc, _)| doc.owner_id).unwrap_or_default(),
                expires_at: now,
            });
        }

        info!(lock_id, owner_id = %self.owner_id, "acquired run lock");
        let etag = self
            .store
            .head(&self.key)
            .await?
            .unwrap_or_default();
        Ok(AcquireOutcome::Acquired(LockHandle {
            lock_id: body.lock_id,
            owner_id: body.owner_id,
            acquired_at: body.acquired_at,
            etag,
        }))
    }

    /// `Extend`: CAS-updates `expiresAt` only when the stored lock's
    /// `(lockId, ownerId)` match `handle`'s. Returns `false`, never an
    /// error, when the epoch no longer matches.
    pub async fn extend(&self, handle: &LockHandle, now: DateTime<Utc>) -> Result<bool, LockError> {
        self.cas_update(handle, |doc| doc.expires_at = now + LOCK_DURATION).await
    }

    /// `Release`: idempotent CAS-update of `expiresAt = now`. Deliberately
    /// does not delete the object, retaining last-known ownership for
    /// diagnostics (spec.md §4.4).
    pub async fn release(&self, handle: &LockHandle, now: DateTime<Utc>) -> Result<bool, LockError> {
        self.cas_update(handle, |doc| doc.expires_at = now).await
    }

    /// `InvalidateIfExpired`: CAS-update of `expiresAt = now`, but only when
    /// the stored document still matches `expected` byte-for-byte AND
    /// `expected.expires_at <= now`.
    pub async fn invalidate_if_expired(
        &self,
        expected: &LockDocument,
        now: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        if expected.expires_at > now {
            return Ok(false);
        }
        self.force_invalidate(expected, now).await
    }

    /// `ForceInvalidate`: same as [`Self::invalidate_if_expired`] without
    /// the expiry precondition; used when the stalled-run policy fires.
    pub async fn force_invalidate(
        &self,
        expected: &LockDocument,
        now: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let Some((current, etag)) = self.read().await? else {
            return Ok(false);
        };
        if &current != expected {
            return Ok(false);
        }
        let mut updated = current;
        updated.expires_at = now;
        let bytes = serde_json::to_vec(&updated)?;
        let wrote = self.store.put_if_match(&self.key, bytes.into(), Some(&etag)).await?;
        if wrote {
            warn!(lock_id = %updated.lock_id, "force-invalidated lock");
        }
        Ok(wrote)
    }

    async fn cas_update(
        &self,
        handle: &LockHandle,
        mutate: impl FnOnce(&mut LockDocument),
    ) -> Result<bool, LockError> {
        let Some((mut doc, etag)) = self.read().await? else {
            return Ok(false);
        };
        if !handle.matches(&doc) {
            return Ok(false);
        }
        mutate(&mut doc);
        let bytes = serde_json::to_vec(&doc)?;
        Ok(self.store.put_if_match(&self.key, bytes.into(), Some(&etag)).await?)
    }
}

/// True when a run document reports `endTime == null` and its last
/// observed activity predates [`STALLED_RUN_THRESHOLD`]. `last_updated`
/// falls back to `start_time` when zero/absent, per spec.md §4.4.
pub fn is_stalled(end_time: Option<DateTime<Utc>>, start_time: DateTime<Utc>, last_updated: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if end_time.is_some() {
        return false;
    }
    let reference = last_updated.unwrap_or(start_time);
    now - reference > STALLED_RUN_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgarchive_objectstore::memory::InMemoryObjectStore;

    fn paths() -> PathCodec {
        PathCodec::new("raw/v1", "compacted/v1")
    }

    fn service(store: Arc<InMemoryObjectStore>, owner: &str) -> LockService<InMemoryObjectStore> {
        LockService::new(store, &paths(), owner.to_string(), "host-a".to_string())
    }

    #[tokio::test]
    async fn acquire_on_absent_lock_succeeds() {
        let store = Arc::new(InMemoryObjectStore::new());
        let svc = service(store, "owner-1");
        let now = Utc::now();

        let outcome = svc.try_acquire("lock-1".to_string(), now).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn second_acquire_while_held_fails() {
        let store = Arc::new(InMemoryObjectStore::new());
        let a = service(Arc::clone(&store), "owner-a");
        let b = service(Arc::clone(&store), "owner-b");
        let now = Utc::now();

        a.try_acquire("lock-a".to_string(), now).await.unwrap();
        let outcome = b.try_acquire("lock-b".to_string(), now).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::HeldBy { .. }));
    }

    #[tokio::test]
    async fn acquire_after_release_succeeds() {
        let store = Arc::new(InMemoryObjectStore::new());
        let a = service(Arc::clone(&store), "owner-a");
        let b = service(Arc::clone(&store), "owner-b");
        let now = Utc::now();

        let handle = match a.try_acquire("lock-a".to_string(), now).await.unwrap() {
            AcquireOutcome::Acquired(h) => h,
            _ => panic!("expected acquired"),
        };
        assert!(a.release(&handle, now).await.unwrap());

        let outcome = b.try_acquire("lock-b".to_string(), now).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn extend_fails_for_mismatched_owner() {
        let store = Arc::new(InMemoryObjectStore::new());
        let a = service(Arc::clone(&store), "owner-a");
        let now = Utc::now();

        let handle = match a.try_acquire("lock-a".to_string(), now).await.unwrap() {
            AcquireOutcome::Acquired(h) => h,
            _ => panic!("expected acquired"),
        };
        let forged = LockHandle { owner_id: "someone-else".to_string(), ..handle.clone() };
        assert!(!a.extend(&forged, now).await.unwrap());
        assert!(a.extend(&handle, now).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_after_expiry_succeeds_without_release() {
        let store = Arc::new(InMemoryObjectStore::new());
        let a = service(Arc::clone(&store), "owner-a");
        let b = service(Arc::clone(&store), "owner-b");
        let now = Utc::now();

        a.try_acquire("lock-a".to_string(), now).await.unwrap();
        let later = now + LOCK_DURATION + ChronoDuration::seconds(1);
        let outcome = b.try_acquire("lock-b".to_string(), later).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }

    #[test]
    fn stalled_detects_old_inactive_run() {
        let start = Utc::now() - ChronoDuration::hours(30);
        assert!(is_stalled(None, start, Some(start), Utc::now()));
    }

    #[test]
    fn stalled_ignores_completed_run() {
        let start = Utc::now() - ChronoDuration::hours(30);
        assert!(!is_stalled(Some(Utc::now()), start, Some(start), Utc::now()));
    }

    #[test]
    fn stalled_falls_back_to_start_time_when_never_updated() {
        let start = Utc::now() - ChronoDuration::hours(25);
        assert!(is_stalled(None, start, None, Utc::now()));
    }
}
