//! The compaction engine (spec.md §4.6) — "the heart of the system".
//! Coordinates [`sgarchive_lock`], [`sgarchive_runstatus`], and
//! [`sgarchive_objectstore`] to merge a day's raw files into hour-aligned
//! compacted files, verifying each before deleting its inputs.

mod batch;
mod error;
mod plan;

use std::sync::Arc;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use sgarchive_lock::{is_stalled, AcquireOutcome, LockHandle, LockService};
use sgarchive_objectstore::{CancellationToken, ObjectStore};
use sgarchive_paths::PathCodec;
use sgarchive_runstatus::{RunStatus, RunStatusStore};
use tracing::{info, warn};
use uuid::Uuid;

pub use error::CompactionError;

/// Default ceiling on input bytes read per batch (spec.md §4.6 "Inputs").
pub const DEFAULT_MAX_BATCH_SIZE_BYTES: u64 = 512 * 1024 * 1024;

/// Result of one call to [`CompactionEngine::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    AlreadyRunning,
    UnableToAcquireLock,
}

pub struct CompactionEngine<S: ObjectStore> {
    store: Arc<S>,
    paths: PathCodec,
    lock: LockService<S>,
    max_batch_size_bytes: u64,
}

impl<S: ObjectStore> CompactionEngine<S> {
    pub fn new(store: Arc<S>, paths: PathCodec, instance_id: String, host_name: String, max_batch_size_bytes: u64) -> Self {
        let lock = LockService::new(Arc::clone(&store), &paths, instance_id, host_name);
        Self { store, paths, lock, max_batch_size_bytes }
    }

    /// Run the full top-level protocol once: guard, acquire, plan,
    /// initialize, execute each target day, finalize.
    pub async fn run(&self, now: chrono::DateTime<Utc>, cancel: &CancellationToken) -> Result<RunOutcome, CompactionError> {
        if let Some(outcome) = self.guard(now).await? {
            return Ok(outcome);
        }

        let lock_id = Uuid::new_v4().to_string();
        let handle = match self.lock.try_acquire(lock_id, now).await? {
            AcquireOutcome::Acquired(handle) => handle,
            AcquireOutcome::HeldBy { .. } => return Ok(RunOutcome::UnableToAcquireLock),
        };

        let older_than_or_equal = (now - ChronoDuration::days(1)).date_naive();
        let target_days =
            plan::discover_target_days(&*self.store, &self.paths, older_than_or_equal, cancel).await?;

        let status = RunStatus::new(
            handle.lock_id.clone(),
            target_days.iter().map(format_day).collect(),
            vec![self.paths.raw_prefix(None, None, None)],
            now,
        );
        let status_store = RunStatusStore::new(Arc::clone(&self.store), &self.paths, status);
        status_store.save(&self.lock, &handle).await?;

        for day in &target_days {
            if cancel.is_cancelled() {
                info!("compaction cancelled, stopping day loop");
                break;
            }
            if let Err(error) = self.process_day(*day, &status_store, &handle, cancel).await {
                warn!(day = %day, %error, "day processing failed, continuing with remaining days");
                status_store.mutate(|doc, now| doc.record_failed_output(format!("day:{day}"), now));
                status_store.save(&self.lock, &handle).await?;
            }
        }

        self.finalize(&status_store, &handle).await?;
        Ok(RunOutcome::Completed)
    }

    async fn guard(&self, now: chrono::DateTime<Utc>) -> Result<Option<RunOutcome>, CompactionError> {
        let Some(existing) = RunStatusStore::<S>::load(&*self.store, &self.paths).await? else {
            return Ok(None);
        };
        if !existing.is_in_flight() {
            return Ok(None);
        }
        if !is_stalled(existing.end_time, existing.start_time, Some(existing.last_updated), now) {
            return Ok(Some(RunOutcome::AlreadyRunning));
        }

        warn!(lock_id = existing.lock_id, "stalled run detected, force-releasing lock");
        if let Some(lock_doc) = self.lock.current().await? {
            self.lock.force_invalidate(&lock_doc, now).await?;
        }
        Ok(None)
    }

    async fn process_day(
        &self,
        day: NaiveDate,
        status_store: &RunStatusStore<S>,
        handle: &LockHandle,
        cancel: &CancellationToken,
    ) -> Result<(), CompactionError> {
        let day_prefix = self.paths.raw_prefix(Some(day.year() as u32), Some(day.month()), Some(day.day()));
        let mut remaining: Vec<String> = self
            .store
            .list_files(&day_prefix, cancel)
            .await?
            .into_iter()
            .filter(|key| key.ends_with(".parquet"))
            .collect();

        if remaining.is_empty() {
            return Ok(());
        }

        status_store.mutate(|doc, now| doc.start_day(format_day(&day), remaining.len() as u64, now));
        status_store.save(&self.lock, handle).await?;

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                info!(day = %day, "compaction cancelled mid-day");
                break;
            }

            let outcome = batch::run_batch(&*self.store, &self.paths, day, &remaining, self.max_batch_size_bytes).await?;
            let consumed = outcome.consumed_count();

            for (key, bytes) in &outcome.processed_files {
                status_store.mutate(|doc, now| doc.record_processed_file(key.clone(), *bytes, now));
            }
            for key in &outcome.failed_original_files {
                status_store.mutate(|doc, now| doc.record_failed_original(key.clone(), now));
            }
            for key in &outcome.output_files_created {
                status_store.mutate(|doc, now| doc.record_output_created(key.clone(), now));
            }
            for key in &outcome.failed_output_files {
                status_store.mutate(|doc, now| doc.record_failed_output(key.clone(), now));
            }
            for _ in &outcome.deleted_original_files {
                status_store.mutate(|doc, now| doc.record_deleted_original(now));
            }

            status_store.save(&self.lock, handle).await?;

            if consumed == 0 {
                warn!(day = %day, "batch made zero progress, stopping this day early");
                break;
            }
            remaining.drain(0..consumed);
        }

        status_store.mutate(|doc, now| doc.complete_day(format_day(&day), now));
        status_store.save(&self.lock, handle).await?;
        Ok(())
    }

    /// Finalize always runs: lock release and the terminal Save must
    /// survive cancellation (spec.md §4.6, §5).
    async fn finalize(&self, status_store: &RunStatusStore<S>, handle: &LockHandle) -> Result<(), CompactionError> {
        let now = Utc::now();
        status_store.mutate(|doc, _| doc.finish(now));
        if !self.lock.release(handle, now).await? {
            warn!("lock release during finalize found a mismatched epoch");
        }
        status_store.save_uncancellable(&self.lock, handle).await?;
        Ok(())
    }
}

fn format_day(day: &NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use sgarchive_objectstore::memory::InMemoryObjectStore;
    use sgarchive_schema::{encode_streaming, Event};

    fn paths() -> PathCodec {
        PathCodec::new("raw/v1", "compacted/v1")
    }

    fn engine(store: Arc<InMemoryObjectStore>) -> CompactionEngine<InMemoryObjectStore> {
        CompactionEngine::new(store, paths(), "host-a-instance-1".to_string(), "host-a".to_string(), DEFAULT_MAX_BATCH_SIZE_BYTES)
    }

    async fn encode(events: Vec<Event>) -> Bytes {
        let mut buf = Vec::new();
        encode_streaming(stream::iter(events), &mut buf, 100).await.unwrap();
        Bytes::from(buf)
    }

    fn event(ts: i64) -> Event {
        Event { email: "a@example.com".to_string(), timestamp: ts, event: "delivered".to_string(), ..Event::default() }
    }

    #[tokio::test]
    async fn completes_a_run_with_no_eligible_days() {
        let store = Arc::new(InMemoryObjectStore::new());
        let outcome = engine(store).run(Utc::now(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn compacts_an_eligible_day_and_releases_the_lock() {
        let store = Arc::new(InMemoryObjectStore::new());
        let date = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();
        let body = encode(vec![event(1_700_000_000)]).await;
        let key = paths().raw_file_key(date, &body);
        store.put(&key, body).await.unwrap();

        let now = chrono::DateTime::parse_from_rfc3339("2023-11-16T00:00:00Z").unwrap().with_timezone(&Utc);
        let outcome = engine(Arc::clone(&store)).run(now, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        assert!(store.get(&key).await.unwrap().is_none(), "raw input should be deleted");
        let lock = sgarchive_lock::LockService::new(Arc::clone(&store), &paths(), "checker".to_string(), "h".to_string());
        let lock_doc = lock.current().await.unwrap().unwrap();
        assert!(lock_doc.expires_at <= now);
    }

    #[tokio::test]
    async fn second_concurrent_run_reports_already_running() {
        let store = Arc::new(InMemoryObjectStore::new());
        let in_flight = RunStatus::new("lock-x".into(), vec![], vec![], Utc::now());
        let body = serde_json::to_vec(&in_flight).unwrap();
        store.put(&paths().run_status_key(), body.into()).await.unwrap();

        let outcome = engine(store).run(Utc::now(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::AlreadyRunning);
    }

    #[tokio::test]
    async fn stalled_run_is_recovered() {
        let store = Arc::new(InMemoryObjectStore::new());
        let stale_start = Utc::now() - ChronoDuration::hours(30);
        let mut stalled = RunStatus::new("lock-old".into(), vec![], vec![], stale_start);
        stalled.last_updated = stale_start;
        let body = serde_json::to_vec(&stalled).unwrap();
        store.put(&paths().run_status_key(), body.into()).await.unwrap();

        let outcome = engine(store).run(Utc::now(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }
}
