//! The per-batch read/group-and-write/verify/cleanup protocol
//! (spec.md §4.6.1). A batch is a memory-bounded prefix of a day's
//! remaining raw files, processed end-to-end before the next batch starts.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use sgarchive_objectstore::ObjectStore;
use sgarchive_paths::PathCodec;
use sgarchive_schema::{decode_row_group, encode_streaming, row_group_count, Event, DEFAULT_ROW_GROUP_SIZE};
use tracing::{info, warn};

/// What one batch accomplished, so the caller can update the run document
/// and trim the day's remaining-files list.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub processed_files: Vec<(String, u64)>,
    pub failed_original_files: Vec<String>,
    pub output_files_created: Vec<String>,
    pub failed_output_files: Vec<String>,
    pub deleted_original_files: Vec<String>,
}

impl BatchOutcome {
    /// Files consumed from the remaining list: successfully processed plus
    /// those that failed to read. Neither kind is revisited.
    pub fn consumed_count(&self) -> usize {
        self.processed_files.len() + self.failed_original_files.len()
    }

    pub fn made_progress(&self) -> bool {
        self.consumed_count() > 0
    }
}

/// Run one batch over a contiguous prefix of `candidates`, stopping once
/// the cumulative input byte budget would be exceeded.
pub async fn run_batch<S: ObjectStore>(
    store: &S,
    paths: &PathCodec,
    date: NaiveDate,
    candidates: &[String],
    max_batch_size_bytes: u64,
) -> Result<BatchOutcome, sgarchive_objectstore::ObjectStoreError> {
    let mut outcome = BatchOutcome::default();
    let mut events_by_bucket: BTreeMap<i64, Vec<Event>> = BTreeMap::new();
    let mut processed_bytes: u64 = 0;

    for key in candidates {
        let Some((bytes, _etag)) = store.get(key).await? else {
            // Already gone (e.g. a previous crashed run deleted it but
            // never recorded completion); treat as processed so progress
            // continues rather than looping forever on a ghost entry.
            outcome.processed_files.push((key.clone(), 0));
            continue;
        };

        if processed_bytes + bytes.len() as u64 > max_batch_size_bytes {
            break;
        }

        if bytes.is_empty() {
            warn!(key, "empty raw file, treating as successfully processed");
            outcome.processed_files.push((key.clone(), 0));
            continue;
        }

        match read_all_row_groups(bytes.clone()) {
            Ok(events) => {
                for event in events {
                    let bucket = event.timestamp.div_euclid(3600);
                    events_by_bucket.entry(bucket).or_default().push(event);
                }
                processed_bytes += bytes.len() as u64;
                outcome.processed_files.push((key.clone(), bytes.len() as u64));
            }
            Err(reason) => {
                warn!(key, reason, "raw file failed to decode");
                outcome.failed_original_files.push(key.clone());
            }
        }
    }

    // Group-and-write phase.
    let mut written_buckets = Vec::new();
    for (bucket, events) in events_by_bucket {
        let Some(first) = events.first() else { continue };
        let Some(event_time) = DateTime::<Utc>::from_timestamp(first.timestamp, 0) else {
            warn!(bucket, "event timestamp out of range, skipping bucket");
            continue;
        };
        let jst_time = event_time.with_timezone(&chrono_tz::Asia::Tokyo);
        let hour = jst_time.hour();
        let bucket_date = jst_time.date_naive();

        let mut buffer = Vec::new();
        let produced = match encode_streaming(futures::stream::iter(events), &mut buffer, DEFAULT_ROW_GROUP_SIZE).await {
            Ok(produced) => produced,
            Err(error) => {
                warn!(bucket, %error, "failed to encode compacted bucket");
                continue;
            }
        };
        if !produced {
            continue;
        }

        let key = paths.compacted_file_key(bucket_date, hour, &buffer);
        if let Err(error) = store.put(&key, buffer.into()).await {
            warn!(key, %error, "failed to PUT compacted file");
            outcome.failed_output_files.push(key);
            continue;
        }
        written_buckets.push(key);
    }

    // Verify phase.
    let mut all_verified = true;
    for key in written_buckets {
        match verify(store, &key).await {
            Ok(groups) => {
                info!(key, groups, "verified compacted file");
                outcome.output_files_created.push(key);
            }
            Err(reason) => {
                warn!(key, reason, "compacted file failed verification, deleting");
                let _ = store.delete(&key).await;
                outcome.failed_output_files.push(key);
                all_verified = false;
            }
        }
    }

    // Cleanup phase: only delete raw inputs if every output in this batch
    // verified cleanly.
    if all_verified {
        for (key, _bytes) in &outcome.processed_files {
            if let Err(error) = store.delete(key).await {
                warn!(key, %error, "failed to delete verified raw input");
                continue;
            }
            outcome.deleted_original_files.push(key.clone());
        }
    } else {
        info!(date = %date, "verification failures in this batch, retaining raw inputs");
    }

    metrics::counter!("sgarchive_compaction_files_processed_total").increment(outcome.processed_files.len() as u64);
    metrics::counter!("sgarchive_compaction_bytes_processed_total").increment(processed_bytes);
    metrics::counter!("sgarchive_compaction_files_failed_total").increment(outcome.failed_original_files.len() as u64);
    metrics::counter!("sgarchive_compaction_output_files_created_total").increment(outcome.output_files_created.len() as u64);

    Ok(outcome)
}

fn read_all_row_groups(bytes: bytes::Bytes) -> Result<Vec<Event>, String> {
    let count = row_group_count(bytes.clone()).map_err(|e| e.to_string())?;
    let mut events = Vec::new();
    for idx in 0..count {
        let group = decode_row_group(bytes.clone(), idx).map_err(|e| e.to_string())?;
        events.extend(group);
    }
    Ok(events)
}

async fn verify<S: ObjectStore>(store: &S, key: &str) -> Result<usize, String> {
    let (bytes, _etag) = store
        .get(key)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "object disappeared before verify".to_string())?;
    row_group_count(bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sgarchive_objectstore::memory::InMemoryObjectStore;

    fn event(ts: i64) -> Event {
        Event { email: "a@example.com".to_string(), timestamp: ts, event: "delivered".to_string(), ..Event::default() }
    }

    async fn encode(events: Vec<Event>) -> Bytes {
        let mut buf = Vec::new();
        encode_streaming(futures::stream::iter(events), &mut buf, 100).await.unwrap();
        Bytes::from(buf)
    }

    #[tokio::test]
    async fn writes_one_compacted_file_per_hour_bucket() {
        let store = InMemoryObjectStore::new();
        let paths = PathCodec::new("raw/v1", "compacted/v1");
        let date = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();

        // 1700000000 -> 2023-11-14 ~09:13 JST, 1700003600 -> ~10:13 JST.
        let body = encode(vec![event(1_700_000_000), event(1_700_003_600)]).await;
        let key = paths.raw_file_key(date, &body);
        store.put(&key, body).await.unwrap();

        let outcome = run_batch(&store, &paths, date, &[key.clone()], 512 * 1024 * 1024).await.unwrap();

        assert_eq!(outcome.output_files_created.len(), 2);
        assert_eq!(outcome.deleted_original_files, vec![key]);
        assert!(outcome.failed_output_files.is_empty());
    }

    #[tokio::test]
    async fn corrupt_input_is_recorded_and_skipped() {
        let store = InMemoryObjectStore::new();
        let paths = PathCodec::new("raw/v1", "compacted/v1");
        let date = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();

        let good = encode(vec![event(1_700_000_000)]).await;
        let good_key = paths.raw_file_key(date, &good);
        store.put(&good_key, good).await.unwrap();

        let bogus_key = format!("{}/bogus.parquet", paths.raw_prefix(Some(2023), Some(11), Some(14)));
        store.put(&bogus_key, Bytes::from_static(b"not parquet")).await.unwrap();

        let outcome = run_batch(&store, &paths, date, &[good_key.clone(), bogus_key.clone()], 512 * 1024 * 1024)
            .await
            .unwrap();

        assert_eq!(outcome.failed_original_files, vec![bogus_key]);
        assert_eq!(outcome.deleted_original_files, vec![good_key]);
    }

    #[tokio::test]
    async fn empty_raw_file_is_processed_and_deleted() {
        let store = InMemoryObjectStore::new();
        let paths = PathCodec::new("raw/v1", "compacted/v1");
        let date = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();

        let key = format!("{}empty.parquet", paths.raw_prefix(Some(2023), Some(11), Some(14)));
        store.put(&key, Bytes::new()).await.unwrap();

        let outcome = run_batch(&store, &paths, date, &[key.clone()], 512 * 1024 * 1024).await.unwrap();
        assert_eq!(outcome.deleted_original_files, vec![key]);
        assert!(outcome.output_files_created.is_empty());
    }

    #[tokio::test]
    async fn stops_before_exceeding_the_batch_cap() {
        let store = InMemoryObjectStore::new();
        let paths = PathCodec::new("raw/v1", "compacted/v1");
        let date = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();

        let a = encode(vec![event(1_700_000_000)]).await;
        let b = encode(vec![event(1_700_000_100)]).await;
        let key_a = format!("{}a.parquet", paths.raw_prefix(Some(2023), Some(11), Some(14)));
        let key_b = format!("{}b.parquet", paths.raw_prefix(Some(2023), Some(11), Some(14)));
        store.put(&key_a, a.clone()).await.unwrap();
        store.put(&key_b, b).await.unwrap();

        let cap = a.len() as u64;
        let outcome = run_batch(&store, &paths, date, &[key_a.clone(), key_b], cap).await.unwrap();

        assert_eq!(outcome.consumed_count(), 1);
        assert_eq!(outcome.deleted_original_files, vec![key_a]);
    }
}
