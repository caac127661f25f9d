//! The engine's "Plan" step: enumerate `(year, month, day)` folders under
//! the raw prefix in three nested `ListDirect` passes (spec.md §4.6.3).

use chrono::NaiveDate;
use sgarchive_objectstore::{CancellationToken, ObjectStore, ObjectStoreError};
use sgarchive_paths::PathCodec;
use tracing::debug;

/// Enumerate every raw-namespace day at or before `older_than_or_equal`, in
/// discovery order. Folder names that don't parse as the expected numeric
/// component are silently skipped, not treated as errors.
pub async fn discover_target_days<S: ObjectStore>(
    store: &S,
    paths: &PathCodec,
    older_than_or_equal: NaiveDate,
    cancel: &CancellationToken,
) -> Result<Vec<NaiveDate>, ObjectStoreError> {
    let mut days = Vec::new();

    for year_prefix in store.list_direct(&paths.raw_prefix(None, None, None), cancel).await? {
        if cancel.is_cancelled() {
            break;
        }
        let Some(year) = last_segment(&year_prefix).and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };

        for month_prefix in store.list_direct(&paths.raw_prefix(Some(year), None, None), cancel).await? {
            if cancel.is_cancelled() {
                break;
            }
            let Some(month) = last_segment(&month_prefix).and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };

            for day_prefix in store.list_direct(&paths.raw_prefix(Some(year), Some(month), None), cancel).await? {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(day) = last_segment(&day_prefix).and_then(|s| s.parse::<u32>().ok()) else {
                    continue;
                };
                let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) else {
                    continue;
                };
                if date <= older_than_or_equal {
                    days.push(date);
                }
            }
        }
    }

    debug!(count = days.len(), "discovered target days for compaction");
    Ok(days)
}

fn last_segment(prefix: &str) -> Option<&str> {
    prefix.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sgarchive_objectstore::memory::InMemoryObjectStore;

    #[tokio::test]
    async fn discovers_days_at_or_before_the_cutoff() {
        let store = InMemoryObjectStore::new();
        let paths = PathCodec::new("raw/v1", "compacted/v1");
        let cancel = CancellationToken::new();

        for key in [
            "raw/v1/2023/11/13/a.parquet",
            "raw/v1/2023/11/14/a.parquet",
            "raw/v1/2023/11/15/a.parquet",
        ] {
            store.put(key, Bytes::new()).await.unwrap();
        }

        let cutoff = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();
        let mut days = discover_target_days(&store, &paths, cutoff, &cancel).await.unwrap();
        days.sort();

        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2023, 11, 13).unwrap(),
                NaiveDate::from_ymd_opt(2023, 11, 14).unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn skips_non_numeric_folders() {
        let store = InMemoryObjectStore::new();
        let paths = PathCodec::new("raw/v1", "compacted/v1");
        let cancel = CancellationToken::new();

        store.put("raw/v1/scratch/notes.txt", Bytes::new()).await.unwrap();
        store.put("raw/v1/2023/11/14/a.parquet", Bytes::new()).await.unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let days = discover_target_days(&store, &paths, cutoff, &cancel).await.unwrap();
        assert_eq!(days, vec![NaiveDate::from_ymd_opt(2023, 11, 14).unwrap()]);
    }

    #[tokio::test]
    async fn empty_store_discovers_nothing() {
        let store = InMemoryObjectStore::new();
        let paths = PathCodec::new("raw/v1", "compacted/v1");
        let cancel = CancellationToken::new();
        let cutoff = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let days = discover_target_days(&store, &paths, cutoff, &cancel).await.unwrap();
        assert!(days.is_empty());
    }
}
