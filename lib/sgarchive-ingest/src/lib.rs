//! Turns a verified event batch into a raw Parquet object (spec.md §4.8).
//!
//! `Webhook POST -> C7 (verify) -> C8 (encode batch) -> C1 (PUT raw file)`.

mod error;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream;
use sgarchive_objectstore::ObjectStore;
use sgarchive_paths::PathCodec;
use sgarchive_schema::{encode_streaming, Event, DEFAULT_ROW_GROUP_SIZE};
use tracing::{info, warn};

pub use error::IngestError;

pub struct Ingestor<S: ObjectStore> {
    store: Arc<S>,
    paths: PathCodec,
}

impl<S: ObjectStore> Ingestor<S> {
    pub fn new(store: Arc<S>, paths: PathCodec) -> Self {
        Self { store, paths }
    }

    /// Encode `events` and PUT them unconditionally under the raw prefix,
    /// keyed by content hash. `now` is used only to choose the storage
    /// date (JST calendar day); compaction later re-partitions by each
    /// event's own `timestamp`. Returns `None` when the batch carried no
    /// events — there is nothing to store.
    pub async fn ingest(&self, events: Vec<Event>, now: DateTime<Utc>) -> Result<Option<String>, IngestError> {
        if events.is_empty() {
            return Ok(None);
        }

        let storage_date = now.with_timezone(&chrono_tz::Asia::Tokyo).date_naive();

        let mut buffer = Vec::new();
        let produced = encode_streaming(stream::iter(events), &mut buffer, DEFAULT_ROW_GROUP_SIZE).await?;
        if !produced {
            warn!("encoder produced zero rows for a non-empty batch");
            return Ok(None);
        }

        let key = self.paths.raw_file_key(storage_date, &buffer);
        self.store.put(&key, buffer.into()).await?;
        info!(key, "stored raw event file");
        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgarchive_objectstore::memory::InMemoryObjectStore;

    fn sample_event() -> Event {
        Event {
            email: "user@example.com".to_string(),
            timestamp: 1_700_000_000,
            event: "delivered".to_string(),
            ..Event::default()
        }
    }

    fn ingestor() -> Ingestor<InMemoryObjectStore> {
        Ingestor::new(Arc::new(InMemoryObjectStore::new()), PathCodec::new("raw/v1", "compacted/v1"))
    }

    #[tokio::test]
    async fn empty_batch_stores_nothing() {
        let ingestor = ingestor();
        let result = ingestor.ingest(vec![], Utc::now()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn stores_a_raw_file_under_the_raw_prefix() {
        let ingestor = ingestor();
        let key = ingestor.ingest(vec![sample_event()], Utc::now()).await.unwrap().unwrap();
        assert!(key.starts_with("raw/v1/"));
        assert!(key.ends_with(".parquet"));
    }

    #[tokio::test]
    async fn identical_batches_produce_identical_keys() {
        let ingestor = ingestor();
        let now = Utc::now();
        let key_a = ingestor.ingest(vec![sample_event()], now).await.unwrap().unwrap();
        let key_b = ingestor.ingest(vec![sample_event()], now).await.unwrap().unwrap();
        assert_eq!(key_a, key_b);
    }
}
