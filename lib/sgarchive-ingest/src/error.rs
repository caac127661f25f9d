//! Failure modes for the ingestion path (spec.md §4.8: a PUT failure must
//! surface as retryable to the caller).

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum IngestError {
    #[snafu(display("failed to encode event batch: {source}"))]
    Encode { source: sgarchive_schema::SchemaCodecError },

    #[snafu(display("failed to store raw event file: {source}"))]
    Store { source: sgarchive_objectstore::ObjectStoreError },
}

impl From<sgarchive_schema::SchemaCodecError> for IngestError {
    fn from(source: sgarchive_schema::SchemaCodecError) -> Self {
        Self::Encode { source }
    }
}

impl From<sgarchive_objectstore::ObjectStoreError> for IngestError {
    fn from(source: sgarchive_objectstore::ObjectStoreError) -> Self {
        Self::Store { source }
    }
}
