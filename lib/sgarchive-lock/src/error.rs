//! Failure modes for lock operations (spec.md §7).

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum LockError {
    #[snafu(display("object store error during lock operation: {source}"))]
    Store { source: sgarchive_objectstore::ObjectStoreError },

    #[snafu(display("failed to (de)serialize lock document: {source}"))]
    Codec { source: serde_json::Error },
}

impl From<sgarchive_objectstore::ObjectStoreError> for LockError {
    fn from(source: sgarchive_objectstore::ObjectStoreError) -> Self {
        Self::Store { source }
    }
}

impl From<serde_json::Error> for LockError {
    fn from(source: serde_json::Error) -> Self {
        Self::Codec { source }
    }
}
