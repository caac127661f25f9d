//! Failure modes for run-status persistence (spec.md §7: "failure to
//! serialize/deserialize run status or lock documents is logged but does
//! not terminate the process").

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum RunStatusError {
    #[snafu(display("object store error while saving run status: {source}"))]
    Store { source: sgarchive_objectstore::ObjectStoreError },

    #[snafu(display("failed to (de)serialize run status document: {source}"))]
    Codec { source: serde_json::Error },
}

impl From<sgarchive_objectstore::ObjectStoreError> for RunStatusError {
    fn from(source: sgarchive_objectstore::ObjectStoreError) -> Self {
        Self::Store { source }
    }
}

impl From<serde_json::Error> for RunStatusError {
    fn from(source: serde_json::Error) -> Self {
        Self::Codec { source }
    }
}
