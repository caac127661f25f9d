//! Failure modes the engine can't continue past (spec.md §7: everything
//! recoverable is recorded on the run document instead of propagated).

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum CompactionError {
    #[snafu(display("object store error: {source}"))]
    Store { source: sgarchive_objectstore::ObjectStoreError },

    #[snafu(display("lock service error: {source}"))]
    Lock { source: sgarchive_lock::LockError },

    #[snafu(display("run status error: {source}"))]
    RunStatus { source: sgarchive_runstatus::RunStatusError },
}

impl From<sgarchive_objectstore::ObjectStoreError> for CompactionError {
    fn from(source: sgarchive_objectstore::ObjectStoreError) -> Self {
        Self::Store { source }
    }
}

impl From<sgarchive_lock::LockError> for CompactionError {
    fn from(source: sgarchive_lock::LockError) -> Self {
        Self::Lock { source }
    }
}

impl From<sgarchive_runstatus::RunStatusError> for CompactionError {
    fn from(source: sgarchive_runstatus::RunStatusError) -> Self {
        Self::RunStatus { source }
    }
}
