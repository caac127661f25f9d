//! The run-status document itself and its mutation methods. All mutation
//! goes through `&mut self` so the one call site (inside
//! [`crate::RunStatusStore`]'s mutex) is the only place that can touch it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one compaction run's progress, persisted verbatim to
/// `<compacted-prefix>/run.json` (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub lock_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub target_days: Vec<String>,
    pub target_path_prefixes: Vec<String>,
    pub completed_days: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_day_total_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_day_processed_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_day_processed_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_file: Option<String>,
    pub failed_original_files: Vec<String>,
    #[serde(rename = "deletedOriginalFile")]
    pub deleted_original_files: u64,
    pub output_files_created: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_file: Option<String>,
    pub failed_output_files: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub error_count: u64,
}

impl RunStatus {
    pub fn new(lock_id: String, target_days: Vec<String>, target_path_prefixes: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            lock_id,
            start_time: now,
            end_time: None,
            target_days,
            target_path_prefixes,
            completed_days: Vec::new(),
            current_day: None,
            current_day_total_files: None,
            current_day_processed_files: None,
            current_day_processed_bytes: None,
            last_processed_file: None,
            failed_original_files: Vec::new(),
            deleted_original_files: 0,
            output_files_created: 0,
            last_output_file: None,
            failed_output_files: Vec::new(),
            last_updated: now,
            error_count: 0,
        }
    }

    /// `lastUpdated` must strictly increase on every observable state
    /// change (spec.md §4.5); when the wall clock hasn't advanced since the
    /// previous mutation, nudge it forward by one tick.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = if now > self.last_updated {
            now
        } else {
            self.last_updated + chrono::Duration::microseconds(1)
        };
    }

    pub fn start_day(&mut self, day: String, total_files: u64, now: DateTime<Utc>) {
        self.current_day = Some(day);
        self.current_day_total_files = Some(total_files);
        self.current_day_processed_files = Some(0);
        self.current_day_processed_bytes = Some(0);
        self.touch(now);
    }

    pub fn record_processed_file(&mut self, key: String, bytes: u64, now: DateTime<Utc>) {
        self.current_day_processed_files = Some(self.current_day_processed_files.unwrap_or(0) + 1);
        self.current_day_processed_bytes = Some(self.current_day_processed_bytes.unwrap_or(0) + bytes);
        self.last_processed_file = Some(key);
        self.touch(now);
    }

    pub fn record_failed_original(&mut self, key: String, now: DateTime<Utc>) {
        self.failed_original_files.push(key);
        self.error_count += 1;
        self.touch(now);
    }

    pub fn record_deleted_original(&mut self, now: DateTime<Utc>) {
        self.deleted_original_files += 1;
        self.touch(now);
    }

    pub fn record_output_created(&mut self, key: String, now: DateTime<Utc>) {
        self.output_files_created += 1;
        self.last_output_file = Some(key);
        self.touch(now);
    }

    pub fn record_failed_output(&mut self, key: String, now: DateTime<Utc>) {
        self.failed_output_files.push(key);
        self.error_count += 1;
        self.touch(now);
    }

    pub fn complete_day(&mut self, day: String, now: DateTime<Utc>) {
        self.completed_days.push(day);
        self.current_day = None;
        self.current_day_total_files = None;
        self.current_day_processed_files = None;
        self.current_day_processed_bytes = None;
        self.touch(now);
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.end_time = Some(now);
        self.touch(now);
    }

    pub fn is_in_flight(&self) -> bool {
        self.end_time.is_none()
    }
}
