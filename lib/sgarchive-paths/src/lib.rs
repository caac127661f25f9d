//! Deterministic object-key layout for the raw and compacted SendGrid event
//! archives.
//!
//! Every function here is pure: no I/O, no clock reads. Callers supply the
//! calendar fields and file bytes; the codec only knows how to turn those
//! into an object-store key or a listing prefix.

use chrono::{Datelike, NaiveDate};
use sha2::{Digest, Sha256};

/// Maps `(kind, date, hour, content-hash)` to object-store keys, and
/// produces listing prefixes for `ListDirect`/`ListFiles` traversal.
///
/// `raw_prefix` and `compacted_prefix` are the schema-version-qualified
/// top-level namespaces described in spec.md §3, e.g. `"raw/v1"` and
/// `"compacted/v1"`.
#[derive(Debug, Clone)]
pub struct PathCodec {
    raw_prefix: String,
    compacted_prefix: String,
}

/// File extension used for every object this system writes.
pub const FILE_EXTENSION: &str = "parquet";

/// Name of the run-status document, relative to the compacted prefix.
pub const RUN_STATUS_NAME: &str = "run.json";

/// Name of the distributed lock document, relative to the compacted prefix.
pub const RUN_LOCK_NAME: &str = "run.lock";

impl PathCodec {
    /// Construct a codec over the given raw/compacted namespace prefixes.
    ///
    /// Prefixes should not have a trailing slash; one is added where needed.
    pub fn new(raw_prefix: impl Into<String>, compacted_prefix: impl Into<String>) -> Self {
        Self {
            raw_prefix: trim_trailing_slash(raw_prefix.into()),
            compacted_prefix: trim_trailing_slash(compacted_prefix.into()),
        }
    }

    /// `<raw-prefix>/YYYY/MM/DD/<b64url(sha256(body))>.parquet`
    pub fn raw_file_key(&self, date: NaiveDate, body: &[u8]) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{}.{FILE_EXTENSION}",
            self.raw_prefix,
            date.year(),
            date.month(),
            date.day(),
            content_hash(body)
        )
    }

    /// `<compacted-prefix>/YYYY/MM/DD/HH/<b64url(sha256(body))>.parquet`
    pub fn compacted_file_key(&self, date: NaiveDate, hour: u32, body: &[u8]) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{:02}/{}.{FILE_EXTENSION}",
            self.compacted_prefix,
            date.year(),
            date.month(),
            date.day(),
            hour,
            content_hash(body)
        )
    }

    /// Progressively deeper listing prefix under the raw namespace. A
    /// missing leading component stops descent: e.g. `year=None` returns the
    /// raw-namespace root.
    pub fn raw_prefix(&self, year: Option<u32>, month: Option<u32>, day: Option<u32>) -> String {
        let mut parts = vec![self.raw_prefix.clone()];
        push_component(&mut parts, year.map(|y| format!("{y:04}")));
        if year.is_some() {
            push_component(&mut parts, month.map(|m| format!("{m:02}")));
        }
        if year.is_some() && month.is_some() {
            push_component(&mut parts, day.map(|d| format!("{d:02}")));
        }
        join_prefix(parts)
    }

    /// Progressively deeper listing prefix under the compacted namespace.
    pub fn compacted_prefix(
        &self,
        year: Option<u32>,
        month: Option<u32>,
        day: Option<u32>,
        hour: Option<u32>,
    ) -> String {
        let mut parts = vec![self.compacted_prefix.clone()];
        push_component(&mut parts, year.map(|y| format!("{y:04}")));
        if year.is_some() {
            push_component(&mut parts, month.map(|m| format!("{m:02}")));
        }
        if year.is_some() && month.is_some() {
            push_component(&mut parts, day.map(|d| format!("{d:02}")));
        }
        if year.is_some() && month.is_some() && day.is_some() {
            push_component(&mut parts, hour.map(|h| format!("{h:02}")));
        }
        join_prefix(parts)
    }

    /// `<compacted-prefix>/run.json`
    pub fn run_status_key(&self) -> String {
        format!("{}/{RUN_STATUS_NAME}", self.compacted_prefix)
    }

    /// `<compacted-prefix>/run.lock`
    pub fn run_lock_key(&self) -> String {
        format!("{}/{RUN_LOCK_NAME}", self.compacted_prefix)
    }
}

fn push_component(parts: &mut Vec<String>, component: Option<String>) {
    if let Some(c) = component {
        parts.push(c);
    }
}

fn join_prefix(parts: Vec<String>) -> String {
    let mut s = parts.join("/");
    s.push('/');
    s
}

fn trim_trailing_slash(mut s: String) -> String {
    while s.ends_with('/') {
        s.pop();
    }
    s
}

/// `base64url(sha256(body))`, no `=` padding, `+`→`-`, `/`→`_`.
///
/// Hashing is over the full file body bytes, not the logical records —
/// identical bytes always produce identical keys, independent of how many
/// senders or processes produced them.
pub fn content_hash(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    base64_url_no_pad(&digest)
}

fn base64_url_no_pad(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(bytes)
}
