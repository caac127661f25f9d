//! Failure modes for object-store operations (spec.md §7 "Transient I/O" /
//! "Precondition mismatch").

use snafu::Snafu;

/// Errors surfaced by an [`crate::ObjectStore`] implementation.
///
/// Precondition mismatches on conditional PUT are *not* represented here —
/// they surface as `Ok(false)` from `put_if_match`, never as an error, per
/// spec.md §7.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ObjectStoreError {
    /// The underlying HTTP transport failed (DNS, connect, TLS, timeout).
    #[snafu(display("request to {uri} failed: {source}"))]
    Transport { uri: String, source: reqwest::Error },

    /// The store returned a status code outside the set this operation
    /// treats as success.
    #[snafu(display("{operation} on {uri} returned unexpected status {status}: {body}"))]
    UnexpectedStatus {
        operation: &'static str,
        uri: String,
        status: u16,
        /// Truncated response body, per spec.md §4.1 "response bodies
        /// truncated before logging".
        body: String,
    },

    /// The store's list-objects response was not well-formed XML.
    #[snafu(display("failed to parse list response from {uri}: {reason}"))]
    MalformedListing { uri: String, reason: String },

    /// SigV4 key-derivation failed to construct an HMAC instance.
    #[snafu(display("failed to sign request: {source}"))]
    Signing { source: hmac::digest::InvalidLength },
}

/// Truncate a response body to a safe length before it is logged or carried
/// in an error — spec.md §4.1 and §7 both require this.
pub fn truncate_body(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let mut end = max_len;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &body[..end], body.len())
}
