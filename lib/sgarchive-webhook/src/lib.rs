//! SendGrid Event Webhook signature verification: ECDSA over secp256k1,
//! SHA-256, against `UTF8(timestamp) || body` (spec.md §4.7).

mod error;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{Signature, VerifyingKey};
use k256::pkcs8::DecodePublicKey;
use tracing::warn;

pub use error::WebhookError;

/// Default allowed clock skew between the `timestamp` header and wall
/// clock, per spec.md §4.7.
pub const DEFAULT_ALLOWED_SKEW: ChronoDuration = ChronoDuration::minutes(5);

/// Default request body size cap, enforced before verification even runs.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Result of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Failed,
    NotConfigured,
}

/// Verifies webhook signatures against a single configured public key.
/// Construction parses the key once; a malformed key is a configuration
/// error caught at startup, not a per-request verification failure.
pub struct WebhookVerifier {
    key: Option<VerifyingKey>,
    allowed_skew: ChronoDuration,
    max_body_bytes: usize,
}

impl WebhookVerifier {
    /// `public_key` accepts either a PEM-armored SPKI block or a bare
    /// base64-encoded SPKI DER blob. `None` means signature verification
    /// is disabled and every request reports [`VerificationOutcome::NotConfigured`].
    pub fn new(
        public_key: Option<&str>,
        allowed_skew: ChronoDuration,
        max_body_bytes: usize,
    ) -> Result<Self, WebhookError> {
        let key = public_key.map(parse_public_key).transpose()?;
        Ok(Self { key, allowed_skew, max_body_bytes })
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Verify `body` against the `timestamp`/`signature` header values.
    /// Never returns an `Err`: any malformed input (unparseable timestamp,
    /// non-base64 signature, wrong-shaped signature bytes) is a verification
    /// [`VerificationOutcome::Failed`], distinct from a missing key.
    pub fn verify(&self, body: &[u8], timestamp_header: &str, signature_header: &str, now: DateTime<Utc>) -> VerificationOutcome {
        let Some(key) = &self.key else {
            return VerificationOutcome::NotConfigured;
        };

        let Ok(timestamp) = timestamp_header.parse::<i64>() else {
            warn!(timestamp_header, "webhook timestamp header is not an integer");
            return VerificationOutcome::Failed;
        };
        let Some(event_time) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
            return VerificationOutcome::Failed;
        };
        if (now - event_time).abs() > self.allowed_skew {
            warn!(%timestamp, "webhook timestamp outside allowed skew");
            return VerificationOutcome::Failed;
        }

        let Ok(signature_bytes) = STANDARD.decode(signature_header) else {
            warn!("webhook signature header is not valid base64");
            return VerificationOutcome::Failed;
        };
        let Ok(signature) = Signature::from_der(&signature_bytes) else {
            warn!("webhook signature bytes are not a well-formed DER ECDSA signature");
            return VerificationOutcome::Failed;
        };

        let mut signed = Vec::with_capacity(timestamp_header.len() + body.len());
        signed.extend_from_slice(timestamp_header.as_bytes());
        signed.extend_from_slice(body);

        match key.verify(&signed, &signature) {
            Ok(()) => VerificationOutcome::Verified,
            Err(_) => VerificationOutcome::Failed,
        }
    }
}

fn parse_public_key(raw: &str) -> Result<VerifyingKey, WebhookError> {
    let trimmed = raw.trim();
    if trimmed.starts_with("-----BEGIN") {
        return VerifyingKey::from_public_key_pem(trimmed)
            .map_err(|e| WebhookError::InvalidKey { reason: e.to_string() });
    }
    let der = STANDARD
        .decode(trimmed)
        .map_err(|e| WebhookError::InvalidKey { reason: e.to_string() })?;
    VerifyingKey::from_public_key_der(&der).map_err(|e| WebhookError::InvalidKey { reason: e.to_string() })
}
